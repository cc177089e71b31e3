//! Change detector with deferred commits.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use indexer_types::{
    ChunkKind, Clock, ContentChunk, ContentFingerprint, IndexedSnapshot, SystemClock,
};

use crate::checksum::content_checksum;
use crate::chunker::{Chunker, LineChunker};
use crate::diff::{diff_lines, RunKind};
use crate::error::DetectError;
use crate::store::SnapshotStore;

/// Configuration for the change detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Content larger than this is rejected as malformed
    #[serde(default = "default_max_content_bytes")]
    pub max_content_bytes: usize,

    /// Size ratio under which a removed+added pair counts as a modification
    #[serde(default = "default_modified_ratio")]
    pub modified_ratio: f64,

    /// Time budget of one line diff before it falls back to a coarse result
    #[serde(default = "default_diff_timeout_ms")]
    pub diff_timeout_ms: u64,

    /// Line/character budget of the default chunker
    #[serde(default)]
    pub chunker: LineChunker,
}

fn default_max_content_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_modified_ratio() -> f64 {
    2.0
}

fn default_diff_timeout_ms() -> u64 {
    250
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            max_content_bytes: default_max_content_bytes(),
            modified_ratio: default_modified_ratio(),
            diff_timeout_ms: default_diff_timeout_ms(),
            chunker: LineChunker::default(),
        }
    }
}

impl DetectorConfig {
    /// Set the maximum accepted content size.
    pub fn with_max_content_bytes(mut self, bytes: usize) -> Self {
        self.max_content_bytes = bytes;
        self
    }

    /// Set the modification pairing ratio.
    pub fn with_modified_ratio(mut self, ratio: f64) -> Self {
        self.modified_ratio = ratio;
        self
    }

    /// Set the line diff time budget.
    pub fn with_diff_timeout_ms(mut self, ms: u64) -> Self {
        self.diff_timeout_ms = ms;
        self
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_content_bytes == 0 {
            return Err("max_content_bytes must be > 0".to_string());
        }
        if self.modified_ratio < 1.0 {
            return Err(format!(
                "modified_ratio must be >= 1.0, got {}",
                self.modified_ratio
            ));
        }
        if self.diff_timeout_ms == 0 {
            return Err("diff_timeout_ms must be > 0".to_string());
        }
        Ok(())
    }
}

/// How an entity's content relates to its last indexed snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Checksum matches the indexed snapshot
    Unchanged,
    /// Entity was never indexed
    New,
    /// Content differs from the indexed snapshot
    Changed,
}

/// Result of a detection.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    /// Entity ID
    pub entity_id: String,
    /// Entity type
    pub entity_type: String,
    /// Checksum of the current content
    pub checksum: String,
    /// Relation to the last indexed snapshot
    pub kind: ChangeKind,
    /// Chunks to re-embed (empty when unchanged or removal-only)
    pub chunks: Vec<ContentChunk>,
}

impl ChangeSet {
    /// Whether a commit is needed to record this detection.
    pub fn needs_commit(&self) -> bool {
        self.kind != ChangeKind::Unchanged
    }
}

/// Incremental change detector.
pub struct ChangeDetector {
    store: Arc<dyn SnapshotStore>,
    chunker: Arc<dyn Chunker>,
    config: DetectorConfig,
    clock: Arc<dyn Clock>,
    pending: Mutex<HashMap<(String, String), IndexedSnapshot>>,
}

impl ChangeDetector {
    /// Create a detector using the configured [`LineChunker`].
    pub fn new(store: Arc<dyn SnapshotStore>, config: DetectorConfig) -> Self {
        let chunker = Arc::new(config.chunker.clone());
        Self::with_chunker(store, chunker, config)
    }

    /// Create a detector with a custom chunking collaborator.
    pub fn with_chunker(
        store: Arc<dyn SnapshotStore>,
        chunker: Arc<dyn Chunker>,
        config: DetectorConfig,
    ) -> Self {
        Self {
            store,
            chunker,
            config,
            clock: Arc::new(SystemClock),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Stamp fingerprints with an explicit clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Decide whether the entity needs re-indexing and chunk the delta.
    ///
    /// The new snapshot is staged until [`commit`](Self::commit) is called.
    pub fn detect_and_chunk(
        &self,
        entity_id: &str,
        entity_type: &str,
        content: &str,
    ) -> Result<ChangeSet, DetectError> {
        if entity_id.trim().is_empty() {
            return Err(DetectError::Malformed("empty entity id".to_string()));
        }
        if content.len() > self.config.max_content_bytes {
            return Err(DetectError::Malformed(format!(
                "content of {}:{} is {} bytes, limit is {}",
                entity_type,
                entity_id,
                content.len(),
                self.config.max_content_bytes
            )));
        }

        let checksum = content_checksum(content);
        let previous = self.store.get(entity_type, entity_id)?;

        let (kind, chunks) = match &previous {
            Some(prev) if prev.fingerprint.checksum == checksum => {
                trace!(entity_type, entity_id, "Content unchanged");
                self.pending
                    .lock()
                    .remove(&(entity_type.to_string(), entity_id.to_string()));
                return Ok(ChangeSet {
                    entity_id: entity_id.to_string(),
                    entity_type: entity_type.to_string(),
                    checksum,
                    kind: ChangeKind::Unchanged,
                    chunks: Vec::new(),
                });
            }
            None => {
                let lines: Vec<&str> = content.lines().collect();
                let chunks = self.spans_to_chunks(entity_id, entity_type, &lines, 0, ChunkKind::Full);
                (ChangeKind::New, chunks)
            }
            Some(prev) => {
                let lines: Vec<&str> = content.lines().collect();
                let runs = diff_lines(
                    &prev.content,
                    content,
                    self.config.modified_ratio,
                    Duration::from_millis(self.config.diff_timeout_ms),
                );
                let mut chunks = Vec::new();
                for run in runs.iter().filter(|r| r.needs_chunking()) {
                    let kind = if run.kind == RunKind::Modified {
                        ChunkKind::Modified
                    } else {
                        ChunkKind::Added
                    };
                    let end = run.new.end.min(lines.len());
                    let start = run.new.start.min(end);
                    chunks.extend(self.spans_to_chunks(
                        entity_id,
                        entity_type,
                        &lines[start..end],
                        start,
                        kind,
                    ));
                }
                (ChangeKind::Changed, chunks)
            }
        };

        debug!(
            entity_type,
            entity_id,
            kind = ?kind,
            chunks = chunks.len(),
            "Detected content change"
        );

        let snapshot = IndexedSnapshot {
            fingerprint: ContentFingerprint {
                entity_id: entity_id.to_string(),
                entity_type: entity_type.to_string(),
                checksum: checksum.clone(),
                last_indexed_at: self.clock.now(),
            },
            content: content.to_string(),
        };
        self.pending
            .lock()
            .insert((entity_type.to_string(), entity_id.to_string()), snapshot);

        Ok(ChangeSet {
            entity_id: entity_id.to_string(),
            entity_type: entity_type.to_string(),
            checksum,
            kind,
            chunks,
        })
    }

    /// Persist the pending snapshot after downstream indexing succeeded.
    ///
    /// Returns `false` when nothing was pending for the entity.
    pub fn commit(&self, entity_type: &str, entity_id: &str) -> Result<bool, DetectError> {
        let pending = self
            .pending
            .lock()
            .remove(&(entity_type.to_string(), entity_id.to_string()));
        match pending {
            Some(mut snapshot) => {
                snapshot.fingerprint.last_indexed_at = self.clock.now();
                self.store.put(snapshot)?;
                debug!(entity_type, entity_id, "Committed fingerprint");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drop the pending snapshot after downstream indexing failed.
    pub fn discard(&self, entity_type: &str, entity_id: &str) {
        self.pending
            .lock()
            .remove(&(entity_type.to_string(), entity_id.to_string()));
    }

    /// Forget an entity entirely (after it was deleted).
    pub fn forget(&self, entity_type: &str, entity_id: &str) -> Result<bool, DetectError> {
        self.discard(entity_type, entity_id);
        self.store.remove(entity_type, entity_id)
    }

    /// Fingerprint of the last committed index of an entity.
    pub fn fingerprint(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<ContentFingerprint>, DetectError> {
        Ok(self
            .store
            .get(entity_type, entity_id)?
            .map(|s| s.fingerprint))
    }

    /// Number of detections awaiting commit or discard.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    fn spans_to_chunks(
        &self,
        entity_id: &str,
        entity_type: &str,
        lines: &[&str],
        start_line: usize,
        kind: ChunkKind,
    ) -> Vec<ContentChunk> {
        self.chunker
            .chunk(lines, start_line)
            .into_iter()
            .map(|span| {
                let checksum = content_checksum(&span.text);
                ContentChunk {
                    id: format!("{}:{}:{}:{}", entity_type, entity_id, span.position, &checksum[..12]),
                    entity_id: entity_id.to_string(),
                    entity_type: entity_type.to_string(),
                    text: span.text,
                    checksum,
                    position: span.position,
                    kind,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemorySnapshotStore;

    fn detector() -> ChangeDetector {
        ChangeDetector::new(
            Arc::new(InMemorySnapshotStore::new()),
            DetectorConfig::default(),
        )
    }

    #[test]
    fn test_first_detection_chunks_everything() {
        let detector = detector();
        let set = detector.detect_and_chunk("p1", "page", "hello world").unwrap();
        assert_eq!(set.kind, ChangeKind::New);
        assert_eq!(set.chunks.len(), 1);
        assert_eq!(set.chunks[0].kind, ChunkKind::Full);
        assert_eq!(set.chunks[0].text, "hello world");
        assert_eq!(detector.pending_count(), 1);
    }

    #[test]
    fn test_unchanged_after_commit_is_empty() {
        let detector = detector();
        let first = detector.detect_and_chunk("p1", "page", "hello world").unwrap();
        assert!(!first.chunks.is_empty());
        assert!(detector.commit("page", "p1").unwrap());

        let second = detector.detect_and_chunk("p1", "page", "hello world").unwrap();
        assert_eq!(second.kind, ChangeKind::Unchanged);
        assert!(second.chunks.is_empty());
        assert!(!second.needs_commit());
    }

    #[test]
    fn test_uncommitted_detection_repeats() {
        let detector = detector();
        detector.detect_and_chunk("p1", "page", "hello").unwrap();
        detector.discard("page", "p1");

        let again = detector.detect_and_chunk("p1", "page", "hello").unwrap();
        assert_eq!(again.kind, ChangeKind::New);
        assert_eq!(again.chunks.len(), 1);
    }

    #[test]
    fn test_only_changed_lines_are_chunked() {
        let detector = detector();
        detector
            .detect_and_chunk("p1", "page", "intro\nbody\noutro\n")
            .unwrap();
        detector.commit("page", "p1").unwrap();

        let set = detector
            .detect_and_chunk("p1", "page", "intro\nnew body\noutro\nappendix\n")
            .unwrap();
        assert_eq!(set.kind, ChangeKind::Changed);
        let texts: Vec<(&str, ChunkKind, usize)> = set
            .chunks
            .iter()
            .map(|c| (c.text.as_str(), c.kind, c.position))
            .collect();
        assert_eq!(
            texts,
            vec![
                ("new body", ChunkKind::Modified, 1),
                ("appendix", ChunkKind::Added, 3)
            ]
        );
    }

    #[test]
    fn test_removal_only_produces_no_chunks() {
        let detector = detector();
        detector.detect_and_chunk("p1", "page", "a\nb\nc\n").unwrap();
        detector.commit("page", "p1").unwrap();

        let set = detector.detect_and_chunk("p1", "page", "a\nc\n").unwrap();
        assert_eq!(set.kind, ChangeKind::Changed);
        assert!(set.chunks.is_empty());
        assert!(set.needs_commit());
    }

    #[test]
    fn test_fingerprint_committed_only_on_commit() {
        let detector = detector();
        detector.detect_and_chunk("p1", "page", "v1").unwrap();
        assert!(detector.fingerprint("page", "p1").unwrap().is_none());

        detector.commit("page", "p1").unwrap();
        let fp = detector.fingerprint("page", "p1").unwrap().unwrap();
        assert_eq!(fp.checksum, content_checksum("v1"));

        assert!(!detector.commit("page", "p1").unwrap());
    }

    #[test]
    fn test_forget_removes_snapshot() {
        let detector = detector();
        detector.detect_and_chunk("p1", "page", "v1").unwrap();
        detector.commit("page", "p1").unwrap();
        assert!(detector.forget("page", "p1").unwrap());

        let set = detector.detect_and_chunk("p1", "page", "v1").unwrap();
        assert_eq!(set.kind, ChangeKind::New);
    }

    #[test]
    fn test_malformed_input() {
        let detector = ChangeDetector::new(
            Arc::new(InMemorySnapshotStore::new()),
            DetectorConfig::default().with_max_content_bytes(4),
        );
        assert!(matches!(
            detector.detect_and_chunk("", "page", "x"),
            Err(DetectError::Malformed(_))
        ));
        assert!(matches!(
            detector.detect_and_chunk("p1", "page", "too long"),
            Err(DetectError::Malformed(_))
        ));
    }

    #[test]
    fn test_config_validation() {
        assert!(DetectorConfig::default().validate().is_ok());
        assert!(DetectorConfig::default()
            .with_modified_ratio(0.5)
            .validate()
            .is_err());
    }

    #[test]
    fn test_fingerprint_uses_injected_clock() {
        let clock = Arc::new(indexer_types::ManualClock::new(1_700_000_000_000));
        let detector = detector().with_clock(clock.clone());
        detector.detect_and_chunk("p1", "page", "hello").unwrap();
        clock.advance_ms(5_000);
        detector.commit("page", "p1").unwrap();

        let fingerprint = detector.fingerprint("page", "p1").unwrap().unwrap();
        assert_eq!(fingerprint.last_indexed_at.timestamp_millis(), 1_700_000_005_000);
    }

    #[test]
    fn test_zero_diff_timeout_is_invalid() {
        let config = DetectorConfig::default().with_diff_timeout_ms(0);
        assert!(config.validate().is_err());
        assert!(DetectorConfig::default().validate().is_ok());
    }
}
