//! Content chunks and fingerprints produced by the change detector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypesError;

/// Why a chunk was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    /// First index of the entity, whole content chunked
    Full,
    /// Lines added since the last index
    Added,
    /// Lines that replaced a comparable run of removed lines
    Modified,
}

/// A span of content to be embedded.
///
/// Chunks are ephemeral: they are handed to the embedding backend and are
/// not persisted by the indexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentChunk {
    /// Chunk ID, derived from entity and position
    pub id: String,
    /// Entity the chunk belongs to
    pub entity_id: String,
    /// Entity type of the owning entity
    pub entity_type: String,
    /// Chunk text
    pub text: String,
    /// Checksum of `text`
    pub checksum: String,
    /// Zero-based line offset of the chunk within the current content
    pub position: usize,
    /// Why the chunk was produced
    pub kind: ChunkKind,
}

/// Checksum record of the last successfully indexed content of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentFingerprint {
    /// Entity ID
    pub entity_id: String,
    /// Entity type
    pub entity_type: String,
    /// Checksum of the indexed content
    pub checksum: String,
    /// When the content was indexed (milliseconds since epoch)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_indexed_at: DateTime<Utc>,
}

/// Fingerprint plus the content it was computed from.
///
/// The text is kept so the next change can be diffed line by line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedSnapshot {
    /// Fingerprint of the content
    pub fingerprint: ContentFingerprint,
    /// The indexed content
    pub content: String,
}

impl IndexedSnapshot {
    /// Serialize to JSON bytes for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, TypesError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypesError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
