//! Process-local collaborators.
//!
//! Used by the daemon's offline mode and by tests. None of them persist
//! anything beyond the life of the process.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use sha2::{Digest, Sha256};

use indexer_monitor::{MetricsSink, MonitorError, PerformanceSnapshot};
use indexer_resilience::{DeadLetterEntry, DeadLetterStore, ErrorSink, ResilienceError};
use indexer_types::{ContentChunk, ErrorRecord, IndexingTask};

use crate::error::CollaboratorError;
use crate::traits::{ContentStore, Embedding, EmbeddingBackend, TaskStore};

/// Final report of a task to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskCompletion {
    pub task_id: String,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Default)]
struct TaskQueue {
    pending: Vec<IndexingTask>,
    claimed: HashMap<String, (String, IndexingTask)>,
    completions: Vec<TaskCompletion>,
    retries: usize,
}

/// Task store with priority-then-FIFO claim order.
#[derive(Default)]
pub struct InMemoryTaskStore {
    queue: Mutex<TaskQueue>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-loaded with tasks.
    pub fn with_tasks(tasks: Vec<IndexingTask>) -> Self {
        let store = Self::new();
        store.queue.lock().pending = tasks;
        store
    }

    /// Every completion reported so far, in order.
    pub fn completions(&self) -> Vec<TaskCompletion> {
        self.queue.lock().completions.clone()
    }

    /// Number of tasks claimed and not yet completed or requeued.
    pub fn claimed_count(&self) -> usize {
        self.queue.lock().claimed.len()
    }

    /// Number of `retry_task` calls.
    pub fn retry_count(&self) -> usize {
        self.queue.lock().retries
    }

    /// Copy of the pending queue.
    pub fn pending_tasks(&self) -> Vec<IndexingTask> {
        self.queue.lock().pending.clone()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn claim_batch(
        &self,
        size: usize,
        worker_id: &str,
    ) -> Result<Vec<IndexingTask>, CollaboratorError> {
        let mut queue = self.queue.lock();
        queue.pending.sort_by_key(|t| Reverse(t.priority));
        let take = size.min(queue.pending.len());
        let claimed: Vec<IndexingTask> = queue.pending.drain(..take).collect();
        for task in &claimed {
            queue
                .claimed
                .insert(task.id.clone(), (worker_id.to_string(), task.clone()));
        }
        Ok(claimed)
    }

    async fn complete_task(
        &self,
        task_id: &str,
        success: bool,
        error: Option<String>,
    ) -> Result<(), CollaboratorError> {
        let mut queue = self.queue.lock();
        if queue.claimed.remove(task_id).is_none() {
            return Err(CollaboratorError::TaskStore(format!(
                "task {task_id} is not claimed"
            )));
        }
        queue.completions.push(TaskCompletion {
            task_id: task_id.to_string(),
            success,
            error,
        });
        Ok(())
    }

    async fn retry_task(&self, task: IndexingTask) -> Result<(), CollaboratorError> {
        let mut queue = self.queue.lock();
        if queue.claimed.remove(&task.id).is_none() {
            return Err(CollaboratorError::TaskStore(format!(
                "task {} is not claimed",
                task.id
            )));
        }
        queue.retries += 1;
        queue.pending.push(task);
        Ok(())
    }

    async fn enqueue(&self, tasks: Vec<IndexingTask>) -> Result<(), CollaboratorError> {
        self.queue.lock().pending.extend(tasks);
        Ok(())
    }

    async fn pending_count(&self) -> Result<u64, CollaboratorError> {
        Ok(self.queue.lock().pending.len() as u64)
    }
}

/// Content keyed by `(entity_type, entity_id)`.
#[derive(Default)]
pub struct InMemoryContentStore {
    content: RwLock<HashMap<(String, String), String>>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entity's content.
    pub fn put(&self, entity_type: &str, entity_id: &str, content: impl Into<String>) {
        self.content.write().insert(
            (entity_type.to_string(), entity_id.to_string()),
            content.into(),
        );
    }

    /// Delete an entity.
    pub fn remove(&self, entity_type: &str, entity_id: &str) -> bool {
        self.content
            .write()
            .remove(&(entity_type.to_string(), entity_id.to_string()))
            .is_some()
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn fetch_content(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<String>, CollaboratorError> {
        let key = (entity_type.to_string(), entity_id.to_string());
        Ok(self.content.read().get(&key).cloned())
    }
}

/// Embedding backend deriving vectors from a SHA-256 of the chunk text.
///
/// Same text always yields the same vector, which keeps tests stable.
pub struct HashEmbeddingBackend {
    dimension: usize,
    vectors: RwLock<HashMap<(String, String), HashMap<String, Embedding>>>,
    calls: AtomicUsize,
}

impl HashEmbeddingBackend {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            vectors: RwLock::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Vector for a piece of text.
    pub fn embed(&self, chunk_id: &str, text: &str) -> Embedding {
        let digest = Sha256::digest(text.as_bytes());
        let values = (0..self.dimension)
            .map(|i| {
                let byte = digest[i % digest.len()] as f32;
                let salt = (i / digest.len()) as f32;
                (byte + salt * 31.0) % 256.0 / 255.0 - 0.5
            })
            .collect();
        Embedding::new(chunk_id, values)
    }

    /// Number of `index_chunks` calls.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Stored vectors for an entity.
    pub fn vector_count(&self, entity_type: &str, entity_id: &str) -> usize {
        self.vectors
            .read()
            .get(&(entity_type.to_string(), entity_id.to_string()))
            .map(HashMap::len)
            .unwrap_or(0)
    }

    /// Entities with at least one stored vector.
    pub fn entity_count(&self) -> usize {
        self.vectors.read().len()
    }
}

impl Default for HashEmbeddingBackend {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl EmbeddingBackend for HashEmbeddingBackend {
    async fn index_chunks(
        &self,
        chunks: Vec<ContentChunk>,
    ) -> Result<Vec<Embedding>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let embeddings: Vec<Embedding> = chunks
            .iter()
            .map(|c| self.embed(&c.id, &c.text))
            .collect();

        let mut vectors = self.vectors.write();
        for (chunk, embedding) in chunks.iter().zip(&embeddings) {
            vectors
                .entry((chunk.entity_type.clone(), chunk.entity_id.clone()))
                .or_default()
                .insert(chunk.id.clone(), embedding.clone());
        }
        Ok(embeddings)
    }

    async fn remove_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<(), CollaboratorError> {
        self.vectors
            .write()
            .remove(&(entity_type.to_string(), entity_id.to_string()));
        Ok(())
    }
}

/// Metrics sink that keeps every snapshot.
#[derive(Default)]
pub struct InMemoryMetricsSink {
    snapshots: Mutex<Vec<PerformanceSnapshot>>,
}

impl InMemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> Vec<PerformanceSnapshot> {
        self.snapshots.lock().clone()
    }
}

#[async_trait]
impl MetricsSink for InMemoryMetricsSink {
    async fn persist_snapshot(&self, snapshot: &PerformanceSnapshot) -> Result<(), MonitorError> {
        self.snapshots.lock().push(snapshot.clone());
        Ok(())
    }
}

/// Dead-letter store keyed by task ID.
#[derive(Default)]
pub struct InMemoryDeadLetterStore {
    entries: Mutex<HashMap<String, DeadLetterEntry>>,
}

impl InMemoryDeadLetterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn get(&self, task_id: &str) -> Option<DeadLetterEntry> {
        self.entries.lock().get(task_id).cloned()
    }
}

#[async_trait]
impl DeadLetterStore for InMemoryDeadLetterStore {
    async fn persist(&self, entry: &DeadLetterEntry) -> Result<(), ResilienceError> {
        self.entries
            .lock()
            .insert(entry.task.id.clone(), entry.clone());
        Ok(())
    }

    async fn remove(&self, task_id: &str) -> Result<(), ResilienceError> {
        self.entries.lock().remove(task_id);
        Ok(())
    }
}

/// Error sink that keeps every record.
#[derive(Default)]
pub struct InMemoryErrorSink {
    records: Mutex<Vec<ErrorRecord>>,
}

impl InMemoryErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ErrorRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl ErrorSink for InMemoryErrorSink {
    async fn record(&self, record: &ErrorRecord) -> Result<(), ResilienceError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexer_types::{ChunkKind, TaskOperation};

    fn task(entity_id: &str, priority: i32) -> IndexingTask {
        IndexingTask::new("page", entity_id, "w1", TaskOperation::Update).with_priority(priority)
    }

    #[tokio::test]
    async fn test_claim_order_is_priority_then_fifo() {
        let store = InMemoryTaskStore::with_tasks(vec![task("a", 0), task("b", 5), task("c", 0)]);
        let claimed = store.claim_batch(2, "w").await.unwrap();
        let ids: Vec<&str> = claimed.iter().map(|t| t.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(store.pending_count().await.unwrap(), 1);
        assert_eq!(store.claimed_count(), 2);
    }

    #[tokio::test]
    async fn test_complete_and_retry_require_claim() {
        let store = InMemoryTaskStore::with_tasks(vec![task("a", 0), task("b", 0)]);
        let claimed = store.claim_batch(10, "w").await.unwrap();

        store
            .complete_task(&claimed[0].id, true, None)
            .await
            .unwrap();
        assert!(store.complete_task(&claimed[0].id, true, None).await.is_err());

        store.retry_task(claimed[1].clone()).await.unwrap();
        assert_eq!(store.pending_count().await.unwrap(), 1);
        assert_eq!(store.retry_count(), 1);
        assert_eq!(store.completions().len(), 1);
    }

    #[tokio::test]
    async fn test_content_store() {
        let store = InMemoryContentStore::new();
        store.put("page", "p1", "hello");
        assert_eq!(
            store.fetch_content("page", "p1").await.unwrap(),
            Some("hello".to_string())
        );
        assert!(store.remove("page", "p1"));
        assert_eq!(store.fetch_content("page", "p1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_hash_backend_is_deterministic() {
        let backend = HashEmbeddingBackend::new(48);
        let a = backend.embed("c1", "hello");
        let b = backend.embed("c2", "hello");
        assert_eq!(a.values, b.values);
        assert_eq!(a.dimension(), 48);
        let norm: f32 = a.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);

        let chunk = ContentChunk {
            id: "page:p1:0:abc".to_string(),
            entity_id: "p1".to_string(),
            entity_type: "page".to_string(),
            text: "hello".to_string(),
            checksum: "abc".to_string(),
            position: 0,
            kind: ChunkKind::Full,
        };
        backend.index_chunks(vec![chunk]).await.unwrap();
        assert_eq!(backend.vector_count("page", "p1"), 1);
        assert_eq!(backend.call_count(), 1);

        backend.remove_entity("page", "p1").await.unwrap();
        assert_eq!(backend.entity_count(), 0);
    }
}
