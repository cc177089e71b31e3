//! Collaborator interfaces.
//!
//! The processor owns no durable state. Tasks, content and embeddings live
//! behind these traits; the `memory` module has process-local versions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use indexer_types::{ContentChunk, IndexingTask};

use crate::error::CollaboratorError;

/// Vector produced for one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    /// ID of the chunk this vector belongs to
    pub chunk_id: String,
    /// Unit-length vector
    pub values: Vec<f32>,
}

impl Embedding {
    /// Build an embedding, normalizing to unit length.
    pub fn new(chunk_id: impl Into<String>, values: Vec<f32>) -> Self {
        let norm: f32 = values.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            values.iter().map(|x| x / norm).collect()
        } else {
            values
        };
        Self {
            chunk_id: chunk_id.into(),
            values,
        }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }
}

/// Durable queue of indexing tasks.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Exclusively claim up to `size` pending tasks for a worker.
    async fn claim_batch(
        &self,
        size: usize,
        worker_id: &str,
    ) -> Result<Vec<IndexingTask>, CollaboratorError>;

    /// Mark a claimed task as finished.
    async fn complete_task(
        &self,
        task_id: &str,
        success: bool,
        error: Option<String>,
    ) -> Result<(), CollaboratorError>;

    /// Return a claimed task to the pending queue with its updated retry state.
    async fn retry_task(&self, task: IndexingTask) -> Result<(), CollaboratorError>;

    /// Submit new tasks.
    async fn enqueue(&self, tasks: Vec<IndexingTask>) -> Result<(), CollaboratorError>;

    /// Number of tasks waiting to be claimed.
    async fn pending_count(&self) -> Result<u64, CollaboratorError>;
}

/// Source of current entity content.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Current text of an entity, or `None` if it no longer exists.
    async fn fetch_content(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<String>, CollaboratorError>;
}

/// Embedding generation and vector storage.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed and store chunks in one bulk call.
    async fn index_chunks(
        &self,
        chunks: Vec<ContentChunk>,
    ) -> Result<Vec<Embedding>, CollaboratorError>;

    /// Drop every stored vector of an entity.
    async fn remove_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<(), CollaboratorError>;
}
