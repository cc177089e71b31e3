//! # indexer-processor
//!
//! Claims indexing tasks from a queue and drives them through change
//! detection, bulk embedding, cache invalidation and the retry/dead-letter
//! path.
//!
//! External systems sit behind the [`TaskStore`], [`ContentStore`] and
//! [`EmbeddingBackend`] traits. The [`memory`] module provides in-process
//! implementations used by tests and the daemon's file-driven mode.

pub mod config;
pub mod error;
pub mod memory;
pub mod processor;
pub mod summary;
pub mod traits;

pub use config::ProcessorConfig;
pub use error::{CollaboratorError, ProcessorError};
pub use memory::{
    HashEmbeddingBackend, InMemoryContentStore, InMemoryDeadLetterStore, InMemoryErrorSink,
    InMemoryMetricsSink, InMemoryTaskStore, TaskCompletion,
};
pub use processor::BatchProcessor;
pub use summary::BatchSummary;
pub use traits::{ContentStore, Embedding, EmbeddingBackend, TaskStore};
