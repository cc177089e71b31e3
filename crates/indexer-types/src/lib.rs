//! # indexer-types
//!
//! Shared domain types for the resilient indexer.
//!
//! This crate defines the data structures passed between the indexing
//! components:
//! - Tasks: units of indexing work claimed from the task store
//! - Chunks and fingerprints: the change detector's inputs and outputs
//! - Error records: classified failures tracked by the retry subsystem
//! - Clock: injectable time source for breakers, trackers and tests
//!
//! ## Usage
//!
//! ```rust
//! use indexer_types::{IndexingTask, TaskOperation};
//!
//! let task = IndexingTask::new("page", "p1", "w1", TaskOperation::Update);
//! assert_eq!(task.retry_count, 0);
//! ```

pub mod chunk;
pub mod clock;
pub mod entity;
pub mod error;
pub mod record;
pub mod task;

pub use chunk::{ChunkKind, ContentChunk, ContentFingerprint, IndexedSnapshot};
pub use clock::{Clock, ManualClock, SystemClock};
pub use entity::EntityType;
pub use error::TypesError;
pub use record::{ErrorClass, ErrorRecord};
pub use task::{IndexingTask, TaskOperation, TaskResult, TaskStatus, LAST_ERROR_CLASS_KEY};
