//! Indexing tasks and their results.
//!
//! Tasks are created by external writers whenever an entity mutates and are
//! owned by the task store. The processor and the retry subsystem only touch
//! `retry_count` and the retry metadata.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::ErrorClass;

/// Metadata key holding the class of a task's most recent failure.
pub const LAST_ERROR_CLASS_KEY: &str = "last_error_class";

/// Mutation that triggered an indexing task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOperation {
    /// Entity was created
    Insert,
    /// Entity content changed
    Update,
    /// Entity was removed
    Delete,
}

impl TaskOperation {
    /// Wire name of this operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskOperation::Insert => "insert",
            TaskOperation::Update => "update",
            TaskOperation::Delete => "delete",
        }
    }
}

impl fmt::Display for TaskOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of indexing work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexingTask {
    /// Unique task ID (ULID)
    pub id: String,
    /// Raw entity type as written by the producer
    pub entity_type: String,
    /// ID of the entity to (re-)index
    pub entity_id: String,
    /// Workspace the entity belongs to
    pub workspace_id: String,
    /// Mutation that triggered the task
    pub operation: TaskOperation,
    /// Higher values are claimed first
    #[serde(default)]
    pub priority: i32,
    /// Free-form producer metadata plus retry bookkeeping
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Number of retries already scheduled for this task
    #[serde(default)]
    pub retry_count: u32,
    /// When the task was created (milliseconds since epoch for JSON compatibility)
    #[serde(with = "chrono::serde::ts_milliseconds", default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl IndexingTask {
    /// Create a new task with a fresh ULID.
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        workspace_id: impl Into<String>,
        operation: TaskOperation,
    ) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            workspace_id: workspace_id.into(),
            operation,
            priority: 0,
            metadata: HashMap::new(),
            retry_count: 0,
            created_at: Utc::now(),
        }
    }

    /// Set the task priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Class of the most recent failure, if this task is a retry.
    pub fn last_error_class(&self) -> Option<ErrorClass> {
        self.metadata
            .get(LAST_ERROR_CLASS_KEY)
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
    }

    /// Record the class of the failure that caused a retry.
    pub fn set_last_error_class(&mut self, class: ErrorClass) {
        self.metadata.insert(
            LAST_ERROR_CLASS_KEY.to_string(),
            serde_json::Value::String(class.as_str().to_string()),
        );
    }

    /// Clear retry bookkeeping so the task runs as if freshly submitted.
    pub fn reset_retries(&mut self) {
        self.retry_count = 0;
        self.metadata.remove(LAST_ERROR_CLASS_KEY);
    }

    /// Cache/log key for the entity this task targets.
    pub fn entity_key(&self) -> String {
        format!("{}:{}", self.entity_type, self.entity_id)
    }
}

/// Final disposition of a task within one processing cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Indexed (or removed) successfully
    Completed,
    /// Content was unchanged, nothing re-embedded
    Unchanged,
    /// Left pending with an incremented retry count
    RetryScheduled,
    /// Moved to the dead-letter queue
    DeadLettered,
    /// Failed terminally with a non-retryable error
    Rejected,
}

impl TaskStatus {
    /// Whether the task reached a successful terminal state.
    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Unchanged)
    }
}

/// Outcome of processing a single task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// Task ID
    pub task_id: String,
    /// Raw entity type of the task
    pub entity_type: String,
    /// Entity ID of the task
    pub entity_id: String,
    /// Operation of the task
    pub operation: TaskOperation,
    /// What happened
    pub status: TaskStatus,
    /// Number of chunks sent to the embedding backend
    pub chunks_indexed: usize,
    /// Retry count after processing
    pub retry_count: u32,
    /// Classified error, if the task failed
    pub error_class: Option<ErrorClass>,
    /// Error message, if the task failed
    pub error: Option<String>,
    /// Wall-clock time spent on this task
    pub duration_ms: u64,
}

impl TaskResult {
    /// Build a result for a task with the given status.
    pub fn new(task: &IndexingTask, status: TaskStatus) -> Self {
        Self {
            task_id: task.id.clone(),
            entity_type: task.entity_type.clone(),
            entity_id: task.entity_id.clone(),
            operation: task.operation,
            status,
            chunks_indexed: 0,
            retry_count: task.retry_count,
            error_class: None,
            error: None,
            duration_ms: 0,
        }
    }

    /// Attach failure details.
    pub fn with_error(mut self, class: ErrorClass, message: impl Into<String>) -> Self {
        self.error_class = Some(class);
        self.error = Some(message.into());
        self
    }

    /// Set the number of chunks indexed.
    pub fn with_chunks(mut self, chunks: usize) -> Self {
        self.chunks_indexed = chunks;
        self
    }

    /// Set the retry count reported for the task.
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Set the duration.
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}
