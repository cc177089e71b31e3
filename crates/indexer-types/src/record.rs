//! Error classes and error records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypesError;
use crate::task::{IndexingTask, TaskOperation};

/// Classification of an indexing failure.
///
/// The first five classes are retryable and map to a retry policy and a
/// circuit breaker. The last two are raised by the indexer itself and are
/// never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Timeouts, refused/reset connections, failed fetches
    Network,
    /// HTTP 429, quota exhaustion
    RateLimit,
    /// Storage and database failures
    Database,
    /// Vector/model failures from the embedding backend
    Embedding,
    /// Anything unclassified
    Default,
    /// Change detector rejected the entity content
    MalformedEntity,
    /// Processor has no route for the task's entity type
    UnknownEntityType,
}

impl ErrorClass {
    /// Classes that have a retry policy.
    pub const RETRYABLE: [ErrorClass; 5] = [
        ErrorClass::Network,
        ErrorClass::RateLimit,
        ErrorClass::Database,
        ErrorClass::Embedding,
        ErrorClass::Default,
    ];

    /// Wire name of this class.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Network => "network",
            ErrorClass::RateLimit => "rate_limit",
            ErrorClass::Database => "database",
            ErrorClass::Embedding => "embedding",
            ErrorClass::Default => "default",
            ErrorClass::MalformedEntity => "malformed_entity",
            ErrorClass::UnknownEntityType => "unknown_entity_type",
        }
    }

    /// Whether failures of this class may consume retry budget.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ErrorClass::MalformedEntity | ErrorClass::UnknownEntityType
        )
    }

    /// Name of the downstream service whose circuit breaker tracks this class.
    pub fn service(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorClass {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let class = match s {
            "network" => ErrorClass::Network,
            "rate_limit" => ErrorClass::RateLimit,
            "database" => ErrorClass::Database,
            "embedding" => ErrorClass::Embedding,
            "default" => ErrorClass::Default,
            "malformed_entity" => ErrorClass::MalformedEntity,
            "unknown_entity_type" => ErrorClass::UnknownEntityType,
            other => return Err(TypesError::UnknownErrorClass(other.to_string())),
        };
        Ok(class)
    }
}

/// A classified failure of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Task that failed
    pub task_id: String,
    /// Raw entity type of the task
    pub entity_type: String,
    /// Entity ID of the task
    pub entity_id: String,
    /// Operation of the task
    pub operation: TaskOperation,
    /// Classified error
    pub error_class: ErrorClass,
    /// Original error message
    pub message: String,
    /// When the failure was observed (milliseconds since epoch)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// Retry count at the time of failure
    pub retry_count: u32,
}

impl ErrorRecord {
    /// Build a record for a failed task.
    pub fn for_task(
        task: &IndexingTask,
        error_class: ErrorClass,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: task.id.clone(),
            entity_type: task.entity_type.clone(),
            entity_id: task.entity_id.clone(),
            operation: task.operation,
            error_class,
            message: message.into(),
            timestamp,
            retry_count: task.retry_count,
        }
    }

    /// Serialize to JSON bytes for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, TypesError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypesError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
