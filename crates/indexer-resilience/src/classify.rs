//! Failure classification.
//!
//! Messages are matched case-insensitively against fixed pattern lists.
//! The lists are checked in priority order, so a message mentioning both
//! a timeout and a database lands in `network`.

use serde::{Deserialize, Serialize};

use indexer_types::ErrorClass;

const NETWORK_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "econnrefused",
    "econnreset",
    "connection",
    "fetch",
    "network",
    "socket",
];

const RATE_LIMIT_PATTERNS: &[&str] = &["429", "rate limit", "too many requests", "quota"];

const DATABASE_PATTERNS: &[&str] = &["database", "sql", "storage", "deadlock"];

const EMBEDDING_PATTERNS: &[&str] = &["embedding", "vector", "model", "dimension"];

const PRIORITY: &[(ErrorClass, &[&str])] = &[
    (ErrorClass::Network, NETWORK_PATTERNS),
    (ErrorClass::RateLimit, RATE_LIMIT_PATTERNS),
    (ErrorClass::Database, DATABASE_PATTERNS),
    (ErrorClass::Embedding, EMBEDDING_PATTERNS),
];

/// Classify an error message.
pub fn classify_message(message: &str) -> ErrorClass {
    let lower = message.to_lowercase();
    PRIORITY
        .iter()
        .find(|(_, patterns)| patterns.iter().any(|p| lower.contains(p)))
        .map(|(class, _)| *class)
        .unwrap_or(ErrorClass::Default)
}

/// A failed attempt at processing a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    /// Classified error
    pub class: ErrorClass,
    /// Original message
    pub message: String,
}

impl TaskFailure {
    /// Classify a failure from its message.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            class: classify_message(&message),
            message,
        }
    }

    /// Build a failure with an explicit class, bypassing message matching.
    pub fn classified(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }

    /// Change detector rejected the entity.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::classified(ErrorClass::MalformedEntity, message)
    }

    /// No route for the entity type.
    pub fn unknown_entity_type(entity_type: &str) -> Self {
        Self::classified(
            ErrorClass::UnknownEntityType,
            format!("Unknown entity type: {entity_type}"),
        )
    }

    /// Whether the failure may consume retry budget.
    pub fn is_retryable(&self) -> bool {
        self.class.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_messages() {
        assert_eq!(classify_message("connect ECONNREFUSED 127.0.0.1:5432"), ErrorClass::Network);
        assert_eq!(classify_message("Request timed out"), ErrorClass::Network);
        assert_eq!(classify_message("fetch failed"), ErrorClass::Network);
        assert_eq!(classify_message("socket hang up"), ErrorClass::Network);
    }

    #[test]
    fn test_rate_limit_messages() {
        assert_eq!(classify_message("HTTP 429"), ErrorClass::RateLimit);
        assert_eq!(classify_message("Monthly quota exceeded"), ErrorClass::RateLimit);
        assert_eq!(classify_message("Too Many Requests"), ErrorClass::RateLimit);
    }

    #[test]
    fn test_database_and_embedding_messages() {
        assert_eq!(classify_message("deadlock detected"), ErrorClass::Database);
        assert_eq!(classify_message("SQL syntax error"), ErrorClass::Database);
        assert_eq!(classify_message("vector dimension mismatch"), ErrorClass::Embedding);
        assert_eq!(classify_message("model overloaded"), ErrorClass::Embedding);
    }

    #[test]
    fn test_priority_order() {
        // network wins over database
        assert_eq!(classify_message("database connection reset"), ErrorClass::Network);
        // rate limit wins over embedding
        assert_eq!(classify_message("embedding quota exhausted"), ErrorClass::RateLimit);
    }

    #[test]
    fn test_unmatched_is_default() {
        assert_eq!(classify_message("something odd happened"), ErrorClass::Default);
        assert_eq!(classify_message(""), ErrorClass::Default);
    }

    #[test]
    fn test_explicit_classes_bypass_matching() {
        let failure = TaskFailure::malformed("connection in content");
        assert_eq!(failure.class, ErrorClass::MalformedEntity);
        assert!(!failure.is_retryable());

        let failure = TaskFailure::unknown_entity_type("comment");
        assert_eq!(failure.class, ErrorClass::UnknownEntityType);
        assert!(failure.message.contains("comment"));

        assert!(TaskFailure::from_message("ECONNRESET").is_retryable());
    }
}
