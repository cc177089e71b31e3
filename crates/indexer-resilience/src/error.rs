//! Error types for the resilience crate.

use thiserror::Error;

/// Errors raised by resilience collaborators.
///
/// These only ever come from best-effort persistence; the retry path logs
/// them and carries on.
#[derive(Debug, Error)]
pub enum ResilienceError {
    /// Dead-letter store failed
    #[error("Dead-letter store error: {0}")]
    DeadLetterStore(String),

    /// Error sink failed
    #[error("Error sink error: {0}")]
    ErrorSink(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ResilienceError::DeadLetterStore("disk full".to_string());
        assert!(err.to_string().contains("Dead-letter store"));

        let err = ResilienceError::ErrorSink("closed".to_string());
        assert_eq!(err.to_string(), "Error sink error: closed");
    }
}
