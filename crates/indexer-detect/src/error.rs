//! Error types for change detection.

use thiserror::Error;

/// Errors raised by the change detector.
///
/// Callers treat every variant as a non-retryable `malformed_entity`
/// failure.
#[derive(Debug, Error)]
pub enum DetectError {
    /// Entity input rejected before hashing
    #[error("Malformed entity: {0}")]
    Malformed(String),

    /// Snapshot store failed
    #[error("Snapshot store error: {0}")]
    Store(String),
}
