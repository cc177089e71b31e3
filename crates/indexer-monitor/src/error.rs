//! Error types for the monitor.

use thiserror::Error;

/// Errors raised while persisting metrics.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Metrics sink rejected the snapshot
    #[error("Metrics sink error: {0}")]
    Sink(String),

    /// Snapshot could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
