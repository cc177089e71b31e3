//! Error types shared across the indexer crates.

use thiserror::Error;

/// Errors raised while parsing or decoding shared types.
#[derive(Debug, Error)]
pub enum TypesError {
    /// Entity type string is not one the indexer knows how to route
    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    /// Error class string is not a known class
    #[error("Unknown error class: {0}")]
    UnknownErrorClass(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
