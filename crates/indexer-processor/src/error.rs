//! Error types for the batch processor.

use thiserror::Error;

/// Failure reported by an external collaborator.
///
/// The message is what the retry subsystem classifies, so implementations
/// should pass the downstream error text through unchanged.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// Task store call failed
    #[error("Task store error: {0}")]
    TaskStore(String),

    /// Content store call failed
    #[error("Content store error: {0}")]
    ContentStore(String),

    /// Embedding backend call failed
    #[error("Embedding backend error: {0}")]
    Embedding(String),
}

impl CollaboratorError {
    /// The downstream error text without the collaborator prefix.
    pub fn message(&self) -> &str {
        match self {
            CollaboratorError::TaskStore(m)
            | CollaboratorError::ContentStore(m)
            | CollaboratorError::Embedding(m) => m,
        }
    }
}

/// Errors that abort a processing cycle.
#[derive(Debug, Error)]
pub enum ProcessorError {
    /// Claiming or requeueing tasks failed
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}
