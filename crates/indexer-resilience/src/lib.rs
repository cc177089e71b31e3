//! # indexer-resilience
//!
//! Failure handling for the indexing pipeline.
//!
//! - [`classify_message`]: map error text to an [`ErrorClass`](indexer_types::ErrorClass)
//! - [`RetryPolicy`]: exponential backoff with jitter per class
//! - [`CircuitBreaker`]: lock-free per-service breaker
//! - [`DeadLetterQueue`]: bounded holding area for tasks that gave up
//! - [`ErrorTracker`]: ring buffer of recent errors with spike alerts
//! - [`RetryHandler`]: ties the above together behind `handle_error`
//!
//! ## Usage
//!
//! ```rust,no_run
//! use indexer_resilience::{ResilienceConfig, RetryHandler, TaskFailure};
//! use indexer_types::{IndexingTask, TaskOperation};
//!
//! # async fn example() {
//! let handler = RetryHandler::new(ResilienceConfig::default());
//! let mut task = IndexingTask::new("page", "p1", "w1", TaskOperation::Update);
//! let decision = handler
//!     .handle_error(&mut task, &TaskFailure::from_message("ECONNRESET"))
//!     .await;
//! assert!(decision.should_retry());
//! # }
//! ```

pub mod breaker;
pub mod classify;
pub mod config;
pub mod dlq;
pub mod error;
pub mod handler;
pub mod policy;
pub mod tracker;

pub use breaker::{BreakerConfig, BreakerRegistry, BreakerState, CircuitBreaker, CircuitBreakerState};
pub use classify::{classify_message, TaskFailure};
pub use config::ResilienceConfig;
pub use dlq::{DeadLetterEntry, DeadLetterQueue, DeadLetterReason, DeadLetterStore};
pub use error::ResilienceError;
pub use handler::{RetryDecision, RetryHandler, RetryStats};
pub use policy::{RetryConfig, RetryPolicy};
pub use tracker::{AlertObserver, ErrorAlert, ErrorSink, ErrorTracker, TrackerConfig};
