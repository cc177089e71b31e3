//! # indexer-monitor
//!
//! Rolling performance metrics and the batch/concurrency auto-tuner.
//!
//! The monitor is a one-way signal: the processor reports operations,
//! batches and queue depth, and reads back a [`RecommendedConfig`] at the
//! start of each cycle. The monitor also receives cache and resilience
//! alerts and keeps them for operators.

pub mod config;
pub mod error;
pub mod monitor;
pub mod samples;
pub mod sink;
pub mod tuner;

pub use config::MonitorConfig;
pub use error::MonitorError;
pub use monitor::{AlertSignal, MonitorAlert, OperationToken, PerformanceMonitor};
pub use samples::{LatencySnapshot, RollingSamples};
pub use sink::{MetricsSink, PerformanceSnapshot};
pub use tuner::{tune_batch, tune_concurrency, RecommendedConfig, TuningAction};
