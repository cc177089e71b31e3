//! Auto-tuning rules.
//!
//! Pure functions over the current recommendation; the monitor decides
//! when to apply them.

use serde::{Deserialize, Serialize};

use crate::config::MonitorConfig;

/// Advisory batch size and concurrency for the next processing cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendedConfig {
    pub batch_size: usize,
    pub concurrency: usize,
}

impl RecommendedConfig {
    /// Initial recommendation, clamped to the configured bounds.
    pub fn initial(config: &MonitorConfig) -> Self {
        Self {
            batch_size: config
                .initial_batch_size
                .clamp(config.min_batch_size, config.max_batch_size),
            concurrency: config
                .initial_concurrency
                .clamp(config.min_concurrency, config.max_concurrency),
        }
    }
}

/// Which rule fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TuningAction {
    BackOffOnErrors,
    ShrinkBatch,
    GrowBatch,
    AddWorker,
    RemoveWorker,
    Hold,
}

/// Apply the batch rules: error back-off, then latency.
pub fn tune_batch(
    current: RecommendedConfig,
    error_rate: f64,
    batch_latency_ms: f64,
    config: &MonitorConfig,
) -> (RecommendedConfig, TuningAction) {
    if error_rate > config.error_rate_threshold {
        let next = RecommendedConfig {
            batch_size: scale(current.batch_size, 0.5, config),
            concurrency: current
                .concurrency
                .saturating_sub(1)
                .max(config.min_concurrency),
        };
        return (next, TuningAction::BackOffOnErrors);
    }

    if batch_latency_ms > config.slow_batch_ms {
        let next = RecommendedConfig {
            batch_size: scale(current.batch_size, 0.8, config),
            ..current
        };
        return (next, TuningAction::ShrinkBatch);
    }

    if batch_latency_ms < config.fast_batch_ms {
        let next = RecommendedConfig {
            batch_size: scale(current.batch_size, 1.2, config),
            ..current
        };
        return (next, TuningAction::GrowBatch);
    }

    (current, TuningAction::Hold)
}

/// Apply the queue-depth rule.
pub fn tune_concurrency(
    current: RecommendedConfig,
    queue_depth: u64,
    config: &MonitorConfig,
) -> (RecommendedConfig, TuningAction) {
    if queue_depth > config.high_queue_depth {
        let next = RecommendedConfig {
            concurrency: (current.concurrency + 1).min(config.max_concurrency),
            ..current
        };
        return (next, TuningAction::AddWorker);
    }
    if queue_depth < config.low_queue_depth {
        let next = RecommendedConfig {
            concurrency: current
                .concurrency
                .saturating_sub(1)
                .max(config.min_concurrency),
            ..current
        };
        return (next, TuningAction::RemoveWorker);
    }
    (current, TuningAction::Hold)
}

fn scale(batch_size: usize, factor: f64, config: &MonitorConfig) -> usize {
    let scaled = (batch_size as f64 * factor).round() as usize;
    scaled.clamp(config.min_batch_size, config.max_batch_size)
}
