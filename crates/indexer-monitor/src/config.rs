//! Monitor and auto-tuner configuration.

use serde::{Deserialize, Serialize};

/// Configuration for [`crate::PerformanceMonitor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Capacity of each rolling sample window
    #[serde(default = "default_sample_capacity")]
    pub sample_capacity: usize,

    /// Batch size recommended before any tuning
    #[serde(default = "default_initial_batch_size")]
    pub initial_batch_size: usize,

    /// Concurrency recommended before any tuning
    #[serde(default = "default_initial_concurrency")]
    pub initial_concurrency: usize,

    /// Error rate above which batch size and concurrency shrink
    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_threshold: f64,

    /// Batch latency above which the batch size shrinks
    #[serde(default = "default_slow_batch_ms")]
    pub slow_batch_ms: f64,

    /// Batch latency below which the batch size grows
    #[serde(default = "default_fast_batch_ms")]
    pub fast_batch_ms: f64,

    #[serde(default = "default_min_batch_size")]
    pub min_batch_size: usize,

    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    #[serde(default = "default_min_concurrency")]
    pub min_concurrency: usize,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Queue depth above which concurrency grows
    #[serde(default = "default_high_queue_depth")]
    pub high_queue_depth: u64,

    /// Queue depth below which concurrency shrinks
    #[serde(default = "default_low_queue_depth")]
    pub low_queue_depth: u64,

    /// Interval of the background flush to the metrics sink
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,

    /// Recent alerts retained for operators
    #[serde(default = "default_alert_history")]
    pub alert_history: usize,
}

fn default_sample_capacity() -> usize {
    1_000
}

fn default_initial_batch_size() -> usize {
    100
}

fn default_initial_concurrency() -> usize {
    5
}

fn default_error_rate_threshold() -> f64 {
    0.05
}

fn default_slow_batch_ms() -> f64 {
    1_000.0
}

fn default_fast_batch_ms() -> f64 {
    200.0
}

fn default_min_batch_size() -> usize {
    10
}

fn default_max_batch_size() -> usize {
    500
}

fn default_min_concurrency() -> usize {
    1
}

fn default_max_concurrency() -> usize {
    20
}

fn default_high_queue_depth() -> u64 {
    1_000
}

fn default_low_queue_depth() -> u64 {
    100
}

fn default_flush_interval_secs() -> u64 {
    10
}

fn default_alert_history() -> usize {
    50
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_capacity: default_sample_capacity(),
            initial_batch_size: default_initial_batch_size(),
            initial_concurrency: default_initial_concurrency(),
            error_rate_threshold: default_error_rate_threshold(),
            slow_batch_ms: default_slow_batch_ms(),
            fast_batch_ms: default_fast_batch_ms(),
            min_batch_size: default_min_batch_size(),
            max_batch_size: default_max_batch_size(),
            min_concurrency: default_min_concurrency(),
            max_concurrency: default_max_concurrency(),
            high_queue_depth: default_high_queue_depth(),
            low_queue_depth: default_low_queue_depth(),
            flush_interval_secs: default_flush_interval_secs(),
            alert_history: default_alert_history(),
        }
    }
}

impl MonitorConfig {
    /// Set the starting recommendation.
    pub fn with_initial(mut self, batch_size: usize, concurrency: usize) -> Self {
        self.initial_batch_size = batch_size;
        self.initial_concurrency = concurrency;
        self
    }

    /// Set the flush interval.
    pub fn with_flush_interval_secs(mut self, secs: u64) -> Self {
        self.flush_interval_secs = secs;
        self
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_batch_size == 0 || self.min_batch_size > self.max_batch_size {
            return Err(format!(
                "batch bounds invalid: {}..{}",
                self.min_batch_size, self.max_batch_size
            ));
        }
        if self.min_concurrency == 0 || self.min_concurrency > self.max_concurrency {
            return Err(format!(
                "concurrency bounds invalid: {}..{}",
                self.min_concurrency, self.max_concurrency
            ));
        }
        if !(0.0..=1.0).contains(&self.error_rate_threshold) {
            return Err(format!(
                "error_rate_threshold must be 0.0-1.0, got {}",
                self.error_rate_threshold
            ));
        }
        if self.fast_batch_ms >= self.slow_batch_ms {
            return Err("fast_batch_ms must be below slow_batch_ms".to_string());
        }
        if self.low_queue_depth >= self.high_queue_depth {
            return Err("low_queue_depth must be below high_queue_depth".to_string());
        }
        Ok(())
    }
}
