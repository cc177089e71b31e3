//! Processor configuration.

use serde::{Deserialize, Serialize};

/// Configuration for [`crate::BatchProcessor`].
///
/// `batch_size` and `max_concurrent` seed the monitor's first
/// recommendation; after that the monitor owns both values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Tasks claimed per cycle before any tuning
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Partitions processed concurrently before any tuning
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Sleep between polls when the queue is empty
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
}

fn default_batch_size() -> usize {
    100
}

fn default_max_concurrent() -> usize {
    5
}

fn default_idle_poll_ms() -> u64 {
    1_000
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_concurrent: default_max_concurrent(),
            idle_poll_ms: default_idle_poll_ms(),
        }
    }
}

impl ProcessorConfig {
    /// Set the initial batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the initial concurrency.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Set the idle poll interval.
    pub fn with_idle_poll_ms(mut self, ms: u64) -> Self {
        self.idle_poll_ms = ms;
        self
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size must be > 0".to_string());
        }
        if self.max_concurrent == 0 {
            return Err("max_concurrent must be > 0".to_string());
        }
        Ok(())
    }
}
