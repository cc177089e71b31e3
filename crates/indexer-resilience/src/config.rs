//! Aggregate configuration for the retry handler.

use serde::{Deserialize, Serialize};

use crate::breaker::BreakerConfig;
use crate::policy::RetryConfig;
use crate::tracker::TrackerConfig;

/// Configuration for [`crate::RetryHandler`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub breaker: BreakerConfig,

    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Dead-letter queue capacity
    #[serde(default = "default_dead_letter_capacity")]
    pub dead_letter_capacity: usize,
}

fn default_dead_letter_capacity() -> usize {
    500
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            breaker: BreakerConfig::default(),
            tracker: TrackerConfig::default(),
            dead_letter_capacity: default_dead_letter_capacity(),
        }
    }
}

impl ResilienceConfig {
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_tracker(mut self, tracker: TrackerConfig) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_dead_letter_capacity(mut self, capacity: usize) -> Self {
        self.dead_letter_capacity = capacity;
        self
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.retry.validate()?;
        self.breaker.validate()?;
        self.tracker.validate()?;
        if self.dead_letter_capacity == 0 {
            return Err("dead_letter_capacity must be > 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ResilienceConfig::default();
        assert_eq!(config.dead_letter_capacity, 500);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.tracker.capacity, 1_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_reports_section() {
        let config = ResilienceConfig::default().with_dead_letter_capacity(0);
        assert!(config.validate().is_err());

        let config = ResilienceConfig::default()
            .with_breaker(BreakerConfig::default().with_thresholds(0, 3));
        assert!(config.validate().unwrap_err().contains("breaker"));
    }
}
