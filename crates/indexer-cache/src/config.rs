//! Cache configuration.

use serde::{Deserialize, Serialize};

use crate::rules::{default_rules, InvalidationRule};

/// Configuration for the two-tier cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// L1 capacity in entries
    #[serde(default = "default_l1_size")]
    pub l1_size: usize,

    /// L1 time-to-live in seconds
    #[serde(default = "default_l1_ttl_secs")]
    pub l1_ttl_secs: u64,

    /// L2 capacity in entries
    #[serde(default = "default_l2_size")]
    pub l2_size: usize,

    /// L2 time-to-live in seconds
    #[serde(default = "default_l2_ttl_secs")]
    pub l2_ttl_secs: u64,

    /// L2 hit count at which an entry moves to L1
    #[serde(default = "default_promotion_threshold")]
    pub promotion_threshold: u64,

    /// Keys removed per lock acquisition during invalidation
    #[serde(default = "default_invalidation_batch_size")]
    pub invalidation_batch_size: usize,

    /// Hit rate under which the observer is warned
    #[serde(default = "default_hit_rate_warning")]
    pub hit_rate_warning: f64,

    /// Lookups per hit-rate evaluation window
    #[serde(default = "default_hit_rate_min_samples")]
    pub hit_rate_min_samples: u64,

    /// Invalidation rules
    #[serde(default = "default_rules")]
    pub rules: Vec<InvalidationRule>,
}

fn default_l1_size() -> usize {
    1_000
}

fn default_l1_ttl_secs() -> u64 {
    300
}

fn default_l2_size() -> usize {
    10_000
}

fn default_l2_ttl_secs() -> u64 {
    3_600
}

fn default_promotion_threshold() -> u64 {
    3
}

fn default_invalidation_batch_size() -> usize {
    100
}

fn default_hit_rate_warning() -> f64 {
    0.5
}

fn default_hit_rate_min_samples() -> u64 {
    100
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_size: default_l1_size(),
            l1_ttl_secs: default_l1_ttl_secs(),
            l2_size: default_l2_size(),
            l2_ttl_secs: default_l2_ttl_secs(),
            promotion_threshold: default_promotion_threshold(),
            invalidation_batch_size: default_invalidation_batch_size(),
            hit_rate_warning: default_hit_rate_warning(),
            hit_rate_min_samples: default_hit_rate_min_samples(),
            rules: default_rules(),
        }
    }
}

impl CacheConfig {
    /// Set tier capacities.
    pub fn with_sizes(mut self, l1_size: usize, l2_size: usize) -> Self {
        self.l1_size = l1_size;
        self.l2_size = l2_size;
        self
    }

    /// Set tier TTLs in seconds.
    pub fn with_ttls(mut self, l1_ttl_secs: u64, l2_ttl_secs: u64) -> Self {
        self.l1_ttl_secs = l1_ttl_secs;
        self.l2_ttl_secs = l2_ttl_secs;
        self
    }

    /// Replace the invalidation rules.
    pub fn with_rules(mut self, rules: Vec<InvalidationRule>) -> Self {
        self.rules = rules;
        self
    }

    /// Set the invalidation sub-batch size.
    pub fn with_invalidation_batch_size(mut self, size: usize) -> Self {
        self.invalidation_batch_size = size;
        self
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.l1_size == 0 || self.l2_size == 0 {
            return Err("cache tier sizes must be > 0".to_string());
        }
        if self.invalidation_batch_size == 0 {
            return Err("invalidation_batch_size must be > 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.hit_rate_warning) {
            return Err(format!(
                "hit_rate_warning must be 0.0-1.0, got {}",
                self.hit_rate_warning
            ));
        }
        Ok(())
    }
}
