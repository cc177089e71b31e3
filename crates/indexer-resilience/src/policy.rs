//! Retry policies.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use indexer_types::ErrorClass;

/// Backoff parameters for one error class.
///
/// The delay for attempt `n` (1-based) is
/// `min(initial_delay * multiplier^(n-1), max_delay)` plus a jitter term of
/// `delay * jitter_factor * U(-0.5, 0.5)`, clamped to `[0, max_delay]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries allowed before dead-lettering
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay_ms: u64,
    /// Upper bound on any delay
    pub max_delay_ms: u64,
    /// Growth factor per attempt
    pub backoff_multiplier: f64,
    /// Relative width of the jitter band
    pub jitter_factor: f64,
}

impl RetryPolicy {
    /// Build a policy.
    pub fn new(
        max_retries: u32,
        initial_delay_ms: u64,
        max_delay_ms: u64,
        backoff_multiplier: f64,
        jitter_factor: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_delay_ms,
            max_delay_ms,
            backoff_multiplier,
            jitter_factor,
        }
    }

    /// Default policy for network failures.
    pub fn network() -> Self {
        Self::new(5, 1_000, 60_000, 2.0, 0.2)
    }

    /// Default policy for rate limiting.
    pub fn rate_limit() -> Self {
        Self::new(3, 5_000, 120_000, 3.0, 0.1)
    }

    /// Default policy for database failures.
    pub fn database() -> Self {
        Self::new(3, 2_000, 30_000, 2.0, 0.3)
    }

    /// Default policy for embedding failures.
    pub fn embedding() -> Self {
        Self::new(2, 3_000, 15_000, 2.0, 0.2)
    }

    /// Default policy for unclassified failures.
    pub fn fallback() -> Self {
        Self::new(2, 1_000, 10_000, 2.0, 0.2)
    }

    /// Delay for attempt `n` without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms(attempt) as u64)
    }

    /// Delay for attempt `n` with random jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let sample = rand::thread_rng().gen_range(-0.5..0.5);
        self.delay_with_sample(attempt, sample)
    }

    /// Delay for attempt `n` with a fixed jitter sample in `[-0.5, 0.5)`.
    pub fn delay_with_sample(&self, attempt: u32, sample: f64) -> Duration {
        let base = self.base_delay_ms(attempt);
        let jittered = base + base * self.jitter_factor * sample;
        let clamped = jittered.clamp(0.0, self.max_delay_ms as f64);
        Duration::from_millis(clamped.round() as u64)
    }

    /// Validate the parameters.
    pub fn validate(&self) -> Result<(), String> {
        if self.backoff_multiplier < 1.0 {
            return Err(format!(
                "backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(format!(
                "jitter_factor must be 0.0-1.0, got {}",
                self.jitter_factor
            ));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err("initial_delay_ms must not exceed max_delay_ms".to_string());
        }
        Ok(())
    }

    fn base_delay_ms(&self, attempt: u32) -> f64 {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let raw = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        raw.min(self.max_delay_ms as f64)
    }
}

/// Retry policies for every retryable class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "RetryPolicy::network")]
    pub network: RetryPolicy,

    #[serde(default = "RetryPolicy::rate_limit")]
    pub rate_limit: RetryPolicy,

    #[serde(default = "RetryPolicy::database")]
    pub database: RetryPolicy,

    #[serde(default = "RetryPolicy::embedding")]
    pub embedding: RetryPolicy,

    #[serde(default = "RetryPolicy::fallback")]
    pub default: RetryPolicy,

    /// Sleep for the backoff delay before returning a retry decision.
    /// Offline tooling turns this off and lets the task store schedule.
    #[serde(default = "default_wait_before_retry")]
    pub wait_before_retry: bool,
}

fn default_wait_before_retry() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            network: RetryPolicy::network(),
            rate_limit: RetryPolicy::rate_limit(),
            database: RetryPolicy::database(),
            embedding: RetryPolicy::embedding(),
            default: RetryPolicy::fallback(),
            wait_before_retry: default_wait_before_retry(),
        }
    }
}

impl RetryConfig {
    /// Policy applied to a class. Non-retryable classes never reach a
    /// policy; they map to the fallback.
    pub fn policy_for(&self, class: ErrorClass) -> &RetryPolicy {
        match class {
            ErrorClass::Network => &self.network,
            ErrorClass::RateLimit => &self.rate_limit,
            ErrorClass::Database => &self.database,
            ErrorClass::Embedding => &self.embedding,
            _ => &self.default,
        }
    }

    /// Replace the policy of one class.
    pub fn with_policy(mut self, class: ErrorClass, policy: RetryPolicy) -> Self {
        match class {
            ErrorClass::Network => self.network = policy,
            ErrorClass::RateLimit => self.rate_limit = policy,
            ErrorClass::Database => self.database = policy,
            ErrorClass::Embedding => self.embedding = policy,
            _ => self.default = policy,
        }
        self
    }

    /// Enable or disable the backoff sleep.
    pub fn with_wait_before_retry(mut self, wait: bool) -> Self {
        self.wait_before_retry = wait;
        self
    }

    /// Validate every policy.
    pub fn validate(&self) -> Result<(), String> {
        for class in ErrorClass::RETRYABLE {
            self.policy_for(class)
                .validate()
                .map_err(|e| format!("retry.{class}: {e}"))?;
        }
        Ok(())
    }
}
