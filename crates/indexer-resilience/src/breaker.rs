//! Circuit breakers.
//!
//! One breaker per downstream service. State lives in atomics and every
//! transition is a compare-and-swap, so concurrent workers never need a
//! lock to consult or update a breaker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use indexer_types::Clock;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum BreakerState {
    /// Calls flow normally
    Closed = 0,
    /// Calls are short-circuited
    Open = 1,
    /// Probing after the cool-down
    HalfOpen = 2,
}

impl BreakerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => BreakerState::Open,
            2 => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }

    /// Wire name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// Breaker thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that open a closed breaker
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Consecutive half-open successes that close the breaker
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// Time an open breaker waits before letting a trial call through
    #[serde(default = "default_cool_down_secs")]
    pub cool_down_secs: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    3
}

fn default_cool_down_secs() -> u64 {
    30
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            cool_down_secs: default_cool_down_secs(),
        }
    }
}

impl BreakerConfig {
    /// Set both thresholds.
    pub fn with_thresholds(mut self, failure: u32, success: u32) -> Self {
        self.failure_threshold = failure;
        self.success_threshold = success;
        self
    }

    /// Set the cool-down.
    pub fn with_cool_down_secs(mut self, secs: u64) -> Self {
        self.cool_down_secs = secs;
        self
    }

    /// Validate thresholds.
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 || self.success_threshold == 0 {
            return Err("breaker thresholds must be > 0".to_string());
        }
        Ok(())
    }

    fn cool_down_ms(&self) -> i64 {
        i64::try_from(self.cool_down_secs.saturating_mul(1000)).unwrap_or(i64::MAX)
    }
}

/// Observable snapshot of one breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub service: String,
    pub state: BreakerState,
    pub failures: u32,
    pub successes: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_state_change_at: DateTime<Utc>,
}

/// Lock-free circuit breaker.
pub struct CircuitBreaker {
    service: String,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    state: AtomicU8,
    failures: AtomicU32,
    successes: AtomicU32,
    /// 0 means no failure recorded yet
    last_failure_ms: AtomicI64,
    last_state_change_ms: AtomicI64,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(service: impl Into<String>, config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_ms();
        Self {
            service: service.into(),
            config,
            clock,
            state: AtomicU8::new(BreakerState::Closed as u8),
            failures: AtomicU32::new(0),
            successes: AtomicU32::new(0),
            last_failure_ms: AtomicI64::new(0),
            last_state_change_ms: AtomicI64::new(now),
        }
    }

    /// Service this breaker guards.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Current state.
    pub fn state(&self) -> BreakerState {
        BreakerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Whether the breaker is open with its cool-down still running.
    ///
    /// Read-only; only [`allow_request`](Self::allow_request) moves an open
    /// breaker to half-open.
    pub fn is_refusing(&self) -> bool {
        self.state() == BreakerState::Open && !self.cool_down_elapsed()
    }

    /// Whether a call may proceed.
    ///
    /// An open breaker whose cool-down has elapsed moves to half-open and
    /// lets the call through.
    pub fn allow_request(&self) -> bool {
        match self.state() {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                if !self.cool_down_elapsed() {
                    return false;
                }
                if self.transition(BreakerState::Open, BreakerState::HalfOpen) {
                    self.successes.store(0, Ordering::SeqCst);
                }
                // Another caller may have won the race; only Open blocks.
                self.state() != BreakerState::Open
            }
        }
    }

    fn cool_down_elapsed(&self) -> bool {
        let changed = self.last_state_change_ms.load(Ordering::SeqCst);
        self.clock.now_ms() - changed >= self.config.cool_down_ms()
    }

    /// Record a successful call. Returns true if this closed the breaker.
    pub fn record_success(&self) -> bool {
        match self.state() {
            BreakerState::Closed => {
                self.failures.store(0, Ordering::SeqCst);
                false
            }
            BreakerState::HalfOpen => {
                let successes = self.successes.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.config.success_threshold
                    && self.transition(BreakerState::HalfOpen, BreakerState::Closed)
                {
                    self.failures.store(0, Ordering::SeqCst);
                    self.successes.store(0, Ordering::SeqCst);
                    return true;
                }
                false
            }
            BreakerState::Open => false,
        }
    }

    /// Record a failed call. Returns true if this opened the breaker.
    pub fn record_failure(&self) -> bool {
        self.last_failure_ms
            .store(self.clock.now_ms(), Ordering::SeqCst);

        match self.state() {
            BreakerState::Closed => {
                let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
                failures >= self.config.failure_threshold
                    && self.transition(BreakerState::Closed, BreakerState::Open)
            }
            BreakerState::HalfOpen => {
                self.failures.fetch_add(1, Ordering::SeqCst);
                if self.transition(BreakerState::HalfOpen, BreakerState::Open) {
                    self.successes.store(0, Ordering::SeqCst);
                    return true;
                }
                false
            }
            BreakerState::Open => {
                self.failures.fetch_add(1, Ordering::SeqCst);
                false
            }
        }
    }

    /// Point-in-time view of the breaker.
    pub fn snapshot(&self) -> CircuitBreakerState {
        let last_failure = self.last_failure_ms.load(Ordering::SeqCst);
        CircuitBreakerState {
            service: self.service.clone(),
            state: self.state(),
            failures: self.failures.load(Ordering::SeqCst),
            successes: self.successes.load(Ordering::SeqCst),
            last_failure_at: (last_failure != 0)
                .then(|| Utc.timestamp_millis_opt(last_failure).single())
                .flatten(),
            last_state_change_at: Utc
                .timestamp_millis_opt(self.last_state_change_ms.load(Ordering::SeqCst))
                .single()
                .unwrap_or_else(Utc::now),
        }
    }

    fn transition(&self, from: BreakerState, to: BreakerState) -> bool {
        let swapped = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if swapped {
            self.last_state_change_ms
                .store(self.clock.now_ms(), Ordering::SeqCst);
            if to == BreakerState::Open {
                warn!(
                    service = %self.service,
                    from = from.as_str(),
                    failures = self.failures.load(Ordering::SeqCst),
                    "Circuit breaker opened"
                );
            } else {
                info!(
                    service = %self.service,
                    from = from.as_str(),
                    to = to.as_str(),
                    "Circuit breaker state change"
                );
            }
        }
        swapped
    }
}

/// Breakers keyed by service, created on first use.
pub struct BreakerRegistry {
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    /// Create an empty registry.
    pub fn new(config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Breaker for a service, creating it closed if needed.
    pub fn get(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(service) {
            return breaker.clone();
        }
        self.breakers
            .write()
            .entry(service.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    service,
                    self.config.clone(),
                    self.clock.clone(),
                ))
            })
            .clone()
    }

    /// Snapshots of every known breaker, sorted by service.
    pub fn snapshots(&self) -> Vec<CircuitBreakerState> {
        let mut states: Vec<CircuitBreakerState> =
            self.breakers.read().values().map(|b| b.snapshot()).collect();
        states.sort_by(|a, b| a.service.cmp(&b.service));
        states
    }

    /// Services whose breaker is currently open.
    pub fn open_services(&self) -> Vec<String> {
        self.snapshots()
            .into_iter()
            .filter(|s| s.state == BreakerState::Open)
            .map(|s| s.service)
            .collect()
    }
}
