//! Error tracking and spike detection.
//!
//! Every classified failure lands in a bounded ring buffer and is handed to
//! an optional [`ErrorSink`] on a best-effort basis. A periodic scan groups
//! the recent window by class and raises [`ErrorAlert`]s through an
//! injected [`AlertObserver`].

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use indexer_types::{Clock, ErrorClass, ErrorRecord};

use crate::error::ResilienceError;

/// Error tracker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Ring buffer capacity
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Window examined by each scan
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Per-class count above which a spike alert fires
    #[serde(default = "default_class_threshold")]
    pub class_threshold: usize,

    /// Errors per minute above which a rate alert fires
    #[serde(default = "default_rate_per_minute")]
    pub rate_per_minute: f64,

    /// Interval of the background scan
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
}

fn default_capacity() -> usize {
    1_000
}

fn default_window_secs() -> u64 {
    300
}

fn default_class_threshold() -> usize {
    10
}

fn default_rate_per_minute() -> f64 {
    5.0
}

fn default_scan_interval_secs() -> u64 {
    60
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            window_secs: default_window_secs(),
            class_threshold: default_class_threshold(),
            rate_per_minute: default_rate_per_minute(),
            scan_interval_secs: default_scan_interval_secs(),
        }
    }
}

impl TrackerConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity == 0 {
            return Err("tracker capacity must be > 0".to_string());
        }
        if self.window_secs == 0 || self.scan_interval_secs == 0 {
            return Err("tracker window and scan interval must be > 0".to_string());
        }
        Ok(())
    }
}

/// Operator-visible alert raised by the resilience layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorAlert {
    /// One class exceeded its count threshold in the window
    ClassSpike {
        error_class: ErrorClass,
        count: usize,
        window_secs: u64,
    },
    /// Overall error rate exceeded the per-minute threshold
    HighErrorRate {
        rate_per_minute: f64,
        count: usize,
        window_secs: u64,
    },
    /// A circuit breaker opened
    BreakerOpened { service: String },
    /// A circuit breaker closed again
    BreakerClosed { service: String },
}

/// Receiver of resilience alerts.
pub trait AlertObserver: Send + Sync {
    fn on_alert(&self, alert: &ErrorAlert);
}

/// Durable destination for error records.
#[async_trait]
pub trait ErrorSink: Send + Sync {
    async fn record(&self, record: &ErrorRecord) -> Result<(), ResilienceError>;
}

/// Ring buffer of recent errors.
pub struct ErrorTracker {
    config: TrackerConfig,
    clock: Arc<dyn Clock>,
    ring: Mutex<VecDeque<ErrorRecord>>,
    sink: RwLock<Option<Arc<dyn ErrorSink>>>,
    observer: RwLock<Option<Arc<dyn AlertObserver>>>,
}

impl ErrorTracker {
    /// Create a tracker.
    pub fn new(config: TrackerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            ring: Mutex::new(VecDeque::with_capacity(config.capacity.min(4_096))),
            config,
            clock,
            sink: RwLock::new(None),
            observer: RwLock::new(None),
        }
    }

    /// Set the persistence sink.
    pub fn set_sink(&self, sink: Arc<dyn ErrorSink>) {
        *self.sink.write() = Some(sink);
    }

    /// Set the alert receiver.
    pub fn set_observer(&self, observer: Arc<dyn AlertObserver>) {
        *self.observer.write() = Some(observer);
    }

    /// Record an error. Sink failures are logged and swallowed.
    pub async fn track(&self, record: ErrorRecord) {
        {
            let mut ring = self.ring.lock();
            if ring.len() >= self.config.capacity {
                ring.pop_front();
            }
            ring.push_back(record.clone());
        }

        let sink = self.sink.read().clone();
        if let Some(sink) = sink {
            if let Err(e) = sink.record(&record).await {
                warn!(task_id = %record.task_id, error = %e, "Failed to persist error record");
            }
        }
    }

    /// Most recent records, newest last.
    pub fn recent(&self, limit: usize) -> Vec<ErrorRecord> {
        let ring = self.ring.lock();
        let skip = ring.len().saturating_sub(limit);
        ring.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ring.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.lock().is_empty()
    }

    /// Error counts per class within the scan window.
    pub fn counts_in_window(&self) -> BTreeMap<ErrorClass, usize> {
        let cutoff = self.window_cutoff_ms();
        let mut counts = BTreeMap::new();
        for record in self.ring.lock().iter() {
            if record.timestamp.timestamp_millis() >= cutoff {
                *counts.entry(record.error_class).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Evaluate the window and emit alerts to the observer.
    pub fn scan(&self) -> Vec<ErrorAlert> {
        let counts = self.counts_in_window();
        let window_secs = self.config.window_secs;
        let mut alerts = Vec::new();

        for (class, count) in &counts {
            if *count > self.config.class_threshold {
                alerts.push(ErrorAlert::ClassSpike {
                    error_class: *class,
                    count: *count,
                    window_secs,
                });
            }
        }

        let total: usize = counts.values().sum();
        let minutes = window_secs as f64 / 60.0;
        let rate = if minutes > 0.0 { total as f64 / minutes } else { 0.0 };
        if rate > self.config.rate_per_minute {
            alerts.push(ErrorAlert::HighErrorRate {
                rate_per_minute: rate,
                count: total,
                window_secs,
            });
        }

        debug!(errors = total, alerts = alerts.len(), "Error scan complete");
        for alert in &alerts {
            self.emit(alert.clone());
        }
        alerts
    }

    /// Forward an alert to the observer.
    pub fn emit(&self, alert: ErrorAlert) {
        warn!(alert = ?alert, "Resilience alert");
        let observer = self.observer.read().clone();
        if let Some(observer) = observer {
            observer.on_alert(&alert);
        }
    }

    /// Run `scan` on the configured interval until cancelled.
    pub fn spawn_alert_scan(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let period = Duration::from_secs(self.config.scan_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // first tick completes immediately
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Error scan loop stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        self.scan();
                    }
                }
            }
        })
    }

    fn window_cutoff_ms(&self) -> i64 {
        let window_ms = i64::try_from(self.config.window_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        self.clock.now_ms().saturating_sub(window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexer_types::{IndexingTask, ManualClock, TaskOperation};

    struct Collect(Mutex<Vec<ErrorAlert>>);

    impl AlertObserver for Collect {
        fn on_alert(&self, alert: &ErrorAlert) {
            self.0.lock().push(alert.clone());
        }
    }

    struct FailingSink;

    #[async_trait]
    impl ErrorSink for FailingSink {
        async fn record(&self, _record: &ErrorRecord) -> Result<(), ResilienceError> {
            Err(ResilienceError::ErrorSink("unavailable".to_string()))
        }
    }

    fn record(clock: &ManualClock, class: ErrorClass) -> ErrorRecord {
        let task = IndexingTask::new("page", "p1", "w1", TaskOperation::Update);
        ErrorRecord::for_task(&task, class, "boom", clock.now())
    }

    fn tracker(config: TrackerConfig) -> (Arc<ErrorTracker>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (Arc::new(ErrorTracker::new(config, clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_ring_buffer_is_bounded() {
        let config = TrackerConfig {
            capacity: 3,
            ..Default::default()
        };
        let (tracker, clock) = tracker(config);
        for _ in 0..5 {
            tracker.track(record(&clock, ErrorClass::Network)).await;
        }
        assert_eq!(tracker.len(), 3);
        assert_eq!(tracker.recent(2).len(), 2);
    }

    #[tokio::test]
    async fn test_sink_failure_is_swallowed() {
        let (tracker, clock) = tracker(TrackerConfig::default());
        tracker.set_sink(Arc::new(FailingSink));
        tracker.track(record(&clock, ErrorClass::Database)).await;
        assert_eq!(tracker.len(), 1);
    }

    #[tokio::test]
    async fn test_class_spike_alert() {
        let (tracker, clock) = tracker(TrackerConfig::default());
        let observer = Arc::new(Collect(Mutex::new(Vec::new())));
        tracker.set_observer(observer.clone());

        for _ in 0..11 {
            tracker.track(record(&clock, ErrorClass::RateLimit)).await;
        }
        let alerts = tracker.scan();
        assert!(alerts.contains(&ErrorAlert::ClassSpike {
            error_class: ErrorClass::RateLimit,
            count: 11,
            window_secs: 300,
        }));
        assert_eq!(observer.0.lock().len(), alerts.len());
    }

    #[tokio::test]
    async fn test_rate_alert_without_class_spike() {
        let (tracker, clock) = tracker(TrackerConfig::default());
        // 26 errors over a 5 minute window is 5.2/min, spread so no class exceeds 10
        let classes = [
            ErrorClass::Network,
            ErrorClass::Database,
            ErrorClass::Embedding,
        ];
        for i in 0..26 {
            tracker.track(record(&clock, classes[i % 3])).await;
        }
        let alerts = tracker.scan();
        assert_eq!(alerts.len(), 1);
        assert!(matches!(alerts[0], ErrorAlert::HighErrorRate { count: 26, .. }));
    }

    #[tokio::test]
    async fn test_old_errors_leave_window() {
        let (tracker, clock) = tracker(TrackerConfig::default());
        for _ in 0..20 {
            tracker.track(record(&clock, ErrorClass::Network)).await;
        }
        clock.advance_ms(301_000);
        assert!(tracker.counts_in_window().is_empty());
        assert!(tracker.scan().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_alert_scan_loop_runs_until_cancelled() {
        let (tracker, clock) = tracker(TrackerConfig::default());
        let observer = Arc::new(Collect(Mutex::new(Vec::new())));
        tracker.set_observer(observer.clone());
        for _ in 0..12 {
            tracker.track(record(&clock, ErrorClass::Network)).await;
        }

        let cancel = CancellationToken::new();
        let handle = tracker.clone().spawn_alert_scan(cancel.clone());
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(!observer.0.lock().is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }
}
