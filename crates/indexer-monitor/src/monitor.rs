//! Performance monitor.
//!
//! Collects operation and batch metrics, derives the next batch size and
//! concurrency, and keeps the operator-visible alert feed. The processor
//! reads [`PerformanceMonitor::recommended_config`] at the start of each
//! cycle; nothing here reaches back into the processor.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use indexer_cache::{CacheObserver, CacheStats};
use indexer_resilience::{AlertObserver, ErrorAlert};
use indexer_types::ErrorClass;

use crate::config::MonitorConfig;
use crate::error::MonitorError;
use crate::samples::RollingSamples;
use crate::sink::{MetricsSink, PerformanceSnapshot};
use crate::tuner::{tune_batch, tune_concurrency, RecommendedConfig, TuningAction};

/// Signal carried by a [`MonitorAlert`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertSignal {
    /// Cache hit rate dropped below its threshold
    LowCacheHitRate { hit_rate: f64, lookups: u64 },
    /// Raised by the resilience layer
    Resilience { alert: ErrorAlert },
}

/// An alert with the time it was raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorAlert {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub raised_at: DateTime<Utc>,
    pub signal: AlertSignal,
}

/// Handle returned by [`PerformanceMonitor::record_operation_start`].
#[derive(Debug)]
pub struct OperationToken {
    entity_type: String,
    started: Instant,
}

impl OperationToken {
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

struct MonitorState {
    latency: RollingSamples,
    batch_sizes: RollingSamples,
    batch_latency: RollingSamples,
    by_entity_type: HashMap<String, RollingSamples>,
    error_counts: BTreeMap<ErrorClass, u64>,
    /// true = failure
    outcomes: VecDeque<bool>,
    outcome_failures: usize,
    queue_depth: u64,
    recommended: RecommendedConfig,
}

impl MonitorState {
    fn error_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            0.0
        } else {
            self.outcome_failures as f64 / self.outcomes.len() as f64
        }
    }
}

/// Rolling metrics plus the auto-tuner.
pub struct PerformanceMonitor {
    config: MonitorConfig,
    state: Mutex<MonitorState>,
    alerts: Mutex<VecDeque<MonitorAlert>>,
    sink: RwLock<Option<Arc<dyn MetricsSink>>>,
    operations: AtomicU64,
    in_flight: AtomicU64,
    batches: AtomicU64,
}

impl PerformanceMonitor {
    /// Create a monitor.
    pub fn new(config: MonitorConfig) -> Self {
        let capacity = config.sample_capacity;
        Self {
            state: Mutex::new(MonitorState {
                latency: RollingSamples::new(capacity),
                batch_sizes: RollingSamples::new(capacity),
                batch_latency: RollingSamples::new(capacity),
                by_entity_type: HashMap::new(),
                error_counts: BTreeMap::new(),
                outcomes: VecDeque::new(),
                outcome_failures: 0,
                queue_depth: 0,
                recommended: RecommendedConfig::initial(&config),
            }),
            alerts: Mutex::new(VecDeque::new()),
            sink: RwLock::new(None),
            operations: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            batches: AtomicU64::new(0),
            config,
        }
    }

    /// Persist snapshots to a metrics sink.
    pub fn set_sink(&self, sink: Arc<dyn MetricsSink>) {
        *self.sink.write() = Some(sink);
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Mark the start of an operation.
    pub fn record_operation_start(&self, entity_type: &str) -> OperationToken {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        OperationToken {
            entity_type: entity_type.to_string(),
            started: Instant::now(),
        }
    }

    /// Mark the end of an operation started with `record_operation_start`.
    /// Returns the measured latency.
    pub fn record_operation_complete(
        &self,
        token: OperationToken,
        error: Option<ErrorClass>,
    ) -> Duration {
        let _ = self
            .in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        let latency = token.elapsed();
        self.record_operation(&token.entity_type, latency, error);
        latency
    }

    /// Record a completed operation with a known latency.
    pub fn record_operation(&self, entity_type: &str, latency: Duration, error: Option<ErrorClass>) {
        self.operations.fetch_add(1, Ordering::Relaxed);
        let latency_ms = latency.as_secs_f64() * 1_000.0;
        let capacity = self.config.sample_capacity;

        let mut state = self.state.lock();
        state.latency.push(latency_ms);
        state
            .by_entity_type
            .entry(entity_type.to_string())
            .or_insert_with(|| RollingSamples::new(capacity))
            .push(latency_ms);

        let failed = error.is_some();
        if let Some(class) = error {
            *state.error_counts.entry(class).or_insert(0) += 1;
        }
        if state.outcomes.len() >= capacity.max(1) {
            if let Some(true) = state.outcomes.pop_front() {
                state.outcome_failures -= 1;
            }
        }
        state.outcomes.push_back(failed);
        if failed {
            state.outcome_failures += 1;
        }
    }

    /// Record a processed batch and re-evaluate the batch rules.
    ///
    /// `avg_latency` is the mean latency of the batch's tasks.
    pub fn record_batch_processed(
        &self,
        batch_size: usize,
        avg_latency: Duration,
        failed: usize,
    ) -> RecommendedConfig {
        self.batches.fetch_add(1, Ordering::Relaxed);
        let latency_ms = avg_latency.as_secs_f64() * 1_000.0;

        let mut state = self.state.lock();
        state.batch_sizes.push(batch_size as f64);
        state.batch_latency.push(latency_ms);

        let error_rate = state.error_rate();
        let before = state.recommended;
        let (after, action) = tune_batch(before, error_rate, latency_ms, &self.config);
        state.recommended = after;
        drop(state);

        log_tuning(action, before, after, error_rate);
        debug!(
            batch_size,
            failed,
            latency_ms,
            error_rate,
            "Batch recorded"
        );
        after
    }

    /// Record the task queue depth and re-evaluate the concurrency rule.
    ///
    /// Skipped while the error rate is above threshold; the error rule owns
    /// concurrency in that case.
    pub fn update_queue_depth(&self, depth: u64) -> RecommendedConfig {
        let mut state = self.state.lock();
        state.queue_depth = depth;

        let error_rate = state.error_rate();
        if error_rate > self.config.error_rate_threshold {
            return state.recommended;
        }

        let before = state.recommended;
        let (after, action) = tune_concurrency(before, depth, &self.config);
        state.recommended = after;
        drop(state);

        log_tuning(action, before, after, error_rate);
        after
    }

    /// Latest recommendation.
    pub fn recommended_config(&self) -> RecommendedConfig {
        self.state.lock().recommended
    }

    /// Failure share of the rolling outcome window.
    pub fn error_rate(&self) -> f64 {
        self.state.lock().error_rate()
    }

    /// Point-in-time metrics.
    pub fn snapshot(&self) -> PerformanceSnapshot {
        let state = self.state.lock();
        PerformanceSnapshot {
            taken_at: Utc::now(),
            operations: self.operations.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            latency_ms: state.latency.snapshot(),
            batch_size: state.batch_sizes.snapshot(),
            batch_latency_ms: state.batch_latency.snapshot(),
            latency_by_entity_type: state
                .by_entity_type
                .iter()
                .map(|(k, v)| (k.clone(), v.snapshot()))
                .collect(),
            error_counts: state
                .error_counts
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), *v))
                .collect(),
            error_rate: state.error_rate(),
            queue_depth: state.queue_depth,
            recommended: state.recommended,
        }
    }

    /// Recent alerts, oldest first.
    pub fn recent_alerts(&self) -> Vec<MonitorAlert> {
        self.alerts.lock().iter().cloned().collect()
    }

    /// Persist a snapshot to the sink, if one is set.
    pub async fn flush(&self) -> Result<(), MonitorError> {
        let sink = self.sink.read().clone();
        let Some(sink) = sink else {
            return Ok(());
        };
        let snapshot = self.snapshot();
        sink.persist_snapshot(&snapshot).await?;
        debug!(operations = snapshot.operations, "Flushed metrics snapshot");
        Ok(())
    }

    /// Flush on the configured interval until cancelled. Failures are
    /// logged and collection continues.
    pub fn spawn_flush_loop(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let period = Duration::from_secs(self.config.flush_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        if let Err(e) = self.flush().await {
                            warn!(error = %e, "Final metrics flush failed");
                        }
                        info!("Metrics flush loop stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = self.flush().await {
                            warn!(error = %e, "Metrics flush failed");
                        }
                    }
                }
            }
        })
    }

    fn push_alert(&self, signal: AlertSignal) {
        let mut alerts = self.alerts.lock();
        if alerts.len() >= self.config.alert_history.max(1) {
            alerts.pop_front();
        }
        alerts.push_back(MonitorAlert {
            raised_at: Utc::now(),
            signal,
        });
    }
}

impl CacheObserver for PerformanceMonitor {
    fn on_low_hit_rate(&self, stats: &CacheStats) {
        self.push_alert(AlertSignal::LowCacheHitRate {
            hit_rate: stats.hit_rate,
            lookups: stats.hits + stats.misses,
        });
    }
}

impl AlertObserver for PerformanceMonitor {
    fn on_alert(&self, alert: &ErrorAlert) {
        self.push_alert(AlertSignal::Resilience {
            alert: alert.clone(),
        });
    }
}

fn log_tuning(
    action: TuningAction,
    before: RecommendedConfig,
    after: RecommendedConfig,
    error_rate: f64,
) {
    if before == after {
        return;
    }
    info!(
        action = ?action,
        batch_size = after.batch_size,
        concurrency = after.concurrency,
        prev_batch_size = before.batch_size,
        prev_concurrency = before.concurrency,
        error_rate,
        "Auto-tuner adjusted recommendation"
    );
}
