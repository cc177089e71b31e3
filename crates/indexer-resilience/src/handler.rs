//! Retry decisions.
//!
//! [`RetryHandler::handle_error`] is called once per failed task. It
//! records the failure, consults the class's circuit breaker and retry
//! policy, waits out the backoff delay, and tells the caller whether to
//! requeue the task or give up. Giving up always lands the task in the
//! dead-letter queue.
//!
//! Handling an error never changes breaker state. The caller reports the
//! outcome of the downstream call with [`RetryHandler::record_failure`]
//! after the decision, and asks [`RetryHandler::allow_request`] before
//! the next outbound call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use indexer_types::{Clock, ErrorClass, ErrorRecord, IndexingTask, SystemClock};

use crate::breaker::{BreakerRegistry, CircuitBreakerState};
use crate::classify::TaskFailure;
use crate::config::ResilienceConfig;
use crate::dlq::{DeadLetterEntry, DeadLetterQueue, DeadLetterReason, DeadLetterStore};
use crate::tracker::{ErrorAlert, ErrorTracker};

/// Outcome of handling one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RetryDecision {
    /// Requeue the task; `attempt` is its new retry count
    Retry { attempt: u32, delay: Duration },
    /// The task was dead-lettered
    DeadLetter { reason: DeadLetterReason },
}

impl RetryDecision {
    /// Whether the caller should requeue the task.
    pub fn should_retry(&self) -> bool {
        matches!(self, RetryDecision::Retry { .. })
    }
}

/// Counters exposed by the handler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetryStats {
    pub errors_handled: u64,
    pub retries_scheduled: u64,
    pub dead_lettered: u64,
    pub dead_letter_depth: usize,
}

/// Classified retry, circuit breaking and dead-lettering.
pub struct RetryHandler {
    config: ResilienceConfig,
    clock: Arc<dyn Clock>,
    breakers: BreakerRegistry,
    dlq: DeadLetterQueue,
    tracker: Arc<ErrorTracker>,
    dead_letter_store: Option<Arc<dyn DeadLetterStore>>,
    errors_handled: AtomicU64,
    retries_scheduled: AtomicU64,
    dead_lettered: AtomicU64,
}

impl RetryHandler {
    /// Create a handler using the system clock.
    pub fn new(config: ResilienceConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a handler with an explicit clock.
    pub fn with_clock(config: ResilienceConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            breakers: BreakerRegistry::new(config.breaker.clone(), clock.clone()),
            dlq: DeadLetterQueue::new(config.dead_letter_capacity),
            tracker: Arc::new(ErrorTracker::new(config.tracker.clone(), clock.clone())),
            dead_letter_store: None,
            errors_handled: AtomicU64::new(0),
            retries_scheduled: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
            clock,
            config,
        }
    }

    /// Persist dead-letter entries to a durable store.
    pub fn with_dead_letter_store(mut self, store: Arc<dyn DeadLetterStore>) -> Self {
        self.dead_letter_store = Some(store);
        self
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<ErrorTracker> {
        &self.tracker
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    pub fn dead_letters(&self) -> &DeadLetterQueue {
        &self.dlq
    }

    /// Decide what happens to a failed task.
    ///
    /// On a retry the task's `retry_count` is incremented and the failure
    /// class is stored in its metadata; the caller requeues it as-is.
    pub async fn handle_error(
        &self,
        task: &mut IndexingTask,
        failure: &TaskFailure,
    ) -> RetryDecision {
        self.errors_handled.fetch_add(1, Ordering::Relaxed);
        let record = ErrorRecord::for_task(task, failure.class, &failure.message, self.clock.now());
        self.tracker.track(record.clone()).await;

        if !failure.is_retryable() {
            return self
                .dead_letter(task, record, DeadLetterReason::NonRetryable)
                .await;
        }

        if self.is_refusing(failure.class) {
            return self
                .dead_letter(task, record, DeadLetterReason::CircuitOpen)
                .await;
        }

        let policy = self.config.retry.policy_for(failure.class);
        if task.retry_count >= policy.max_retries {
            return self
                .dead_letter(task, record, DeadLetterReason::RetriesExhausted)
                .await;
        }

        let attempt = task.retry_count + 1;
        let delay = policy.delay(attempt);
        debug!(
            task_id = %task.id,
            error_class = %failure.class,
            attempt,
            max_retries = policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            "Scheduling retry"
        );
        if self.config.retry.wait_before_retry && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        task.retry_count = attempt;
        task.set_last_error_class(failure.class);
        self.retries_scheduled.fetch_add(1, Ordering::Relaxed);
        RetryDecision::Retry { attempt, delay }
    }

    /// Dead-letter a retried task whose breaker refused the call.
    pub async fn short_circuit(&self, task: &IndexingTask, class: ErrorClass) -> RetryDecision {
        let record = ErrorRecord::for_task(
            task,
            class,
            format!("Circuit open for {}", class.service()),
            self.clock.now(),
        );
        self.tracker.track(record.clone()).await;
        self.dead_letter(task, record, DeadLetterReason::CircuitOpen)
            .await
    }

    /// Whether the breaker for a class lets a call through.
    pub fn allow_request(&self, class: ErrorClass) -> bool {
        if !class.is_retryable() {
            return true;
        }
        self.breakers.get(class.service()).allow_request()
    }

    /// Whether the class's breaker is open and still cooling down.
    pub fn is_refusing(&self, class: ErrorClass) -> bool {
        class.is_retryable() && self.breakers.get(class.service()).is_refusing()
    }

    /// Report that an operation guarded by `class`'s breaker succeeded.
    pub fn record_success(&self, class: ErrorClass) {
        if !class.is_retryable() {
            return;
        }
        if self.breakers.get(class.service()).record_success() {
            self.tracker.emit(ErrorAlert::BreakerClosed {
                service: class.service().to_string(),
            });
        }
    }

    /// Report that an operation failed with `class`.
    pub fn record_failure(&self, class: ErrorClass) {
        if !class.is_retryable() {
            return;
        }
        if self.breakers.get(class.service()).record_failure() {
            self.tracker.emit(ErrorAlert::BreakerOpened {
                service: class.service().to_string(),
            });
        }
    }

    /// Snapshots of every breaker.
    pub fn breaker_states(&self) -> Vec<CircuitBreakerState> {
        self.breakers.snapshots()
    }

    /// Drain the dead-letter queue for resubmission.
    ///
    /// Returned tasks have their retry count and retry metadata reset.
    /// Only ever called by an operator.
    pub async fn process_dlq(&self) -> Vec<IndexingTask> {
        let entries = self.dlq.drain();
        let mut tasks = Vec::with_capacity(entries.len());

        for entry in entries {
            let mut task = entry.task;
            task.reset_retries();
            if let Some(store) = &self.dead_letter_store {
                if let Err(e) = store.remove(&task.id).await {
                    warn!(task_id = %task.id, error = %e, "Failed to remove dead-letter entry");
                }
            }
            tasks.push(task);
        }

        info!(count = tasks.len(), "Drained dead-letter queue");
        tasks
    }

    pub fn stats(&self) -> RetryStats {
        RetryStats {
            errors_handled: self.errors_handled.load(Ordering::Relaxed),
            retries_scheduled: self.retries_scheduled.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            dead_letter_depth: self.dlq.len(),
        }
    }

    async fn dead_letter(
        &self,
        task: &IndexingTask,
        record: ErrorRecord,
        reason: DeadLetterReason,
    ) -> RetryDecision {
        warn!(
            task_id = %task.id,
            entity = %task.entity_key(),
            error_class = %record.error_class,
            retry_count = task.retry_count,
            reason = ?reason,
            "Task dead-lettered"
        );

        let entry = DeadLetterEntry {
            task: task.clone(),
            record,
            reason,
        };
        if let Some(store) = &self.dead_letter_store {
            if let Err(e) = store.persist(&entry).await {
                warn!(task_id = %task.id, error = %e, "Failed to persist dead-letter entry");
            }
        }
        if let Some(evicted) = self.dlq.push(entry) {
            warn!(task_id = %evicted.task.id, "Dead-letter queue full, evicted oldest entry");
        }

        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
        RetryDecision::DeadLetter { reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::{BreakerConfig, BreakerState};
    use crate::error::ResilienceError;
    use crate::policy::{RetryConfig, RetryPolicy};
    use async_trait::async_trait;
    use indexer_types::{ManualClock, TaskOperation, LAST_ERROR_CLASS_KEY};
    use parking_lot::Mutex;

    fn handler(config: ResilienceConfig) -> (RetryHandler, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (RetryHandler::with_clock(config, clock.clone()), clock)
    }

    fn task() -> IndexingTask {
        IndexingTask::new("page", "p1", "w1", TaskOperation::Update)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_increments_and_sleeps() {
        let (handler, _) = handler(ResilienceConfig::default());
        let mut task = task();
        let failure = TaskFailure::from_message("ECONNREFUSED");

        let started = tokio::time::Instant::now();
        let decision = handler.handle_error(&mut task, &failure).await;
        let RetryDecision::Retry { attempt, delay } = decision else {
            panic!("expected retry, got {decision:?}");
        };
        assert_eq!(attempt, 1);
        assert_eq!(task.retry_count, 1);
        assert_eq!(task.last_error_class(), Some(ErrorClass::Network));
        assert!(started.elapsed() >= delay);
        assert!(delay >= Duration::from_millis(900) && delay <= Duration::from_millis(1_100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_bounded_then_dead_lettered_once() {
        let (handler, _) = handler(ResilienceConfig::default());
        let mut task = task();
        let failure = TaskFailure::from_message("connect ECONNREFUSED");

        let mut retries = 0;
        loop {
            let decision = handler.handle_error(&mut task, &failure).await;
            if !decision.should_retry() {
                assert_eq!(
                    decision,
                    RetryDecision::DeadLetter {
                        reason: DeadLetterReason::RetriesExhausted
                    }
                );
                break;
            }
            retries += 1;
        }

        assert_eq!(retries, 5);
        assert_eq!(handler.dead_letters().len(), 1);
        assert!(handler.dead_letters().contains(&task.id));
        assert_eq!(handler.stats().retries_scheduled, 5);
    }

    #[tokio::test]
    async fn test_non_retryable_skips_budget() {
        let (handler, _) = handler(ResilienceConfig::default());
        let mut task = task();
        let decision = handler
            .handle_error(&mut task, &TaskFailure::malformed("empty entity id"))
            .await;
        assert_eq!(
            decision,
            RetryDecision::DeadLetter {
                reason: DeadLetterReason::NonRetryable
            }
        );
        assert_eq!(task.retry_count, 0);
        assert!(handler.breaker_states().is_empty());
    }

    #[tokio::test]
    async fn test_open_breaker_dead_letters_without_retry() {
        let config = ResilienceConfig::default()
            .with_breaker(BreakerConfig::default().with_thresholds(2, 1));
        let (handler, _) = handler(config);
        handler.record_failure(ErrorClass::Embedding);
        handler.record_failure(ErrorClass::Embedding);

        let mut task = task();
        let decision = handler
            .handle_error(&mut task, &TaskFailure::from_message("embedding model overloaded"))
            .await;
        assert_eq!(
            decision,
            RetryDecision::DeadLetter {
                reason: DeadLetterReason::CircuitOpen
            }
        );
        assert_eq!(task.retry_count, 0);
    }

    #[tokio::test]
    async fn test_handling_error_never_moves_breaker() {
        let config = ResilienceConfig::default()
            .with_retry(RetryConfig::default().with_wait_before_retry(false))
            .with_breaker(BreakerConfig::default().with_thresholds(1, 1));
        let (handler, clock) = handler(config);
        handler.record_failure(ErrorClass::Network);
        clock.advance_ms(30_000);

        let mut task = task();
        let decision = handler
            .handle_error(&mut task, &TaskFailure::from_message("ECONNRESET"))
            .await;
        assert!(decision.should_retry());
        assert_eq!(handler.breaker_states()[0].state, BreakerState::Open);

        assert!(handler.allow_request(ErrorClass::Network));
        assert_eq!(handler.breaker_states()[0].state, BreakerState::HalfOpen);
    }

    #[tokio::test]
    async fn test_breaker_recovers_through_handler() {
        let config = ResilienceConfig::default()
            .with_breaker(BreakerConfig::default().with_thresholds(1, 2));
        let (handler, clock) = handler(config);

        handler.record_failure(ErrorClass::Database);
        assert!(!handler.allow_request(ErrorClass::Database));
        clock.advance_ms(30_000);
        assert!(handler.allow_request(ErrorClass::Database));

        handler.record_success(ErrorClass::Database);
        handler.record_success(ErrorClass::Database);
        let states = handler.breaker_states();
        assert_eq!(states[0].state, BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_process_dlq_resets_tasks() {
        let config = ResilienceConfig::default().with_retry(
            RetryConfig::default()
                .with_policy(ErrorClass::Default, RetryPolicy::new(0, 0, 0, 1.0, 0.0)),
        );
        let (handler, _) = handler(config);
        let mut task = task();
        task.retry_count = 2;
        task.set_last_error_class(ErrorClass::Default);

        handler
            .handle_error(&mut task, &TaskFailure::from_message("weird"))
            .await;
        assert_eq!(handler.dead_letters().len(), 1);

        let tasks = handler.process_dlq().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, task.id);
        assert_eq!(tasks[0].retry_count, 0);
        assert!(!tasks[0].metadata.contains_key(LAST_ERROR_CLASS_KEY));
        assert!(handler.dead_letters().is_empty());
    }

    #[derive(Default)]
    struct RecordingStore {
        persisted: Mutex<Vec<String>>,
        removed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DeadLetterStore for RecordingStore {
        async fn persist(&self, entry: &DeadLetterEntry) -> Result<(), ResilienceError> {
            self.persisted.lock().push(entry.task.id.clone());
            Ok(())
        }

        async fn remove(&self, task_id: &str) -> Result<(), ResilienceError> {
            self.removed.lock().push(task_id.to_string());
            Err(ResilienceError::DeadLetterStore("read-only".to_string()))
        }
    }

    #[tokio::test]
    async fn test_dead_letter_store_is_best_effort() {
        let store = Arc::new(RecordingStore::default());
        let (handler, _) = handler(ResilienceConfig::default());
        let handler = handler.with_dead_letter_store(store.clone());

        let mut task = task();
        handler
            .handle_error(&mut task, &TaskFailure::unknown_entity_type("comment"))
            .await;
        assert_eq!(*store.persisted.lock(), vec![task.id.clone()]);

        let tasks = handler.process_dlq().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(*store.removed.lock(), vec![task.id.clone()]);
    }

    #[tokio::test]
    async fn test_short_circuit_records_and_dead_letters() {
        let (handler, _) = handler(ResilienceConfig::default());
        let task = task();
        let decision = handler.short_circuit(&task, ErrorClass::RateLimit).await;
        assert!(!decision.should_retry());
        assert_eq!(handler.tracker().len(), 1);
        assert!(handler.dead_letters().contains(&task.id));
    }
}
