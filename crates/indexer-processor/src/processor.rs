//! Batch task processor.
//!
//! One cycle claims a batch sized by the monitor, partitions it by entity
//! type and runs the partitions through a bounded pool. Inside a partition
//! tasks keep their claim order: consecutive inserts/updates are merged
//! into a single bulk embedding call, and each delete runs on its own
//! between those groups. A group never holds two tasks for one entity.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use indexer_cache::{CacheConfig, TieredCache};
use indexer_detect::{ChangeDetector, ChangeSet, DetectorConfig, InMemorySnapshotStore};
use indexer_monitor::{MonitorConfig, OperationToken, PerformanceMonitor};
use indexer_resilience::{
    DeadLetterReason, ResilienceConfig, RetryDecision, RetryHandler, TaskFailure,
};
use indexer_types::{
    ContentChunk, EntityType, ErrorClass, IndexingTask, TaskOperation, TaskResult, TaskStatus,
};

use crate::config::ProcessorConfig;
use crate::error::ProcessorError;
use crate::summary::BatchSummary;
use crate::traits::{ContentStore, EmbeddingBackend, TaskStore};

/// Content at least this large is diffed on the blocking pool.
const BLOCKING_DETECT_BYTES: usize = 64 * 1024;

/// A task that has started processing.
struct InFlight {
    task: IndexingTask,
    token: OperationToken,
}

/// Concurrency-bounded processor of indexing tasks.
pub struct BatchProcessor {
    config: ProcessorConfig,
    task_store: Arc<dyn TaskStore>,
    content_store: Arc<dyn ContentStore>,
    backend: Arc<dyn EmbeddingBackend>,
    detector: Arc<ChangeDetector>,
    cache: Arc<TieredCache>,
    retry: Arc<RetryHandler>,
    monitor: Arc<PerformanceMonitor>,
}

impl BatchProcessor {
    /// Create a processor with default components.
    ///
    /// The detector keeps snapshots in memory; use the `with_*` setters to
    /// share components with the rest of the process.
    pub fn new(
        config: ProcessorConfig,
        task_store: Arc<dyn TaskStore>,
        content_store: Arc<dyn ContentStore>,
        backend: Arc<dyn EmbeddingBackend>,
    ) -> Self {
        let monitor_config =
            MonitorConfig::default().with_initial(config.batch_size, config.max_concurrent);
        Self {
            detector: Arc::new(ChangeDetector::new(
                Arc::new(InMemorySnapshotStore::new()),
                DetectorConfig::default(),
            )),
            cache: Arc::new(TieredCache::new(CacheConfig::default())),
            retry: Arc::new(RetryHandler::new(ResilienceConfig::default())),
            monitor: Arc::new(PerformanceMonitor::new(monitor_config)),
            config,
            task_store,
            content_store,
            backend,
        }
    }

    pub fn with_detector(mut self, detector: Arc<ChangeDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_cache(mut self, cache: Arc<TieredCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_retry_handler(mut self, retry: Arc<RetryHandler>) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<PerformanceMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn detector(&self) -> &Arc<ChangeDetector> {
        &self.detector
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    pub fn retry_handler(&self) -> &Arc<RetryHandler> {
        &self.retry
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    /// Claim and process one batch.
    ///
    /// Returns one result per claimed task; an empty vector means the
    /// queue was empty. Only a failed claim is an error.
    pub async fn process_batch(&self, worker_id: &str) -> Result<Vec<TaskResult>, ProcessorError> {
        let recommended = self.monitor.recommended_config();
        let tasks = self
            .task_store
            .claim_batch(recommended.batch_size, worker_id)
            .await?;

        if tasks.is_empty() {
            debug!(worker_id, "No tasks to claim");
            self.report_queue_depth().await;
            return Ok(Vec::new());
        }

        let claimed = tasks.len();
        let partitions = partition_by_entity_type(tasks);
        info!(
            worker_id,
            claimed,
            partitions = partitions.len(),
            batch_size = recommended.batch_size,
            concurrency = recommended.concurrency,
            "Processing batch"
        );

        let per_partition: Vec<Vec<TaskResult>> = stream::iter(partitions)
            .map(|(entity_type, tasks)| self.process_partition(entity_type, tasks))
            .buffer_unordered(recommended.concurrency.max(1))
            .collect()
            .await;
        let results: Vec<TaskResult> = per_partition.into_iter().flatten().collect();

        let failed = results.iter().filter(|r| !r.status.is_success()).count();
        let total_ms: u64 = results.iter().map(|r| r.duration_ms).sum();
        let avg_latency = Duration::from_millis(total_ms / results.len().max(1) as u64);
        self.monitor
            .record_batch_processed(claimed, avg_latency, failed);
        self.report_queue_depth().await;

        info!(
            worker_id,
            claimed,
            failed,
            avg_latency_ms = avg_latency.as_millis() as u64,
            "Batch complete"
        );
        Ok(results)
    }

    /// Process batches until the queue is empty or `max_cycles` is reached.
    pub async fn run_until_idle(
        &self,
        worker_id: &str,
        max_cycles: usize,
    ) -> Result<BatchSummary, ProcessorError> {
        let mut summary = BatchSummary::default();
        for _ in 0..max_cycles {
            let results = self.process_batch(worker_id).await?;
            if results.is_empty() {
                break;
            }
            summary.add_cycle(&results);
        }
        Ok(summary)
    }

    /// Process batches until cancelled, polling while the queue is empty.
    ///
    /// Cancellation stops new cycles; a cycle in progress runs to the end.
    pub async fn run(&self, worker_id: &str, cancel: CancellationToken) -> BatchSummary {
        let idle = Duration::from_millis(self.config.idle_poll_ms.max(1));
        let mut summary = BatchSummary::default();
        info!(worker_id, "Worker started");

        while !cancel.is_cancelled() {
            let wait = match self.process_batch(worker_id).await {
                Ok(results) if results.is_empty() => true,
                Ok(results) => {
                    summary.add_cycle(&results);
                    false
                }
                Err(e) => {
                    warn!(worker_id, error = %e, "Processing cycle failed");
                    true
                }
            };
            if wait {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(idle) => {}
                }
            }
        }

        info!(
            worker_id,
            cycles = summary.cycles,
            claimed = summary.claimed,
            "Worker stopped"
        );
        summary
    }

    /// Resubmit every dead-lettered task with a fresh retry budget.
    pub async fn reprocess_dead_letters(&self) -> Result<usize, ProcessorError> {
        let tasks = self.retry.process_dlq().await;
        let count = tasks.len();
        if count > 0 {
            self.task_store.enqueue(tasks).await?;
        }
        info!(count, "Resubmitted dead-lettered tasks");
        Ok(count)
    }

    async fn process_partition(
        &self,
        entity_type: String,
        tasks: Vec<IndexingTask>,
    ) -> Vec<TaskResult> {
        let mut results = Vec::with_capacity(tasks.len());

        if entity_type.parse::<EntityType>().is_err() {
            warn!(entity_type = %entity_type, count = tasks.len(), "No route for entity type");
            for task in tasks {
                let token = self.monitor.record_operation_start(&task.entity_type);
                let failure = TaskFailure::unknown_entity_type(&entity_type);
                results.push(self.fail(InFlight { task, token }, failure).await);
            }
            return results;
        }

        let mut group: Vec<IndexingTask> = Vec::new();
        let mut grouped: HashSet<String> = HashSet::new();
        for task in tasks {
            if let Some(class) = task.last_error_class() {
                if !self.retry.allow_request(class) {
                    results.push(self.short_circuit(task, class).await);
                    continue;
                }
            }
            if task.operation == TaskOperation::Delete {
                grouped.clear();
                results.extend(self.process_group(std::mem::take(&mut group)).await);
                results.push(self.process_delete(task).await);
                continue;
            }
            // a repeated entity must see the snapshot committed by the earlier task
            if !grouped.insert(task.entity_id.clone()) {
                grouped.clear();
                grouped.insert(task.entity_id.clone());
                results.extend(self.process_group(std::mem::take(&mut group)).await);
            }
            group.push(task);
        }
        results.extend(self.process_group(group).await);
        results
    }

    /// Index consecutive inserts/updates with one backend call.
    async fn process_group(&self, tasks: Vec<IndexingTask>) -> Vec<TaskResult> {
        if tasks.is_empty() {
            return Vec::new();
        }

        let mut results = Vec::with_capacity(tasks.len());
        let mut staged: Vec<(InFlight, ChangeSet)> = Vec::with_capacity(tasks.len());
        for task in tasks {
            let token = self.monitor.record_operation_start(&task.entity_type);
            let op = InFlight { task, token };
            match self.prepare(&op.task).await {
                Ok(change) => staged.push((op, change)),
                Err(failure) => results.push(self.fail(op, failure).await),
            }
        }

        let chunks: Vec<ContentChunk> = staged
            .iter()
            .flat_map(|(_, change)| change.chunks.iter().cloned())
            .collect();

        if !chunks.is_empty() {
            let chunk_count = chunks.len();
            if let Err(e) = self.backend.index_chunks(chunks).await {
                warn!(
                    tasks = staged.len(),
                    chunks = chunk_count,
                    error = %e,
                    "Bulk index call failed"
                );
                let failure = TaskFailure::from_message(e.message());
                let failures = staged.into_iter().map(|(op, change)| {
                    self.detector
                        .discard(&change.entity_type, &change.entity_id);
                    self.settle_failure(op, failure.clone())
                });
                results.extend(join_all(failures).await);
                // one downstream call, one breaker failure
                self.retry.record_failure(failure.class);
                return results;
            }
            debug!(chunks = chunk_count, tasks = staged.len(), "Indexed chunks");
        }

        for (op, change) in staged {
            results.push(self.finish_indexed(op, change).await);
        }
        results
    }

    async fn prepare(&self, task: &IndexingTask) -> Result<ChangeSet, TaskFailure> {
        let content = self
            .content_store
            .fetch_content(&task.entity_type, &task.entity_id)
            .await
            .map_err(|e| TaskFailure::from_message(e.message()))?;

        let Some(content) = content else {
            return Err(TaskFailure::malformed(format!(
                "No content for {}",
                task.entity_key()
            )));
        };

        if content.len() < BLOCKING_DETECT_BYTES {
            return self
                .detector
                .detect_and_chunk(&task.entity_id, &task.entity_type, &content)
                .map_err(|e| TaskFailure::malformed(e.to_string()));
        }

        let detector = self.detector.clone();
        let entity_id = task.entity_id.clone();
        let entity_type = task.entity_type.clone();
        tokio::task::spawn_blocking(move || {
            detector.detect_and_chunk(&entity_id, &entity_type, &content)
        })
        .await
        .map_err(|e| TaskFailure::malformed(format!("Change detection aborted: {e}")))?
        .map_err(|e| TaskFailure::malformed(e.to_string()))
    }

    async fn finish_indexed(&self, op: InFlight, change: ChangeSet) -> TaskResult {
        let InFlight { task, token } = op;
        if !change.needs_commit() {
            return self
                .succeed(task, token, TaskStatus::Unchanged, 0)
                .await;
        }

        if let Err(e) = self
            .detector
            .commit(&change.entity_type, &change.entity_id)
        {
            // Vectors are stored; the next detection re-chunks the same delta.
            warn!(entity = %task.entity_key(), error = %e, "Failed to commit snapshot");
        }
        self.cache
            .invalidate(&task.entity_type, &task.entity_id, task.operation)
            .await;

        self.succeed(task, token, TaskStatus::Completed, change.chunks.len())
            .await
    }

    async fn process_delete(&self, task: IndexingTask) -> TaskResult {
        let token = self.monitor.record_operation_start(&task.entity_type);
        if let Err(e) = self
            .backend
            .remove_entity(&task.entity_type, &task.entity_id)
            .await
        {
            let failure = TaskFailure::from_message(e.message());
            return self.fail(InFlight { task, token }, failure).await;
        }

        if let Err(e) = self.detector.forget(&task.entity_type, &task.entity_id) {
            warn!(entity = %task.entity_key(), error = %e, "Failed to forget snapshot");
        }
        self.cache
            .invalidate(&task.entity_type, &task.entity_id, TaskOperation::Delete)
            .await;

        self.succeed(task, token, TaskStatus::Completed, 0).await
    }

    async fn succeed(
        &self,
        task: IndexingTask,
        token: OperationToken,
        status: TaskStatus,
        chunks: usize,
    ) -> TaskResult {
        if let Some(class) = task.last_error_class() {
            self.retry.record_success(class);
        }
        if let Err(e) = self.task_store.complete_task(&task.id, true, None).await {
            warn!(task_id = %task.id, error = %e, "Failed to mark task complete");
        }
        let latency = self.monitor.record_operation_complete(token, None);

        debug!(
            task_id = %task.id,
            entity = %task.entity_key(),
            operation = %task.operation,
            chunks,
            status = ?status,
            "Task succeeded"
        );
        TaskResult::new(&task, status)
            .with_chunks(chunks)
            .with_duration_ms(as_millis(latency))
    }

    /// Settle a failed task, then report the failed call to its breaker.
    async fn fail(&self, op: InFlight, failure: TaskFailure) -> TaskResult {
        let class = failure.class;
        let result = self.settle_failure(op, failure).await;
        self.retry.record_failure(class);
        result
    }

    /// Route a failure through the retry handler and report it to the store.
    async fn settle_failure(&self, op: InFlight, failure: TaskFailure) -> TaskResult {
        let InFlight { mut task, token } = op;
        let latency = self
            .monitor
            .record_operation_complete(token, Some(failure.class));

        let decision = self.retry.handle_error(&mut task, &failure).await;

        let status = match decision {
            RetryDecision::Retry { .. } => {
                if let Err(e) = self.task_store.retry_task(task.clone()).await {
                    warn!(task_id = %task.id, error = %e, "Failed to requeue task");
                }
                TaskStatus::RetryScheduled
            }
            RetryDecision::DeadLetter { reason } => {
                if let Err(e) = self
                    .task_store
                    .complete_task(&task.id, false, Some(failure.message.clone()))
                    .await
                {
                    warn!(task_id = %task.id, error = %e, "Failed to mark task failed");
                }
                if reason == DeadLetterReason::NonRetryable {
                    TaskStatus::Rejected
                } else {
                    TaskStatus::DeadLettered
                }
            }
        };

        TaskResult::new(&task, status)
            .with_error(failure.class, failure.message)
            .with_duration_ms(as_millis(latency))
    }

    /// Dead-letter a retried task whose breaker is open, without calling out.
    async fn short_circuit(&self, task: IndexingTask, class: ErrorClass) -> TaskResult {
        let token = self.monitor.record_operation_start(&task.entity_type);
        let latency = self.monitor.record_operation_complete(token, Some(class));
        self.retry.short_circuit(&task, class).await;

        let message = format!("Circuit open for {}", class.service());
        if let Err(e) = self
            .task_store
            .complete_task(&task.id, false, Some(message.clone()))
            .await
        {
            warn!(task_id = %task.id, error = %e, "Failed to mark task failed");
        }
        TaskResult::new(&task, TaskStatus::DeadLettered)
            .with_error(class, message)
            .with_duration_ms(as_millis(latency))
    }

    async fn report_queue_depth(&self) {
        match self.task_store.pending_count().await {
            Ok(depth) => {
                self.monitor.update_queue_depth(depth);
            }
            Err(e) => warn!(error = %e, "Failed to read queue depth"),
        }
    }
}

/// Group tasks by raw entity type, keeping claim order in each group and
/// first-seen order across groups.
fn partition_by_entity_type(tasks: Vec<IndexingTask>) -> Vec<(String, Vec<IndexingTask>)> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut partitions: Vec<(String, Vec<IndexingTask>)> = Vec::new();
    for task in tasks {
        match index.get(&task.entity_type) {
            Some(&i) => partitions[i].1.push(task),
            None => {
                index.insert(task.entity_type.clone(), partitions.len());
                partitions.push((task.entity_type.clone(), vec![task]));
            }
        }
    }
    partitions
}

fn as_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollaboratorError;
    use crate::memory::{HashEmbeddingBackend, InMemoryContentStore, InMemoryTaskStore};
    use crate::traits::Embedding;
    use async_trait::async_trait;
    use indexer_resilience::RetryConfig;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        tasks: Arc<InMemoryTaskStore>,
        content: Arc<InMemoryContentStore>,
        backend: Arc<HashEmbeddingBackend>,
        processor: BatchProcessor,
    }

    fn no_wait() -> ResilienceConfig {
        ResilienceConfig::default().with_retry(RetryConfig::default().with_wait_before_retry(false))
    }

    fn fixture(tasks: Vec<IndexingTask>) -> Fixture {
        let task_store = Arc::new(InMemoryTaskStore::with_tasks(tasks));
        let content = Arc::new(InMemoryContentStore::new());
        let backend = Arc::new(HashEmbeddingBackend::default());
        let processor = BatchProcessor::new(
            ProcessorConfig::default(),
            task_store.clone(),
            content.clone(),
            backend.clone(),
        )
        .with_retry_handler(Arc::new(RetryHandler::new(no_wait())));
        Fixture {
            tasks: task_store,
            content,
            backend,
            processor,
        }
    }

    fn task(entity_type: &str, entity_id: &str, op: TaskOperation) -> IndexingTask {
        IndexingTask::new(entity_type, entity_id, "w1", op)
    }

    struct FailingBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingBackend for FailingBackend {
        async fn index_chunks(
            &self,
            _chunks: Vec<ContentChunk>,
        ) -> Result<Vec<Embedding>, CollaboratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(CollaboratorError::Embedding("connect ECONNREFUSED".to_string()))
        }

        async fn remove_entity(&self, _: &str, _: &str) -> Result<(), CollaboratorError> {
            Err(CollaboratorError::Embedding("vector store timeout".to_string()))
        }
    }

    /// Tracks how many bulk calls overlap.
    #[derive(Default)]
    struct GaugeBackend {
        inner: HashEmbeddingBackend,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingBackend for GaugeBackend {
        async fn index_chunks(
            &self,
            chunks: Vec<ContentChunk>,
        ) -> Result<Vec<Embedding>, CollaboratorError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            let result = self.inner.index_chunks(chunks).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn remove_entity(
            &self,
            entity_type: &str,
            entity_id: &str,
        ) -> Result<(), CollaboratorError> {
            self.inner.remove_entity(entity_type, entity_id).await
        }
    }

    #[test]
    fn test_partition_keeps_claim_order() {
        let tasks = vec![
            task("page", "p1", TaskOperation::Insert),
            task("block", "b1", TaskOperation::Insert),
            task("page", "p2", TaskOperation::Delete),
        ];
        let partitions = partition_by_entity_type(tasks);
        assert_eq!(partitions.len(), 2);
        assert_eq!(partitions[0].0, "page");
        let ids: Vec<&str> = partitions[0].1.iter().map(|t| t.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p2"]);
    }

    #[tokio::test]
    async fn test_new_entity_is_indexed_then_unchanged() {
        let f = fixture(vec![task("page", "p1", TaskOperation::Insert)]);
        f.content.put("page", "p1", "hello world\nsecond line");

        let results = f.processor.process_batch("w").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, TaskStatus::Completed);
        assert!(results[0].chunks_indexed > 0);
        assert_eq!(f.backend.vector_count("page", "p1"), results[0].chunks_indexed);
        assert!(f.processor.detector().fingerprint("page", "p1").unwrap().is_some());

        f.tasks
            .enqueue(vec![task("page", "p1", TaskOperation::Update)])
            .await
            .unwrap();
        let results = f.processor.process_batch("w").await.unwrap();
        assert_eq!(results[0].status, TaskStatus::Unchanged);
        assert_eq!(f.backend.call_count(), 1);
        assert!(f.tasks.completions().iter().all(|c| c.success));
    }

    #[tokio::test]
    async fn test_update_invalidates_cache() {
        let f = fixture(vec![task("page", "p1", TaskOperation::Update)]);
        f.content.put("page", "p1", "content");
        let cache = f.processor.cache();
        cache.set("page:p1", json!("stale"), "page", "p1", &[]);
        cache.set("page:p1:summary", json!("stale"), "page", "p1", &[]);
        cache.set("page:p2", json!("fresh"), "page", "p2", &[]);

        f.processor.process_batch("w").await.unwrap();
        assert!(cache.get("page:p1").is_none());
        assert!(cache.get("page:p1:summary").is_none());
        assert!(cache.get("page:p2").is_some());
    }

    #[tokio::test]
    async fn test_delete_between_groups() {
        let f = fixture(vec![
            task("page", "p1", TaskOperation::Insert),
            task("page", "p1", TaskOperation::Delete),
            task("page", "p2", TaskOperation::Insert),
        ]);
        f.content.put("page", "p1", "one");
        f.content.put("page", "p2", "two");

        let results = f.processor.process_batch("w").await.unwrap();
        assert!(results.iter().all(|r| r.status == TaskStatus::Completed));
        assert_eq!(f.backend.call_count(), 2);
        assert_eq!(f.backend.vector_count("page", "p1"), 0);
        assert_eq!(f.backend.vector_count("page", "p2"), 1);
        assert!(f.processor.detector().fingerprint("page", "p1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_repeated_entity_splits_group() {
        let f = fixture(vec![
            task("page", "p1", TaskOperation::Insert),
            task("page", "p2", TaskOperation::Insert),
            task("page", "p1", TaskOperation::Update),
        ]);
        f.content.put("page", "p1", "one");
        f.content.put("page", "p2", "two");

        let results = f.processor.process_batch("w").await.unwrap();
        let statuses: Vec<TaskStatus> = results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                TaskStatus::Completed,
                TaskStatus::Completed,
                TaskStatus::Unchanged
            ]
        );
        assert_eq!(f.backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_entity_type_is_rejected() {
        let f = fixture(vec![
            task("comment", "c1", TaskOperation::Insert),
            task("comment", "c2", TaskOperation::Update),
        ]);
        let results = f.processor.process_batch("w").await.unwrap();

        assert_eq!(results.len(), 2);
        for result in &results {
            assert_eq!(result.status, TaskStatus::Rejected);
            assert_eq!(result.error_class, Some(ErrorClass::UnknownEntityType));
            assert_eq!(result.retry_count, 0);
        }
        assert_eq!(f.tasks.retry_count(), 0);
        assert!(f.tasks.completions().iter().all(|c| !c.success));
    }

    #[tokio::test]
    async fn test_large_rewrite_is_detected_off_the_runtime() {
        let f = fixture(vec![task("page", "p1", TaskOperation::Insert)]);
        let old: String = (0..10_000).map(|i| format!("old line {i}\n")).collect();
        assert!(old.len() >= BLOCKING_DETECT_BYTES);
        f.content.put("page", "p1", old);
        f.processor.process_batch("w").await.unwrap();

        let new: String = (0..10_000).map(|i| format!("new line {i}\n")).collect();
        f.content.put("page", "p1", new);
        f.tasks
            .enqueue(vec![task("page", "p1", TaskOperation::Update)])
            .await
            .unwrap();
        let results = f.processor.process_batch("w").await.unwrap();
        assert_eq!(results[0].status, TaskStatus::Completed);
        assert!(results[0].chunks_indexed > 0);
        assert_eq!(f.processor.detector().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_content_is_malformed() {
        let f = fixture(vec![task("block", "b1", TaskOperation::Update)]);
        let results = f.processor.process_batch("w").await.unwrap();
        assert_eq!(results[0].status, TaskStatus::Rejected);
        assert_eq!(results[0].error_class, Some(ErrorClass::MalformedEntity));
        assert_eq!(f.backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_bulk_failure_handles_each_task() {
        let tasks: Vec<IndexingTask> = (0..10)
            .map(|i| task("page", &format!("p{i}"), TaskOperation::Insert))
            .collect();
        let task_store = Arc::new(InMemoryTaskStore::with_tasks(tasks));
        let content = Arc::new(InMemoryContentStore::new());
        for i in 0..10 {
            content.put("page", &format!("p{i}"), format!("content {i}"));
        }
        let backend = Arc::new(FailingBackend {
            calls: AtomicUsize::new(0),
        });
        let retry = Arc::new(RetryHandler::new(no_wait()));
        let processor = BatchProcessor::new(
            ProcessorConfig::default(),
            task_store.clone(),
            content,
            backend.clone(),
        )
        .with_retry_handler(retry.clone());

        let results = processor.process_batch("w").await.unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(retry.stats().errors_handled, 10);
        assert!(results
            .iter()
            .all(|r| r.status == TaskStatus::RetryScheduled && r.retry_count == 1));
        assert_eq!(task_store.retry_count(), 10);
        let network = retry
            .breaker_states()
            .into_iter()
            .find(|s| s.service == "network")
            .unwrap();
        assert_eq!(network.failures, 1);
        // nothing was committed, so the retry re-chunks the same content
        assert_eq!(processor.detector().pending_count(), 0);
        assert!(processor.detector().fingerprint("page", "p0").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_breaker_short_circuits_retried_task() {
        let f = fixture(vec![]);
        f.content.put("page", "p1", "content");
        let retry = f.processor.retry_handler();
        for _ in 0..5 {
            retry.record_failure(ErrorClass::Embedding);
        }

        let mut retried = task("page", "p1", TaskOperation::Update);
        retried.retry_count = 1;
        retried.set_last_error_class(ErrorClass::Embedding);
        f.tasks.enqueue(vec![retried.clone()]).await.unwrap();

        let results = f.processor.process_batch("w").await.unwrap();
        assert_eq!(results[0].status, TaskStatus::DeadLettered);
        assert_eq!(f.backend.call_count(), 0);
        assert!(retry.dead_letters().contains(&retried.id));
    }

    #[tokio::test]
    async fn test_success_after_retry_feeds_breaker() {
        let f = fixture(vec![]);
        f.content.put("page", "p1", "content");
        let retry = f.processor.retry_handler();
        retry.record_failure(ErrorClass::Network);

        let mut retried = task("page", "p1", TaskOperation::Update);
        retried.retry_count = 1;
        retried.set_last_error_class(ErrorClass::Network);
        f.tasks.enqueue(vec![retried]).await.unwrap();

        f.processor.process_batch("w").await.unwrap();
        let network = retry
            .breaker_states()
            .into_iter()
            .find(|s| s.service == "network")
            .unwrap();
        assert_eq!(network.failures, 0);
    }

    #[tokio::test]
    async fn test_reprocess_dead_letters() {
        let f = fixture(vec![task("page", "p1", TaskOperation::Update)]);
        f.processor.process_batch("w").await.unwrap();
        assert_eq!(f.processor.retry_handler().dead_letters().len(), 1);

        f.content.put("page", "p1", "now it exists");
        assert_eq!(f.processor.reprocess_dead_letters().await.unwrap(), 1);
        let results = f.processor.process_batch("w").await.unwrap();
        assert_eq!(results[0].status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_run_until_idle_drains_retries() {
        let f = fixture(vec![task("database", "d1", TaskOperation::Insert)]);
        f.content.put("database", "d1", "schema");
        let summary = f.processor.run_until_idle("w", 10).await.unwrap();
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.cycles, 1);
        assert_eq!(f.tasks.claimed_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let f = fixture(vec![task("page", "p1", TaskOperation::Insert)]);
        f.content.put("page", "p1", "content");
        let processor = Arc::new(f.processor);
        let cancel = CancellationToken::new();

        let handle = {
            let processor = processor.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { processor.run("w", cancel).await })
        };
        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();

        let summary = handle.await.unwrap();
        assert_eq!(summary.completed, 1);
    }

    #[tokio::test]
    async fn test_partitions_respect_recommended_concurrency() {
        let types = ["page", "block", "database", "database_row", "workspace"];
        let tasks: Vec<IndexingTask> = types
            .iter()
            .map(|t| task(t, "e1", TaskOperation::Insert))
            .collect();
        let task_store = Arc::new(InMemoryTaskStore::with_tasks(tasks));
        let content = Arc::new(InMemoryContentStore::new());
        for t in types {
            content.put(t, "e1", format!("{t} body"));
        }
        let backend = Arc::new(GaugeBackend::default());
        let processor = BatchProcessor::new(
            ProcessorConfig::default().with_max_concurrent(2),
            task_store,
            content,
            backend.clone(),
        );
        assert_eq!(processor.monitor().recommended_config().concurrency, 2);

        let results = processor.process_batch("w").await.unwrap();
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| r.status == TaskStatus::Completed));
        assert_eq!(backend.inner.call_count(), 5);
        assert_eq!(backend.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_each_cycle_claims_the_current_batch_size() {
        let tasks: Vec<IndexingTask> = (0..10)
            .map(|i| task("page", &format!("p{i}"), TaskOperation::Insert))
            .collect();
        let task_store = Arc::new(InMemoryTaskStore::with_tasks(tasks));
        let content = Arc::new(InMemoryContentStore::new());
        for i in 0..10 {
            content.put("page", &format!("p{i}"), format!("content {i}"));
        }
        let monitor = Arc::new(PerformanceMonitor::new(MonitorConfig {
            min_batch_size: 1,
            ..MonitorConfig::default().with_initial(4, 2)
        }));
        let processor = BatchProcessor::new(
            ProcessorConfig::default(),
            task_store,
            content,
            Arc::new(HashEmbeddingBackend::default()),
        )
        .with_monitor(monitor.clone());

        // a slow batch shrinks 4 to 3
        monitor.record_batch_processed(4, Duration::from_millis(1_500), 0);
        assert_eq!(monitor.recommended_config().batch_size, 3);
        assert_eq!(processor.process_batch("w").await.unwrap().len(), 3);

        // the fast cycle above grew it to 4
        assert_eq!(monitor.recommended_config().batch_size, 4);
        assert_eq!(processor.process_batch("w").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_monitor_sees_batches() {
        let f = fixture(vec![
            task("page", "p1", TaskOperation::Insert),
            task("block", "b1", TaskOperation::Insert),
        ]);
        f.content.put("page", "p1", "a");
        f.content.put("block", "b1", "b");
        f.processor.process_batch("w").await.unwrap();

        let snapshot = f.processor.monitor().snapshot();
        assert_eq!(snapshot.operations, 2);
        assert_eq!(snapshot.batches, 1);
        assert_eq!(snapshot.latency_by_entity_type.len(), 2);
        assert_eq!(snapshot.queue_depth, 0);
    }
}
