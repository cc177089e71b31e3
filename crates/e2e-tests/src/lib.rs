//! End-to-end test infrastructure for the indexer.
//!
//! Provides a shared [`TestHarness`] that wires the processor to in-memory
//! collaborators, a manual clock and an embedding backend whose failures
//! can be scripted.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use indexer_cache::{CacheConfig, CacheObserver, TieredCache};
use indexer_detect::{ChangeDetector, DetectorConfig, InMemorySnapshotStore};
use indexer_monitor::{MonitorConfig, PerformanceMonitor};
use indexer_processor::{
    BatchProcessor, CollaboratorError, Embedding, EmbeddingBackend, HashEmbeddingBackend,
    InMemoryContentStore, InMemoryDeadLetterStore, InMemoryTaskStore, ProcessorConfig, TaskStore,
};
use indexer_resilience::{AlertObserver, ResilienceConfig, RetryHandler};
use indexer_types::{ContentChunk, IndexingTask, ManualClock, TaskOperation};

/// Start of the manual clock (2024-01-29 approx).
pub const START_MS: i64 = 1_706_540_400_000;

/// How the backend should fail.
#[derive(Debug, Clone)]
enum FailureMode {
    Never,
    Next { remaining: usize, message: String },
    Always { message: String },
}

/// Embedding backend that delegates to [`HashEmbeddingBackend`] unless told
/// to fail.
pub struct FlakyEmbeddingBackend {
    inner: HashEmbeddingBackend,
    mode: Mutex<FailureMode>,
    calls: AtomicUsize,
}

impl FlakyEmbeddingBackend {
    pub fn new() -> Self {
        Self {
            inner: HashEmbeddingBackend::default(),
            mode: Mutex::new(FailureMode::Never),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail the next `count` index calls with `message`.
    pub fn fail_next(&self, count: usize, message: &str) {
        *self.mode.lock() = FailureMode::Next {
            remaining: count,
            message: message.to_string(),
        };
    }

    /// Fail every index call with `message`.
    pub fn fail_always(&self, message: &str) {
        *self.mode.lock() = FailureMode::Always {
            message: message.to_string(),
        };
    }

    pub fn recover(&self) {
        *self.mode.lock() = FailureMode::Never;
    }

    /// Number of `index_chunks` calls, failed ones included.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector_count(&self, entity_type: &str, entity_id: &str) -> usize {
        self.inner.vector_count(entity_type, entity_id)
    }

    fn take_failure(&self) -> Option<String> {
        let mut mode = self.mode.lock();
        match &mut *mode {
            FailureMode::Never => None,
            FailureMode::Always { message } => Some(message.clone()),
            FailureMode::Next { remaining, message } => {
                let message = message.clone();
                *remaining -= 1;
                if *remaining == 0 {
                    *mode = FailureMode::Never;
                }
                Some(message)
            }
        }
    }
}

impl Default for FlakyEmbeddingBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingBackend for FlakyEmbeddingBackend {
    async fn index_chunks(
        &self,
        chunks: Vec<ContentChunk>,
    ) -> Result<Vec<Embedding>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.take_failure() {
            return Err(CollaboratorError::Embedding(message));
        }
        self.inner.index_chunks(chunks).await
    }

    async fn remove_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<(), CollaboratorError> {
        self.inner.remove_entity(entity_type, entity_id).await
    }
}

/// Fully wired processor over in-memory collaborators.
pub struct TestHarness {
    pub tasks: Arc<InMemoryTaskStore>,
    pub content: Arc<InMemoryContentStore>,
    pub backend: Arc<FlakyEmbeddingBackend>,
    pub dead_letter_store: Arc<InMemoryDeadLetterStore>,
    pub clock: Arc<ManualClock>,
    pub processor: BatchProcessor,
}

impl TestHarness {
    /// Harness with default settings and no backoff sleeps.
    pub fn new() -> Self {
        Self::with_config(ResilienceConfig::default(), CacheConfig::default())
    }

    /// Harness with explicit resilience and cache settings. Backoff sleeps
    /// are always disabled.
    pub fn with_config(mut resilience: ResilienceConfig, cache: CacheConfig) -> Self {
        let clock = Arc::new(ManualClock::new(START_MS));
        resilience.retry.wait_before_retry = false;

        let tasks = Arc::new(InMemoryTaskStore::new());
        let content = Arc::new(InMemoryContentStore::new());
        let backend = Arc::new(FlakyEmbeddingBackend::new());
        let dead_letter_store = Arc::new(InMemoryDeadLetterStore::new());

        let processor_config = ProcessorConfig::default();
        let monitor = Arc::new(PerformanceMonitor::new(MonitorConfig::default().with_initial(
            processor_config.batch_size,
            processor_config.max_concurrent,
        )));
        let detector = Arc::new(
            ChangeDetector::new(Arc::new(InMemorySnapshotStore::new()), DetectorConfig::default())
                .with_clock(clock.clone()),
        );
        let cache = Arc::new(TieredCache::with_clock(cache, clock.clone()));
        cache.set_observer(monitor.clone() as Arc<dyn CacheObserver>);
        let retry = Arc::new(
            RetryHandler::with_clock(resilience, clock.clone())
                .with_dead_letter_store(dead_letter_store.clone()),
        );
        retry
            .tracker()
            .set_observer(monitor.clone() as Arc<dyn AlertObserver>);

        let processor = BatchProcessor::new(
            processor_config,
            tasks.clone(),
            content.clone(),
            backend.clone(),
        )
        .with_detector(detector)
        .with_cache(cache)
        .with_retry_handler(retry)
        .with_monitor(monitor);

        Self {
            tasks,
            content,
            backend,
            dead_letter_store,
            clock,
            processor,
        }
    }

    /// Store content and enqueue a task for it.
    pub async fn submit(
        &self,
        entity_type: &str,
        entity_id: &str,
        operation: TaskOperation,
        content: Option<&str>,
    ) -> IndexingTask {
        if let Some(text) = content {
            self.content.put(entity_type, entity_id, text);
        }
        let task = IndexingTask::new(entity_type, entity_id, "w1", operation);
        self.tasks
            .enqueue(vec![task.clone()])
            .await
            .expect("in-memory enqueue");
        task
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Multi-line document text with `lines` numbered lines.
pub fn document(prefix: &str, lines: usize) -> String {
    (0..lines)
        .map(|i| format!("{prefix} line {i}"))
        .collect::<Vec<_>>()
        .join("\n")
}
