//! Command implementations for the indexer daemon.
//!
//! Handles:
//! - run: load settings, wire components, process a task file
//! - config: print the effective settings

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use indexer_cache::{CacheObserver, CacheStats, TieredCache};
use indexer_detect::{ChangeDetector, InMemorySnapshotStore};
use indexer_monitor::{MetricsSink, MonitorAlert, PerformanceMonitor, PerformanceSnapshot};
use indexer_processor::{
    BatchProcessor, BatchSummary, ContentStore, EmbeddingBackend, HashEmbeddingBackend,
    InMemoryDeadLetterStore, TaskStore,
};
use indexer_resilience::{AlertObserver, CircuitBreakerState, RetryHandler, RetryStats};

use crate::input::TaskFile;
use crate::settings::Settings;
use crate::sinks::JsonLinesMetricsSink;

/// Options for the `run` command.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub input: PathBuf,
    pub watch: bool,
    pub metrics_out: Option<PathBuf>,
    pub batch_size: Option<usize>,
    pub max_concurrent: Option<usize>,
}

/// What a run prints on exit.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub summary: BatchSummary,
    pub retry: RetryStats,
    pub breakers: Vec<CircuitBreakerState>,
    pub cache: CacheStats,
    pub performance: PerformanceSnapshot,
    pub alerts: Vec<MonitorAlert>,
}

/// Load settings, then apply CLI overrides (highest precedence).
pub fn load_settings(
    config_path: Option<&str>,
    log_level_override: Option<&str>,
    batch_size: Option<usize>,
    max_concurrent: Option<usize>,
) -> Result<Settings> {
    let mut settings = Settings::load(config_path)
        .context("Failed to load configuration")?
        .with_overrides(batch_size, max_concurrent);
    if let Some(log_level) = log_level_override {
        settings.log_level = log_level.to_string();
    }
    settings.validate()?;
    Ok(settings)
}

/// Install the global tracing subscriber. `RUST_LOG` wins over the
/// configured level.
pub fn init_tracing(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Wire a processor from settings.
///
/// The monitor observes the cache hit rate and resilience alerts.
pub fn build_processor(
    settings: &Settings,
    task_store: Arc<dyn TaskStore>,
    content_store: Arc<dyn ContentStore>,
    backend: Arc<dyn EmbeddingBackend>,
    metrics_sink: Option<Arc<dyn MetricsSink>>,
) -> BatchProcessor {
    let monitor = Arc::new(PerformanceMonitor::new(settings.monitor.clone()));
    if let Some(sink) = metrics_sink {
        monitor.set_sink(sink);
    }

    let cache = Arc::new(TieredCache::new(settings.cache.clone()));
    cache.set_observer(monitor.clone() as Arc<dyn CacheObserver>);

    let retry = Arc::new(
        RetryHandler::new(settings.resilience.clone())
            .with_dead_letter_store(Arc::new(InMemoryDeadLetterStore::new())),
    );
    retry
        .tracker()
        .set_observer(monitor.clone() as Arc<dyn AlertObserver>);

    let detector = Arc::new(ChangeDetector::new(
        Arc::new(InMemorySnapshotStore::new()),
        settings.detector.clone(),
    ));

    BatchProcessor::new(settings.processor.clone(), task_store, content_store, backend)
        .with_detector(detector)
        .with_cache(cache)
        .with_retry_handler(retry)
        .with_monitor(monitor)
}

/// Process a task file and print a JSON report to stdout.
pub async fn run_tasks(
    config_path: Option<&str>,
    log_level_override: Option<&str>,
    options: RunOptions,
) -> Result<()> {
    let settings = load_settings(
        config_path,
        log_level_override,
        options.batch_size,
        options.max_concurrent,
    )?;
    init_tracing(&settings.log_level)?;

    let file = TaskFile::load(&options.input)?;
    info!(
        input = %options.input.display(),
        tasks = file.tasks.len(),
        entities = file.content.len(),
        worker_id = %settings.worker_id,
        "Indexer starting"
    );
    let (task_store, content_store) = file.into_stores();
    let sink = options
        .metrics_out
        .map(|path| Arc::new(JsonLinesMetricsSink::new(path)) as Arc<dyn MetricsSink>);

    let processor = Arc::new(build_processor(
        &settings,
        task_store,
        content_store,
        Arc::new(HashEmbeddingBackend::default()),
        sink,
    ));

    let report = drive(processor, &settings, options.watch).await?;
    let rendered = serde_json::to_string_pretty(&report).context("Failed to render report")?;
    println!("{rendered}");
    Ok(())
}

/// Run the processor with its background loops, then collect a report.
pub async fn drive(
    processor: Arc<BatchProcessor>,
    settings: &Settings,
    watch: bool,
) -> Result<RunReport> {
    let cancel = CancellationToken::new();
    let scan = processor
        .retry_handler()
        .tracker()
        .clone()
        .spawn_alert_scan(cancel.clone());
    let flush = processor.monitor().clone().spawn_flush_loop(cancel.clone());

    let outcome = if watch {
        let worker = {
            let processor = processor.clone();
            let cancel = cancel.clone();
            let worker_id = settings.worker_id.clone();
            tokio::spawn(async move { processor.run(&worker_id, cancel).await })
        };
        shutdown_signal().await;
        cancel.cancel();
        worker.await.context("Worker task failed")
    } else {
        processor
            .run_until_idle(&settings.worker_id, settings.max_cycles)
            .await
            .context("Processing failed")
    };

    cancel.cancel();
    if let Err(e) = scan.await {
        warn!(error = %e, "Alert scan task failed");
    }
    if let Err(e) = flush.await {
        warn!(error = %e, "Metrics flush task failed");
    }
    let summary = outcome?;

    info!(
        cycles = summary.cycles,
        completed = summary.completed,
        dead_lettered = summary.dead_lettered,
        "Indexer finished"
    );

    let retry = processor.retry_handler();
    Ok(RunReport {
        summary,
        retry: retry.stats(),
        breakers: retry.breaker_states(),
        cache: processor.cache().stats(),
        performance: processor.monitor().snapshot(),
        alerts: processor.monitor().recent_alerts(),
    })
}

/// Print the effective configuration as TOML.
pub fn show_config(config_path: Option<&str>, log_level_override: Option<&str>) -> Result<()> {
    let settings = load_settings(config_path, log_level_override, None, None)?;
    println!("{}", settings.to_toml()?);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexer_processor::{InMemoryContentStore, InMemoryTaskStore};
    use indexer_types::{IndexingTask, TaskOperation};

    #[tokio::test]
    async fn test_drive_one_shot() {
        let tasks = Arc::new(InMemoryTaskStore::with_tasks(vec![
            IndexingTask::new("page", "p1", "w", TaskOperation::Insert),
            IndexingTask::new("gadget", "g1", "w", TaskOperation::Insert),
        ]));
        let content = Arc::new(InMemoryContentStore::new());
        content.put("page", "p1", "first line\nsecond line");

        let settings = Settings::default();
        let processor = Arc::new(build_processor(
            &settings,
            tasks,
            content,
            Arc::new(HashEmbeddingBackend::default()),
            None,
        ));

        let report = drive(processor, &settings, false).await.unwrap();
        assert_eq!(report.summary.completed, 1);
        assert_eq!(report.summary.rejected, 1);
        assert_eq!(report.retry.errors_handled, 1);
        assert_eq!(report.performance.operations, 2);

        let json = serde_json::to_value(&report).unwrap();
        assert!(json["performance"]["recommended"]["batch_size"].is_number());
    }

    #[tokio::test]
    async fn test_metrics_sink_receives_final_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.jsonl");
        let settings = Settings::default();
        let processor = Arc::new(build_processor(
            &settings,
            Arc::new(InMemoryTaskStore::new()),
            Arc::new(InMemoryContentStore::new()),
            Arc::new(HashEmbeddingBackend::default()),
            Some(Arc::new(JsonLinesMetricsSink::new(&path)) as Arc<dyn MetricsSink>),
        ));

        drive(processor, &settings, false).await.unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 1);
    }
}
