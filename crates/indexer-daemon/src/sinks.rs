//! File-backed metrics sink.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use indexer_monitor::{MetricsSink, MonitorError, PerformanceSnapshot};

/// Appends one JSON snapshot per line.
pub struct JsonLinesMetricsSink {
    path: PathBuf,
}

impl JsonLinesMetricsSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl MetricsSink for JsonLinesMetricsSink {
    async fn persist_snapshot(&self, snapshot: &PerformanceSnapshot) -> Result<(), MonitorError> {
        let mut line = snapshot.to_bytes()?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| MonitorError::Sink(format!("{}: {e}", self.path.display())))?;
        file.write_all(&line)
            .await
            .map_err(|e| MonitorError::Sink(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| MonitorError::Sink(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexer_monitor::{MonitorConfig, PerformanceMonitor};

    #[tokio::test]
    async fn test_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.jsonl");
        let monitor = PerformanceMonitor::new(MonitorConfig::default());
        let sink = JsonLinesMetricsSink::new(&path);

        sink.persist_snapshot(&monitor.snapshot()).await.unwrap();
        sink.persist_snapshot(&monitor.snapshot()).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed = PerformanceSnapshot::from_bytes(lines[1].as_bytes()).unwrap();
        assert_eq!(parsed.recommended.batch_size, 100);
    }

    #[tokio::test]
    async fn test_unwritable_path_is_a_sink_error() {
        let sink = JsonLinesMetricsSink::new("/nonexistent-dir/metrics.jsonl");
        let monitor = PerformanceMonitor::new(MonitorConfig::default());
        let err = sink.persist_snapshot(&monitor.snapshot()).await.unwrap_err();
        assert!(matches!(err, MonitorError::Sink(_)));
    }
}
