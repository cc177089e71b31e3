//! Durable destination for performance snapshots.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MonitorError;
use crate::samples::LatencySnapshot;
use crate::tuner::RecommendedConfig;

/// Aggregated view of the monitor at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub taken_at: DateTime<Utc>,
    /// Operations completed since start
    pub operations: u64,
    /// Operations started but not completed
    pub in_flight: u64,
    /// Batches processed since start
    pub batches: u64,
    pub latency_ms: LatencySnapshot,
    pub batch_size: LatencySnapshot,
    pub batch_latency_ms: LatencySnapshot,
    pub latency_by_entity_type: BTreeMap<String, LatencySnapshot>,
    pub error_counts: BTreeMap<String, u64>,
    /// Failure share of the rolling outcome window
    pub error_rate: f64,
    pub queue_depth: u64,
    pub recommended: RecommendedConfig,
}

impl PerformanceSnapshot {
    /// Serialize to JSON bytes for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, MonitorError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MonitorError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Append-only store for snapshots.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn persist_snapshot(&self, snapshot: &PerformanceSnapshot) -> Result<(), MonitorError>;
}
