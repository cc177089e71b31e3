//! Bounded sample windows and percentile snapshots.
//!
//! Percentiles are computed from a sorted copy of the window at snapshot
//! time. They are point-in-time estimates, not a streaming sketch.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Summary statistics of a sample window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySnapshot {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Fixed-capacity window of recent samples, oldest dropped first.
#[derive(Debug, Clone)]
pub struct RollingSamples {
    capacity: usize,
    values: VecDeque<f64>,
}

impl RollingSamples {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            values: VecDeque::with_capacity(capacity.min(4_096)),
        }
    }

    /// Add a sample.
    pub fn push(&mut self, value: f64) {
        if self.values.len() >= self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Most recent sample.
    pub fn last(&self) -> Option<f64> {
        self.values.back().copied()
    }

    /// Statistics over the current window.
    pub fn snapshot(&self) -> LatencySnapshot {
        if self.values.is_empty() {
            return LatencySnapshot::default();
        }
        let mut sorted: Vec<f64> = self.values.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let count = sorted.len();
        let sum: f64 = sorted.iter().sum();
        LatencySnapshot {
            count,
            min: sorted[0],
            max: sorted[count - 1],
            avg: sum / count as f64,
            p50: percentile(&sorted, 50.0),
            p95: percentile(&sorted, 95.0),
            p99: percentile(&sorted, 99.0),
        }
    }
}

/// Nearest-rank percentile of a sorted, non-empty slice.
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
