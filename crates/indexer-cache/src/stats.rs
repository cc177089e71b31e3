//! Cache metrics and the low hit-rate signal.

use serde::{Deserialize, Serialize};

/// Point-in-time cache metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups served
    pub hits: u64,
    /// Lookups that found nothing (or only an expired entry)
    pub misses: u64,
    /// hits / (hits + misses), 0 when no lookups happened
    pub hit_rate: f64,
    /// Entries in L1
    pub l1_entries: usize,
    /// Entries in L2
    pub l2_entries: usize,
    /// Entries dropped by LRU pressure
    pub evictions: u64,
    /// L1 evictions that moved to L2
    pub demotions: u64,
    /// L2 hits that moved to L1
    pub promotions: u64,
    /// Entries removed by invalidation
    pub invalidations: u64,
    /// Entries dropped because their TTL elapsed
    pub expirations: u64,
    /// Sum of entry sizes across both tiers
    pub memory_bytes: usize,
    /// Forward dependency edges
    pub dependency_edges: usize,
}

impl CacheStats {
    /// Compute a hit rate from raw counters.
    pub fn rate(hits: u64, misses: u64) -> f64 {
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Receives cache health signals.
///
/// Implemented by the performance monitor so a degraded cache shows up in
/// its alert list.
pub trait CacheObserver: Send + Sync {
    /// Hit rate fell below the warning threshold over a meaningful sample.
    fn on_low_hit_rate(&self, stats: &CacheStats);
}
