//! Cache entries.

use serde::{Deserialize, Serialize};

/// A cached value with its bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cache key
    pub key: String,
    /// Cached value
    pub value: serde_json::Value,
    /// Entity type the value was derived from
    pub entity_type: String,
    /// Entity ID the value was derived from
    pub entity_id: String,
    /// Keys this entry depends on
    pub dependencies: Vec<String>,
    /// When the entry was written (ms since epoch)
    pub created_at_ms: i64,
    /// Last read (ms since epoch)
    pub last_accessed_ms: i64,
    /// When the entry stops being served from its current tier (ms since epoch)
    pub expires_at_ms: i64,
    /// Number of reads served
    pub hit_count: u64,
    /// Approximate size in bytes (key plus serialized value)
    pub size: usize,
}

impl CacheEntry {
    /// Build a fresh entry. The expiry is set when it enters a tier.
    pub fn new(
        key: impl Into<String>,
        value: serde_json::Value,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        dependencies: Vec<String>,
        now_ms: i64,
    ) -> Self {
        let key = key.into();
        let size = key.len() + serde_json::to_vec(&value).map(|v| v.len()).unwrap_or(0);
        Self {
            key,
            value,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            dependencies,
            created_at_ms: now_ms,
            last_accessed_ms: now_ms,
            expires_at_ms: now_ms,
            hit_count: 0,
            size,
        }
    }

    /// Whether the entry has outlived its tier TTL.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms
    }

    /// Record a read.
    pub fn touch(&mut self, now_ms: i64) {
        self.hit_count += 1;
        self.last_accessed_ms = now_ms;
    }
}
