//! Two-tier cache engine.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, trace, warn};

use indexer_types::{Clock, SystemClock, TaskOperation};

use crate::config::CacheConfig;
use crate::entry::CacheEntry;
use crate::graph::DependencyGraph;
use crate::pattern::KeyPattern;
use crate::rules::CompiledRule;
use crate::stats::{CacheObserver, CacheStats};

/// Tier a key currently lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    /// Hot tier
    L1,
    /// Warm tier
    L2,
}

/// Summary of one `invalidate` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InvalidationReport {
    /// Rules that applied to the mutation
    pub rules_applied: usize,
    /// Keys matched directly by rule patterns
    pub matched_keys: usize,
    /// Additional keys reached through reverse dependencies
    pub cascaded_keys: usize,
    /// Resident entries actually removed
    pub removed_entries: usize,
    /// Lock acquisitions used for removal
    pub batches: usize,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    demotions: AtomicU64,
    promotions: AtomicU64,
    invalidations: AtomicU64,
    expirations: AtomicU64,
}

struct CacheState {
    l1: LruCache<String, CacheEntry>,
    l2: LruCache<String, CacheEntry>,
    graph: DependencyGraph,
    window_hits: u64,
    window_misses: u64,
}

/// Dependency-aware two-tier LRU cache.
///
/// L1 is small and short-lived; reads refresh recency. L2 is larger and
/// longer-lived; reads do not refresh recency but count towards promotion.
pub struct TieredCache {
    config: CacheConfig,
    rules: Vec<CompiledRule>,
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState>,
    counters: Counters,
    observer: RwLock<Option<Arc<dyn CacheObserver>>>,
}

impl TieredCache {
    /// Create a cache using the system clock.
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a cache with an explicit clock.
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let l1_cap = NonZeroUsize::new(config.l1_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        let l2_cap = NonZeroUsize::new(config.l2_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        let rules = config.rules.iter().map(|r| r.compile()).collect();

        Self {
            rules,
            clock,
            state: Mutex::new(CacheState {
                l1: LruCache::new(l1_cap),
                l2: LruCache::new(l2_cap),
                graph: DependencyGraph::new(),
                window_hits: 0,
                window_misses: 0,
            }),
            counters: Counters::default(),
            observer: RwLock::new(None),
            config,
        }
    }

    /// Register the receiver of the low hit-rate warning.
    pub fn set_observer(&self, observer: Arc<dyn CacheObserver>) {
        *self.observer.write() = Some(observer);
    }

    /// Look up a key.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let now = self.clock.now_ms();
        let (value, window) = {
            let mut state = self.state.lock();
            let value = self.lookup(&mut state, key, now);
            if value.is_some() {
                state.window_hits += 1;
            } else {
                state.window_misses += 1;
            }
            (value, self.take_window(&mut state))
        };

        if value.is_some() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
        }

        if let Some((hits, misses)) = window {
            self.check_hit_rate(hits, misses);
        }
        value
    }

    /// Store a value in L1 and record its dependencies.
    pub fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        entity_type: &str,
        entity_id: &str,
        dependencies: &[String],
    ) {
        let now = self.clock.now_ms();
        let entry = CacheEntry::new(
            key,
            value,
            entity_type,
            entity_id,
            dependencies.to_vec(),
            now,
        );

        let mut state = self.state.lock();
        state.l1.pop(key);
        state.l2.pop(key);
        state.graph.set_dependencies(key, dependencies);
        self.insert_l1(&mut state, entry, now);
        trace!(key, deps = dependencies.len(), "Cached entry");
    }

    /// Remove a single key and its edges. Returns whether it was resident.
    pub fn remove(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        let removed = Self::remove_resident(&mut state, key);
        state.graph.remove_node(key);
        removed
    }

    /// Invalidate everything the rules for `(entity_type, operation)` name.
    ///
    /// Matching keys (resident entries and dependency targets) are expanded
    /// through reverse dependencies up to each rule's cascade depth, then
    /// removed in sub-batches, yielding to the runtime between batches.
    pub async fn invalidate(
        &self,
        entity_type: &str,
        entity_id: &str,
        operation: TaskOperation,
    ) -> InvalidationReport {
        let rules: Vec<&CompiledRule> = self
            .rules
            .iter()
            .filter(|r| r.applies_to(entity_type, operation))
            .collect();

        let mut report = InvalidationReport {
            rules_applied: rules.len(),
            ..Default::default()
        };
        if rules.is_empty() {
            trace!(entity_type, entity_id, %operation, "No invalidation rules apply");
            return report;
        }

        let (matched, collected) = {
            let state = self.state.lock();
            let mut matched: HashSet<String> = HashSet::new();
            let mut collected: HashSet<String> = HashSet::new();
            for rule in rules {
                let patterns: Vec<KeyPattern> =
                    rule.patterns.iter().map(|p| p.bind(entity_id)).collect();
                let rule_matches = Self::match_keys(&state, &patterns);
                collected.extend(
                    state
                        .graph
                        .collect_dependents(&rule_matches, rule.cascade_depth),
                );
                matched.extend(rule_matches);
            }
            (matched, collected)
        };

        report.matched_keys = matched.len();
        report.cascaded_keys = collected.len().saturating_sub(matched.len());

        let keys: Vec<String> = collected.into_iter().collect();
        let (removed, batches) = self.remove_in_batches(&keys).await;
        report.removed_entries = removed;
        report.batches = batches;

        debug!(
            entity_type,
            entity_id,
            %operation,
            matched = report.matched_keys,
            cascaded = report.cascaded_keys,
            removed = report.removed_entries,
            "Invalidated cache entries"
        );
        report
    }

    /// Remove the given keys plus dependents within `cascade_depth` hops.
    pub async fn invalidate_keys(&self, keys: &[String], cascade_depth: usize) -> usize {
        let collected: Vec<String> = {
            let state = self.state.lock();
            state
                .graph
                .collect_dependents(keys, cascade_depth)
                .into_iter()
                .collect()
        };
        self.remove_in_batches(&collected).await.0
    }

    /// Tier the key lives in, if resident.
    pub fn tier_of(&self, key: &str) -> Option<CacheTier> {
        let state = self.state.lock();
        if state.l1.contains(key) {
            Some(CacheTier::L1)
        } else if state.l2.contains(key) {
            Some(CacheTier::L2)
        } else {
            None
        }
    }

    /// Whether the key is resident in either tier (ignores TTL).
    pub fn contains(&self, key: &str) -> bool {
        self.tier_of(key).is_some()
    }

    /// Keys that depend directly on `key`.
    pub fn dependents(&self, key: &str) -> Vec<String> {
        self.state.lock().graph.dependents(key)
    }

    /// Total resident entries.
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state.l1.len() + state.l2.len()
    }

    /// Whether both tiers are empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry and edge.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.l1.clear();
        state.l2.clear();
        state.graph.clear();
    }

    /// Current metrics.
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let memory_bytes = state
            .l1
            .iter()
            .chain(state.l2.iter())
            .map(|(_, e)| e.size)
            .sum();

        CacheStats {
            hits,
            misses,
            hit_rate: CacheStats::rate(hits, misses),
            l1_entries: state.l1.len(),
            l2_entries: state.l2.len(),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            demotions: self.counters.demotions.load(Ordering::Relaxed),
            promotions: self.counters.promotions.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            memory_bytes,
            dependency_edges: state.graph.edge_count(),
        }
    }

    /// Whether the dependency graph is internally consistent.
    pub fn graph_is_consistent(&self) -> bool {
        self.state.lock().graph.is_symmetric()
    }

    fn lookup(&self, state: &mut CacheState, key: &str, now: i64) -> Option<serde_json::Value> {
        if let Some(expired) = state.l1.peek(key).map(|e| e.is_expired(now)) {
            if expired {
                self.expire(state, key);
                return None;
            }
            let entry = state.l1.get_mut(key)?;
            entry.touch(now);
            return Some(entry.value.clone());
        }

        let (value, promote) = {
            let entry = state.l2.peek_mut(key)?;
            if entry.is_expired(now) {
                (None, false)
            } else {
                entry.touch(now);
                (
                    Some(entry.value.clone()),
                    entry.hit_count >= self.config.promotion_threshold,
                )
            }
        };

        match value {
            None => {
                self.expire(state, key);
                None
            }
            Some(value) => {
                if promote {
                    if let Some(entry) = state.l2.pop(key) {
                        self.counters.promotions.fetch_add(1, Ordering::Relaxed);
                        trace!(key, hits = entry.hit_count, "Promoted entry to L1");
                        self.insert_l1(state, entry, now);
                    }
                }
                Some(value)
            }
        }
    }

    fn expire(&self, state: &mut CacheState, key: &str) {
        Self::remove_resident(state, key);
        state.graph.remove_node(key);
        self.counters.expirations.fetch_add(1, Ordering::Relaxed);
    }

    fn insert_l1(&self, state: &mut CacheState, mut entry: CacheEntry, now: i64) {
        entry.expires_at_ms = now + ttl_ms(self.config.l1_ttl_secs);
        if let Some((evicted_key, evicted)) = state.l1.push(entry.key.clone(), entry) {
            if evicted.hit_count > 1 {
                self.counters.demotions.fetch_add(1, Ordering::Relaxed);
                trace!(key = %evicted_key, hits = evicted.hit_count, "Demoted entry to L2");
                self.insert_l2(state, evicted, now);
            } else {
                state.graph.remove_node(&evicted_key);
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn insert_l2(&self, state: &mut CacheState, mut entry: CacheEntry, now: i64) {
        entry.expires_at_ms = now + ttl_ms(self.config.l2_ttl_secs);
        if let Some((evicted_key, _)) = state.l2.push(entry.key.clone(), entry) {
            state.graph.remove_node(&evicted_key);
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn remove_resident(state: &mut CacheState, key: &str) -> bool {
        state.l1.pop(key).is_some() || state.l2.pop(key).is_some()
    }

    fn match_keys(state: &CacheState, patterns: &[KeyPattern]) -> Vec<String> {
        let mut matched: HashSet<String> = HashSet::new();
        let mut needs_scan = false;

        for pattern in patterns {
            match pattern.as_literal() {
                Some(key) => {
                    let known = state.l1.contains(key)
                        || state.l2.contains(key)
                        || !state.graph.dependents(key).is_empty();
                    if known {
                        matched.insert(key.to_string());
                    }
                }
                None => needs_scan = true,
            }
        }

        if needs_scan {
            let wildcard: Vec<&KeyPattern> =
                patterns.iter().filter(|p| p.as_literal().is_none()).collect();
            let candidates = state
                .l1
                .iter()
                .map(|(k, _)| k)
                .chain(state.l2.iter().map(|(k, _)| k))
                .chain(state.graph.dependency_targets());
            for key in candidates {
                if wildcard.iter().any(|p| p.matches(key)) {
                    matched.insert(key.clone());
                }
            }
        }

        matched.into_iter().collect()
    }

    async fn remove_in_batches(&self, keys: &[String]) -> (usize, usize) {
        let batch_size = self.config.invalidation_batch_size.max(1);
        let mut removed = 0usize;
        let mut batches = 0usize;

        for batch in keys.chunks(batch_size) {
            {
                let mut state = self.state.lock();
                for key in batch {
                    if Self::remove_resident(&mut state, key) {
                        removed += 1;
                    }
                    state.graph.remove_node(key);
                }
            }
            batches += 1;
            tokio::task::yield_now().await;
        }

        self.counters
            .invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        (removed, batches)
    }

    fn take_window(&self, state: &mut CacheState) -> Option<(u64, u64)> {
        let total = state.window_hits + state.window_misses;
        if total < self.config.hit_rate_min_samples.max(1) {
            return None;
        }
        let window = (state.window_hits, state.window_misses);
        state.window_hits = 0;
        state.window_misses = 0;
        Some(window)
    }

    fn check_hit_rate(&self, hits: u64, misses: u64) {
        let rate = CacheStats::rate(hits, misses);
        if rate >= self.config.hit_rate_warning {
            return;
        }
        warn!(
            hit_rate = rate,
            lookups = hits + misses,
            threshold = self.config.hit_rate_warning,
            "Cache hit rate below threshold"
        );
        let observer = self.observer.read().clone();
        if let Some(observer) = observer {
            let mut stats = self.stats();
            stats.hit_rate = rate;
            observer.on_low_hit_rate(&stats);
        }
    }
}

fn ttl_ms(secs: u64) -> i64 {
    i64::try_from(secs.saturating_mul(1000)).unwrap_or(i64::MAX / 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::InvalidationRule;
    use indexer_types::ManualClock;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn cache_with(config: CacheConfig) -> (TieredCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (TieredCache::with_clock(config, clock.clone()), clock)
    }

    fn deps(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn assert_single_tier(cache: &TieredCache) {
        let state = cache.state.lock();
        for (key, _) in state.l1.iter() {
            assert!(!state.l2.contains(key), "{key} resident in both tiers");
        }
    }

    #[test]
    fn test_set_then_get_hits_l1() {
        let (cache, _) = cache_with(CacheConfig::default());
        cache.set("k1", json!({"v": 1}), "page", "p1", &[]);

        assert_eq!(cache.get("k1"), Some(json!({"v": 1})));
        assert_eq!(cache.tier_of("k1"), Some(CacheTier::L1));
        assert_eq!(cache.get("missing"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 0.5);
    }

    #[test]
    fn test_l1_eviction_demotes_hot_entries() {
        let (cache, _) = cache_with(CacheConfig::default().with_sizes(1, 10));
        cache.set("hot", json!(1), "page", "p1", &[]);
        cache.get("hot");
        cache.get("hot");

        cache.set("new", json!(2), "page", "p2", &[]);
        assert_eq!(cache.tier_of("hot"), Some(CacheTier::L2));
        assert_eq!(cache.tier_of("new"), Some(CacheTier::L1));
        assert_eq!(cache.stats().demotions, 1);
        assert_single_tier(&cache);
    }

    #[test]
    fn test_l1_eviction_drops_cold_entries_and_edges() {
        let (cache, _) = cache_with(CacheConfig::default().with_sizes(1, 10));
        cache.set("cold", json!(1), "page", "p1", &deps(&["dep"]));
        cache.set("new", json!(2), "page", "p2", &[]);

        assert_eq!(cache.tier_of("cold"), None);
        assert!(cache.dependents("dep").is_empty());
        assert_eq!(cache.stats().evictions, 1);
        assert!(cache.graph_is_consistent());
    }

    #[test]
    fn test_l2_hits_promote_at_threshold() {
        let (cache, _) = cache_with(CacheConfig::default().with_sizes(1, 10));
        cache.set("a", json!("a"), "page", "p1", &[]);
        cache.get("a");
        cache.get("a");
        cache.set("b", json!("b"), "page", "p2", &[]);
        assert_eq!(cache.tier_of("a"), Some(CacheTier::L2));

        // hit_count is already 2; the next L2 hit reaches the threshold of 3
        assert_eq!(cache.get("a"), Some(json!("a")));
        assert_eq!(cache.tier_of("a"), Some(CacheTier::L1));
        assert_eq!(cache.stats().promotions, 1);
        assert_single_tier(&cache);
    }

    #[test]
    fn test_set_replaces_l2_copy() {
        let (cache, _) = cache_with(CacheConfig::default().with_sizes(1, 10));
        cache.set("a", json!(1), "page", "p1", &[]);
        cache.get("a");
        cache.get("a");
        cache.set("b", json!(2), "page", "p2", &[]);
        assert_eq!(cache.tier_of("a"), Some(CacheTier::L2));

        cache.set("a", json!(3), "page", "p1", &[]);
        assert_eq!(cache.tier_of("a"), Some(CacheTier::L1));
        assert_single_tier(&cache);
    }

    #[test]
    fn test_ttl_expiry_is_a_miss() {
        let (cache, clock) = cache_with(CacheConfig::default().with_ttls(1, 10));
        cache.set("k", json!(1), "page", "p1", &deps(&["d"]));
        clock.advance_ms(1_000);

        assert_eq!(cache.get("k"), None);
        assert!(!cache.contains("k"));
        assert!(cache.dependents("d").is_empty());
        assert_eq!(cache.stats().expirations, 1);
    }

    #[tokio::test]
    async fn test_invalidate_through_dependency_target() {
        let rules = vec![InvalidationRule::new(
            "workspace",
            TaskOperation::Update,
            &["workspace:*"],
            1,
        )];
        let (cache, _) = cache_with(CacheConfig::default().with_rules(rules));
        cache.set("k1", json!("v"), "page", "p1", &deps(&["workspace:w1"]));

        let report = cache
            .invalidate("workspace", "w1", TaskOperation::Update)
            .await;
        assert_eq!(report.rules_applied, 1);
        assert_eq!(report.matched_keys, 1);
        assert_eq!(report.cascaded_keys, 1);
        assert_eq!(report.removed_entries, 1);
        assert_eq!(cache.get("k1"), None);
        assert!(cache.graph_is_consistent());
    }

    #[tokio::test]
    async fn test_cascade_depth_is_bounded() {
        let rules = vec![InvalidationRule::new(
            "page",
            TaskOperation::Update,
            &["page:{entityId}"],
            1,
        )];
        let (cache, _) = cache_with(CacheConfig::default().with_rules(rules));
        cache.set("page:p1", json!(0), "page", "p1", &[]);
        cache.set("summary", json!(1), "page", "p1", &deps(&["page:p1"]));
        cache.set("digest", json!(2), "page", "p1", &deps(&["summary"]));

        cache.invalidate("page", "p1", TaskOperation::Update).await;
        assert!(!cache.contains("page:p1"));
        assert!(!cache.contains("summary"));
        // two hops away, outside cascade depth 1
        assert!(cache.contains("digest"));
    }

    #[tokio::test]
    async fn test_invalidate_only_matching_entity() {
        let (cache, _) = cache_with(CacheConfig::default());
        cache.set("page:p1", json!(1), "page", "p1", &[]);
        cache.set("page:p1:summary", json!(1), "page", "p1", &[]);
        cache.set("page:p2", json!(2), "page", "p2", &[]);

        let report = cache.invalidate("page", "p1", TaskOperation::Update).await;
        assert_eq!(report.removed_entries, 2);
        assert!(cache.contains("page:p2"));
        assert_eq!(cache.stats().invalidations, 2);
    }

    #[tokio::test]
    async fn test_invalidate_without_rules_is_noop() {
        let (cache, _) = cache_with(CacheConfig::default().with_rules(vec![]));
        cache.set("page:p1", json!(1), "page", "p1", &[]);
        let report = cache.invalidate("page", "p1", TaskOperation::Delete).await;
        assert_eq!(report, InvalidationReport::default());
        assert!(cache.contains("page:p1"));
    }

    #[tokio::test]
    async fn test_invalidation_uses_sub_batches() {
        let rules = vec![InvalidationRule::new(
            "workspace",
            TaskOperation::Delete,
            &["ws:{entityId}:*"],
            0,
        )];
        let config = CacheConfig::default()
            .with_rules(rules)
            .with_invalidation_batch_size(10);
        let (cache, _) = cache_with(config);
        for i in 0..25 {
            cache.set(&format!("ws:w1:{i}"), json!(i), "workspace", "w1", &[]);
        }

        let report = cache.invalidate("workspace", "w1", TaskOperation::Delete).await;
        assert_eq!(report.removed_entries, 25);
        assert_eq!(report.batches, 3);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_memory_usage_tracks_entries() {
        let (cache, _) = cache_with(CacheConfig::default());
        cache.set("k", json!("abc"), "page", "p1", &[]);
        assert_eq!(cache.stats().memory_bytes, 1 + 5);
        cache.remove("k");
        assert_eq!(cache.stats().memory_bytes, 0);
    }

    struct CountingObserver(AtomicUsize);

    impl CacheObserver for CountingObserver {
        fn on_low_hit_rate(&self, stats: &CacheStats) {
            assert!(stats.hit_rate < 0.5);
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_low_hit_rate_notifies_observer_once_per_window() {
        let (cache, _) = cache_with(CacheConfig::default());
        let observer = Arc::new(CountingObserver(AtomicUsize::new(0)));
        cache.set_observer(observer.clone());

        for i in 0..99 {
            cache.get(&format!("missing-{i}"));
        }
        assert_eq!(observer.0.load(Ordering::SeqCst), 0);

        cache.get("missing-last");
        assert_eq!(observer.0.load(Ordering::SeqCst), 1);

        for i in 0..50 {
            cache.get(&format!("again-{i}"));
        }
        assert_eq!(observer.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_healthy_hit_rate_is_silent() {
        let (cache, _) = cache_with(CacheConfig::default());
        let observer = Arc::new(CountingObserver(AtomicUsize::new(0)));
        cache.set_observer(observer.clone());
        cache.set("k", json!(1), "page", "p1", &[]);

        for _ in 0..200 {
            cache.get("k");
        }
        assert_eq!(observer.0.load(Ordering::SeqCst), 0);
    }
}
