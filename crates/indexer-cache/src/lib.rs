//! Dependency-aware two-tier cache for the resilient indexer.
//!
//! ## Key Components
//!
//! - [`TieredCache`]: L1 (hot, recency-refreshing) and L2 (warm) LRU tiers
//!   with promotion/demotion and a key dependency graph
//! - [`DependencyGraph`]: symmetric forward/reverse dependency edges
//! - [`InvalidationRule`]: which key patterns an entity mutation invalidates
//! - [`KeyPattern`]: explicit `*` / `{entityId}` glob matcher
//! - [`CacheObserver`]: receives the low hit-rate warning
//!
//! ## Invariants
//!
//! - A key is resident in at most one tier.
//! - Dependency edges never outlive either endpoint.
//!
//! Concurrent workers share one cache instance. There is no per-key
//! locking: two workers invalidating and re-populating the same key can
//! interleave, leaving a stale entry until its TTL or the next
//! invalidation.

pub mod config;
pub mod engine;
pub mod entry;
pub mod graph;
pub mod pattern;
pub mod rules;
pub mod stats;

pub use config::CacheConfig;
pub use engine::{CacheTier, InvalidationReport, TieredCache};
pub use entry::CacheEntry;
pub use graph::DependencyGraph;
pub use pattern::{KeyPattern, PatternTemplate};
pub use rules::{default_rules, CompiledRule, InvalidationRule};
pub use stats::{CacheObserver, CacheStats};
