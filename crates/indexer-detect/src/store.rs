//! Persistence of indexed snapshots.

use std::collections::HashMap;

use parking_lot::RwLock;

use indexer_types::IndexedSnapshot;

use crate::error::DetectError;

/// Storage for the last indexed snapshot of each entity.
///
/// Implementations must be thread-safe; the processor shares one store
/// across all partitions.
pub trait SnapshotStore: Send + Sync {
    /// Fetch the snapshot of an entity, if it was ever indexed.
    fn get(&self, entity_type: &str, entity_id: &str)
        -> Result<Option<IndexedSnapshot>, DetectError>;

    /// Insert or overwrite the snapshot of an entity.
    fn put(&self, snapshot: IndexedSnapshot) -> Result<(), DetectError>;

    /// Remove the snapshot of an entity. Returns whether one existed.
    fn remove(&self, entity_type: &str, entity_id: &str) -> Result<bool, DetectError>;
}

/// Process-local snapshot store.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    snapshots: RwLock<HashMap<(String, String), IndexedSnapshot>>,
}

impl InMemorySnapshotStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored snapshots.
    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.snapshots.read().is_empty()
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn get(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<IndexedSnapshot>, DetectError> {
        let key = (entity_type.to_string(), entity_id.to_string());
        Ok(self.snapshots.read().get(&key).cloned())
    }

    fn put(&self, snapshot: IndexedSnapshot) -> Result<(), DetectError> {
        let key = (
            snapshot.fingerprint.entity_type.clone(),
            snapshot.fingerprint.entity_id.clone(),
        );
        self.snapshots.write().insert(key, snapshot);
        Ok(())
    }

    fn remove(&self, entity_type: &str, entity_id: &str) -> Result<bool, DetectError> {
        let key = (entity_type.to_string(), entity_id.to_string());
        Ok(self.snapshots.write().remove(&key).is_some())
    }
}
