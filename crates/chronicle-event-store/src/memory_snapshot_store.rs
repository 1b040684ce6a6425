//! In-memory implementation of the `SnapshotStore` trait.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use chronicle_core::error::DomainError;
use chronicle_core::snapshot::{Snapshot, SnapshotStore};

/// Process-local snapshot store, last write wins per stream.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    snapshots: RwLock<HashMap<Uuid, Snapshot>>,
}

impl InMemorySnapshotStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of streams with a snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    /// Whether no snapshot has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.read().is_empty()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn get(&self, aggregate_id: Uuid) -> Result<Option<Snapshot>, DomainError> {
        Ok(self.snapshots.read().get(&aggregate_id).cloned())
    }

    async fn put(&self, snapshot: Snapshot) -> Result<(), DomainError> {
        self.snapshots.write().insert(snapshot.aggregate_id, snapshot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn snapshot(aggregate_id: Uuid, version: i64) -> Snapshot {
        Snapshot {
            aggregate_id,
            version,
            state: serde_json::json!({ "balance": version * 10 }),
            taken_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_get_returns_none_without_snapshot() {
        let store = InMemorySnapshotStore::new();

        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_replaces_previous_snapshot() {
        // Arrange
        let store = InMemorySnapshotStore::new();
        let aggregate_id = Uuid::new_v4();
        store.put(snapshot(aggregate_id, 10)).await.unwrap();

        // Act
        store.put(snapshot(aggregate_id, 20)).await.unwrap();

        // Assert
        let latest = store.get(aggregate_id).await.unwrap().unwrap();
        assert_eq!(latest.version, 20);
        assert_eq!(store.len(), 1);
    }
}
