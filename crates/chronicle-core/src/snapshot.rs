//! Snapshot store contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DomainError;

/// Point-in-time aggregate state. Never authoritative: the event stream is.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Stream the snapshot was taken from.
    pub aggregate_id: Uuid,
    /// Version of the last event folded into `state`.
    pub version: i64,
    /// Serialized aggregate state.
    pub state: serde_json::Value,
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
}

/// Keyed store of the latest snapshot per stream, last write wins.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Returns the latest snapshot for a stream, if any.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` on backend faults.
    async fn get(&self, aggregate_id: Uuid) -> Result<Option<Snapshot>, DomainError>;

    /// Stores a snapshot, replacing any previous one for the stream.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` on backend faults.
    async fn put(&self, snapshot: Snapshot) -> Result<(), DomainError>;
}

/// Snapshot store that never stores anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSnapshots;

#[async_trait]
impl SnapshotStore for NoSnapshots {
    async fn get(&self, _aggregate_id: Uuid) -> Result<Option<Snapshot>, DomainError> {
        Ok(None)
    }

    async fn put(&self, _snapshot: Snapshot) -> Result<(), DomainError> {
        Ok(())
    }
}
