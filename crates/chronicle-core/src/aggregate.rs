//! Aggregate root abstraction.

use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::DomainError;
use crate::event::DomainEvent;
use crate::repository::StoredEvent;

/// Trait for aggregate roots that reconstitute from event history.
///
/// Command handling appends events to the uncommitted list without applying
/// them; the aggregate store applies them once the commit succeeds.
pub trait AggregateRoot: Clone + Send + Sync + 'static {
    /// The event type this aggregate produces and consumes.
    type Event: DomainEvent + Clone;

    /// Serializable state captured in snapshots.
    type Snapshot: Serialize + DeserializeOwned + Send;

    /// Aggregate type name, stored with each commit.
    const AGGREGATE_TYPE: &'static str;

    /// Creates an empty aggregate at version 0.
    fn new(id: Uuid) -> Self;

    /// Returns the aggregate identifier.
    fn aggregate_id(&self) -> Uuid;

    /// Returns the current version (number of events applied).
    fn version(&self) -> i64;

    /// Apply an event to mutate internal state (used during reconstitution).
    /// Increments the version.
    fn apply(&mut self, event: &Self::Event);

    /// Returns uncommitted events produced by command handling.
    fn uncommitted_events(&self) -> &[Self::Event];

    /// Clears uncommitted events after persistence.
    fn clear_uncommitted_events(&mut self);

    /// Rebuilds a typed event from its stored form.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the payload does not decode.
    fn decode_event(stored: &StoredEvent) -> Result<Self::Event, DomainError>;

    /// Captures the state for a snapshot.
    fn to_snapshot(&self) -> Self::Snapshot;

    /// Restores an aggregate from snapshot state at `version`.
    fn from_snapshot(id: Uuid, version: i64, state: Self::Snapshot) -> Self;
}
