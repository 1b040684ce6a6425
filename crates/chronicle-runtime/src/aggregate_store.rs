//! Loading and saving event-sourced aggregates.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, warn};
use uuid::Uuid;

use chronicle_core::aggregate::AggregateRoot;
use chronicle_core::clock::SharedClock;
use chronicle_core::config::AggregateStoreSettings;
use chronicle_core::error::DomainError;
use chronicle_core::repository::{Commit, EventStore, StoredEvent, read_stream};
use chronicle_core::snapshot::{Snapshot, SnapshotStore};

/// Result of a successful save.
#[derive(Clone)]
pub struct SaveOutcome<A: AggregateRoot> {
    /// The aggregate with the committed events applied.
    pub aggregate: A,
    /// Commit id the events were written under.
    pub commit_id: Uuid,
    /// Stream version after the commit.
    pub version: i64,
    /// Events written by this save. Empty for a duplicate.
    pub events: Vec<A::Event>,
    /// The commit had already been applied by an earlier attempt.
    pub duplicate: bool,
}

impl<A: AggregateRoot> std::fmt::Debug for SaveOutcome<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaveOutcome")
            .field("aggregate_id", &self.aggregate.aggregate_id())
            .field("commit_id", &self.commit_id)
            .field("version", &self.version)
            .field("events", &self.events.len())
            .field("duplicate", &self.duplicate)
            .finish()
    }
}

/// Load and persist aggregates of type `A`.
#[async_trait]
pub trait AggregateStore<A: AggregateRoot>: Send + Sync {
    /// Loads an aggregate. A stream with no events yields a new aggregate at
    /// version 0.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` if the stream cannot be read or decoded.
    async fn get(&self, aggregate_id: Uuid) -> Result<A, DomainError>;

    /// Commits the aggregate's uncommitted events under `commit_id`, expecting
    /// the stream to be at the aggregate's version.
    ///
    /// # Errors
    ///
    /// - `DomainError::ConcurrencyConflict` if another writer got there first.
    /// - Any storage error from the event store.
    async fn save(&self, aggregate: A, commit_id: Uuid) -> Result<SaveOutcome<A>, DomainError>;
}

/// Aggregate store backed by an event store and a snapshot store.
pub struct EventSourcedAggregateStore<A> {
    events: Arc<dyn EventStore>,
    snapshots: Arc<dyn SnapshotStore>,
    settings: AggregateStoreSettings,
    clock: SharedClock,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A> std::fmt::Debug for EventSourcedAggregateStore<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSourcedAggregateStore")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl<A: AggregateRoot> EventSourcedAggregateStore<A> {
    /// Creates a store over the given backends.
    #[must_use]
    pub fn new(
        events: Arc<dyn EventStore>,
        snapshots: Arc<dyn SnapshotStore>,
        settings: AggregateStoreSettings,
        clock: SharedClock,
    ) -> Self {
        Self {
            events,
            snapshots,
            settings,
            clock,
            _aggregate: PhantomData,
        }
    }

    async fn restore(&self, aggregate_id: Uuid) -> A {
        let snapshot = match self.snapshots.get(aggregate_id).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return A::new(aggregate_id),
            Err(err) => {
                warn!(%aggregate_id, error = %err, "snapshot unavailable, replaying full stream");
                return A::new(aggregate_id);
            }
        };
        match serde_json::from_value::<A::Snapshot>(snapshot.state) {
            Ok(state) => A::from_snapshot(aggregate_id, snapshot.version, state),
            Err(err) => {
                warn!(
                    %aggregate_id,
                    version = snapshot.version,
                    error = %err,
                    "snapshot does not decode, replaying full stream"
                );
                A::new(aggregate_id)
            }
        }
    }

    fn snapshot_if_due(&self, aggregate: &A, previous_version: i64) {
        let interval = self.settings.snapshot_interval;
        let version = aggregate.version();
        if interval <= 0 || version / interval <= previous_version / interval {
            return;
        }
        let aggregate_id = aggregate.aggregate_id();
        let state = match serde_json::to_value(aggregate.to_snapshot()) {
            Ok(state) => state,
            Err(err) => {
                warn!(%aggregate_id, version, error = %err, "snapshot state does not encode");
                return;
            }
        };
        let snapshot = Snapshot {
            aggregate_id,
            version,
            state,
            taken_at: self.clock.now(),
        };
        let snapshots = Arc::clone(&self.snapshots);
        tokio::spawn(async move {
            match snapshots.put(snapshot).await {
                Ok(()) => debug!(%aggregate_id, version, "snapshot written"),
                Err(err) => warn!(%aggregate_id, version, error = %err, "snapshot write failed"),
            }
        });
    }
}

#[async_trait]
impl<A: AggregateRoot> AggregateStore<A> for EventSourcedAggregateStore<A> {
    async fn get(&self, aggregate_id: Uuid) -> Result<A, DomainError> {
        let mut aggregate = self.restore(aggregate_id).await;
        let mut stream = read_stream(self.events.as_ref(), aggregate_id, aggregate.version());
        while let Some(stored) = stream.next().await {
            let stored = stored?;
            let expected = aggregate.version() + 1;
            if stored.sequence_number != expected {
                return Err(DomainError::Infrastructure(format!(
                    "stream {aggregate_id} returned version {} where {expected} was expected",
                    stored.sequence_number
                )));
            }
            let event = A::decode_event(&stored)?;
            aggregate.apply(&event);
        }
        Ok(aggregate)
    }

    async fn save(&self, mut aggregate: A, commit_id: Uuid) -> Result<SaveOutcome<A>, DomainError> {
        let aggregate_id = aggregate.aggregate_id();
        let expected_version = aggregate.version();
        let events = aggregate.uncommitted_events().to_vec();
        if events.is_empty() {
            return Ok(SaveOutcome {
                aggregate,
                commit_id,
                version: expected_version,
                events,
                duplicate: false,
            });
        }

        let commit = Commit {
            commit_id,
            aggregate_id,
            aggregate_type: A::AGGREGATE_TYPE.to_owned(),
            expected_version,
            events: events.iter().map(StoredEvent::from_domain).collect(),
            committed_at: self.clock.now(),
        };
        match self.events.append(commit).await {
            Ok(version) => {
                for event in &events {
                    aggregate.apply(event);
                }
                aggregate.clear_uncommitted_events();
                debug!(%aggregate_id, %commit_id, version, events = events.len(), "aggregate saved");
                self.snapshot_if_due(&aggregate, expected_version);
                Ok(SaveOutcome {
                    aggregate,
                    commit_id,
                    version,
                    events,
                    duplicate: false,
                })
            }
            Err(DomainError::DuplicateCommit {
                committed_version, ..
            }) => {
                debug!(%aggregate_id, %commit_id, committed_version, "commit already applied");
                let aggregate = self.get(aggregate_id).await?;
                Ok(SaveOutcome {
                    aggregate,
                    commit_id,
                    version: committed_version,
                    events: Vec::new(),
                    duplicate: true,
                })
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chronicle_core::clock::SystemClock;
    use chronicle_core::config::EventStoreSettings;
    use chronicle_event_store::{InMemoryEventStore, InMemorySnapshotStore};
    use chronicle_test_support::FailingEventStore;

    use super::*;
    use crate::testing::{Counter, CounterSnapshot};

    fn store(
        events: Arc<dyn EventStore>,
        snapshots: Arc<dyn SnapshotStore>,
        snapshot_interval: i64,
    ) -> EventSourcedAggregateStore<Counter> {
        EventSourcedAggregateStore::new(
            events,
            snapshots,
            AggregateStoreSettings {
                snapshot_interval,
                ..AggregateStoreSettings::default()
            },
            SystemClock::shared(),
        )
    }

    async fn wait_for_snapshot(snapshots: &InMemorySnapshotStore, id: Uuid, version: i64) {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(Some(snapshot)) = snapshots.get(id).await {
                    if snapshot.version == version {
                        return;
                    }
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_get_unknown_aggregate_returns_version_zero() {
        let store = store(
            Arc::new(InMemoryEventStore::default()),
            Arc::new(InMemorySnapshotStore::new()),
            0,
        );

        let counter = store.get(Uuid::new_v4()).await.unwrap();

        assert_eq!(counter.version(), 0);
        assert_eq!(counter.total(), 0);
    }

    #[tokio::test]
    async fn test_save_then_get_replays_events() {
        // Arrange
        let store = store(
            Arc::new(InMemoryEventStore::default()),
            Arc::new(InMemorySnapshotStore::new()),
            0,
        );
        let id = Uuid::new_v4();
        let mut counter = store.get(id).await.unwrap();
        counter.increment(5).unwrap();
        counter.increment(7).unwrap();

        // Act
        let outcome = store.save(counter, Uuid::new_v4()).await.unwrap();
        let loaded = store.get(id).await.unwrap();

        // Assert
        assert_eq!(outcome.version, 2);
        assert_eq!(outcome.events.len(), 2);
        assert!(outcome.aggregate.uncommitted_events().is_empty());
        assert_eq!(outcome.aggregate.version(), 2);
        assert_eq!(loaded.version(), 2);
        assert_eq!(loaded.total(), 12);
    }

    #[tokio::test]
    async fn test_save_without_events_does_not_touch_the_stream() {
        let events = Arc::new(InMemoryEventStore::default());
        let store = store(events.clone(), Arc::new(InMemorySnapshotStore::new()), 0);
        let id = Uuid::new_v4();

        let outcome = store.save(Counter::new(id), Uuid::new_v4()).await.unwrap();

        assert_eq!(outcome.version, 0);
        assert_eq!(events.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_stale_save_surfaces_conflict() {
        // Arrange
        let store = store(
            Arc::new(InMemoryEventStore::default()),
            Arc::new(InMemorySnapshotStore::new()),
            0,
        );
        let id = Uuid::new_v4();
        let mut first = store.get(id).await.unwrap();
        let mut second = first.clone();
        first.increment(1).unwrap();
        second.increment(2).unwrap();
        store.save(first, Uuid::new_v4()).await.unwrap();

        // Act
        let result = store.save(second, Uuid::new_v4()).await;

        // Assert
        assert!(matches!(
            result,
            Err(DomainError::ConcurrencyConflict {
                expected: 0,
                actual: 1,
                ..
            })
        ));
        assert_eq!(store.get(id).await.unwrap().total(), 1);
    }

    #[tokio::test]
    async fn test_replayed_commit_is_reported_as_duplicate() {
        // Arrange
        let store = store(
            Arc::new(InMemoryEventStore::new(EventStoreSettings::default())),
            Arc::new(InMemorySnapshotStore::new()),
            0,
        );
        let id = Uuid::new_v4();
        let commit_id = Uuid::new_v4();
        let mut counter = store.get(id).await.unwrap();
        counter.increment(3).unwrap();
        let retry = counter.clone();
        store.save(counter, commit_id).await.unwrap();

        // Act
        let outcome = store.save(retry, commit_id).await.unwrap();

        // Assert
        assert!(outcome.duplicate);
        assert_eq!(outcome.version, 1);
        assert!(outcome.events.is_empty());
        assert_eq!(outcome.aggregate.total(), 3);
        assert_eq!(store.get(id).await.unwrap().version(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_written_when_interval_crossed() {
        // Arrange
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        let store = store(
            Arc::new(InMemoryEventStore::default()),
            snapshots.clone(),
            3,
        );
        let id = Uuid::new_v4();
        let mut counter = store.get(id).await.unwrap();
        counter.increment(1).unwrap();
        counter.increment(1).unwrap();
        let counter = store.save(counter, Uuid::new_v4()).await.unwrap().aggregate;
        assert!(snapshots.get(id).await.unwrap().is_none());
        let mut counter = counter;

        // Act
        counter.increment(10).unwrap();
        store.save(counter, Uuid::new_v4()).await.unwrap();

        // Assert
        wait_for_snapshot(&snapshots, id, 3).await;
        let snapshot = snapshots.get(id).await.unwrap().unwrap();
        let state: CounterSnapshot = serde_json::from_value(snapshot.state).unwrap();
        assert_eq!(state.total, 12);
    }

    #[tokio::test]
    async fn test_get_applies_only_events_after_snapshot() {
        // Arrange
        let events = Arc::new(InMemoryEventStore::default());
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        let store = store(events.clone(), snapshots.clone(), 0);
        let id = Uuid::new_v4();
        let mut counter = store.get(id).await.unwrap();
        counter.increment(1).unwrap();
        counter.increment(2).unwrap();
        counter.increment(4).unwrap();
        store.save(counter, Uuid::new_v4()).await.unwrap();
        // A snapshot at version 2 that disagrees with the stream shows which
        // events were replayed.
        snapshots
            .put(Snapshot {
                aggregate_id: id,
                version: 2,
                state: serde_json::json!({ "total": 100 }),
                taken_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        // Act
        let loaded = store.get(id).await.unwrap();

        // Assert
        assert_eq!(loaded.version(), 3);
        assert_eq!(loaded.total(), 104);
    }

    #[tokio::test]
    async fn test_undecodable_snapshot_falls_back_to_full_replay() {
        let events = Arc::new(InMemoryEventStore::default());
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        let store = store(events, snapshots.clone(), 0);
        let id = Uuid::new_v4();
        let mut counter = store.get(id).await.unwrap();
        counter.increment(6).unwrap();
        store.save(counter, Uuid::new_v4()).await.unwrap();
        snapshots
            .put(Snapshot {
                aggregate_id: id,
                version: 1,
                state: serde_json::json!("garbage"),
                taken_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        let loaded = store.get(id).await.unwrap();

        assert_eq!(loaded.version(), 1);
        assert_eq!(loaded.total(), 6);
    }

    #[tokio::test]
    async fn test_storage_outage_propagates() {
        let store = store(
            Arc::new(FailingEventStore::unavailable()),
            Arc::new(InMemorySnapshotStore::new()),
            0,
        );

        let result = store.get(Uuid::new_v4()).await;

        assert!(matches!(result, Err(DomainError::StorageUnavailable(_))));
    }
}
