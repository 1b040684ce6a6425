//! Sliding-expiration caches in front of the aggregate and saga stores.
//!
//! A cached instance is never handed out by reference: every hit returns a
//! clone, and a successful save replaces the entry with the saved instance.
//! Any failed save evicts the entry so the next load goes to the store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::trace;
use uuid::Uuid;

use chronicle_core::aggregate::AggregateRoot;
use chronicle_core::error::DomainError;
use chronicle_core::saga::{SagaInstance, SagaState, ScheduledTimeout, saga_id};

use crate::aggregate_store::{AggregateStore, SaveOutcome};
use crate::saga_store::{SagaSaveOutcome, SagaStore};

struct CacheEntry<V> {
    value: V,
    last_access: Instant,
}

/// Map whose entries expire `ttl` after their last access.
pub struct SlidingCache<V> {
    entries: Mutex<HashMap<Uuid, CacheEntry<V>>>,
    ttl: Duration,
}

impl<V> std::fmt::Debug for SlidingCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingCache")
            .field("entries", &self.entries.lock().len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl<V: Clone> SlidingCache<V> {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Returns a clone of the entry and refreshes its expiry. Expired entries
    /// are dropped.
    pub fn get(&self, key: Uuid) -> Option<V> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        let entry = entries.get_mut(&key)?;
        if now.duration_since(entry.last_access) < self.ttl {
            entry.last_access = now;
            return Some(entry.value.clone());
        }
        entries.remove(&key);
        None
    }

    /// Inserts or replaces an entry.
    pub fn insert(&self, key: Uuid, value: V) {
        self.entries.lock().insert(
            key,
            CacheEntry {
                value,
                last_access: Instant::now(),
            },
        );
    }

    /// Removes an entry.
    pub fn evict(&self, key: Uuid) {
        self.entries.lock().remove(&key);
    }

    /// Keeps only the entries for which `keep` returns `true`.
    pub fn retain(&self, mut keep: impl FnMut(&V) -> bool) {
        self.entries.lock().retain(|_, entry| keep(&entry.value));
    }

    /// Number of entries, expired ones included until next touched.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache holds no entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Caching decorator for an [`AggregateStore`].
pub struct CachedAggregateStore<A> {
    inner: Arc<dyn AggregateStore<A>>,
    cache: SlidingCache<A>,
}

impl<A: AggregateRoot> std::fmt::Debug for CachedAggregateStore<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedAggregateStore")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl<A: AggregateRoot> CachedAggregateStore<A> {
    /// Wraps `inner` with a cache whose entries live `sliding_expiration`
    /// past their last access.
    #[must_use]
    pub fn new(inner: Arc<dyn AggregateStore<A>>, sliding_expiration: Duration) -> Self {
        Self {
            inner,
            cache: SlidingCache::new(sliding_expiration),
        }
    }

    /// The underlying cache.
    #[must_use]
    pub fn cache(&self) -> &SlidingCache<A> {
        &self.cache
    }
}

#[async_trait]
impl<A: AggregateRoot> AggregateStore<A> for CachedAggregateStore<A> {
    async fn get(&self, aggregate_id: Uuid) -> Result<A, DomainError> {
        if let Some(aggregate) = self.cache.get(aggregate_id) {
            trace!(%aggregate_id, version = aggregate.version(), "aggregate cache hit");
            return Ok(aggregate);
        }
        let aggregate = self.inner.get(aggregate_id).await?;
        if aggregate.version() > 0 {
            self.cache.insert(aggregate_id, aggregate.clone());
        }
        Ok(aggregate)
    }

    async fn save(&self, aggregate: A, commit_id: Uuid) -> Result<SaveOutcome<A>, DomainError> {
        let aggregate_id = aggregate.aggregate_id();
        match self.inner.save(aggregate, commit_id).await {
            Ok(outcome) => {
                if outcome.aggregate.version() > 0 {
                    self.cache.insert(aggregate_id, outcome.aggregate.clone());
                }
                Ok(outcome)
            }
            Err(err) => {
                trace!(%aggregate_id, error = %err, "evicting aggregate after failed save");
                self.cache.evict(aggregate_id);
                Err(err)
            }
        }
    }
}

/// Caching decorator for a [`SagaStore`].
pub struct CachedSagaStore<S> {
    inner: Arc<dyn SagaStore<S>>,
    cache: SlidingCache<SagaInstance<S>>,
}

impl<S: SagaState> std::fmt::Debug for CachedSagaStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedSagaStore")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl<S: SagaState> CachedSagaStore<S> {
    /// Wraps `inner` with a cache whose entries live `sliding_expiration`
    /// past their last access.
    #[must_use]
    pub fn new(inner: Arc<dyn SagaStore<S>>, sliding_expiration: Duration) -> Self {
        Self {
            inner,
            cache: SlidingCache::new(sliding_expiration),
        }
    }
}

#[async_trait]
impl<S: SagaState> SagaStore<S> for CachedSagaStore<S> {
    async fn get(&self, correlation_id: Uuid) -> Result<Option<SagaInstance<S>>, DomainError> {
        let key = saga_id(S::SAGA_TYPE, correlation_id);
        if let Some(saga) = self.cache.get(key) {
            return Ok(Some(saga));
        }
        let saga = self.inner.get(correlation_id).await?;
        if let Some(saga) = &saga {
            self.cache.insert(key, saga.clone());
        }
        Ok(saga)
    }

    async fn save(
        &self,
        saga: SagaInstance<S>,
        commit_id: Uuid,
    ) -> Result<SagaSaveOutcome<S>, DomainError> {
        let key = saga.id();
        match self.inner.save(saga, commit_id).await {
            Ok(outcome) => {
                self.cache.insert(key, outcome.saga.clone());
                Ok(outcome)
            }
            Err(err) => {
                self.cache.evict(key);
                Err(err)
            }
        }
    }

    async fn scheduled_timeouts(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<ScheduledTimeout>, DomainError> {
        self.inner.scheduled_timeouts(before).await
    }

    async fn purge_completed(&self) -> Result<u64, DomainError> {
        let purged = self.inner.purge_completed().await?;
        self.cache.retain(|saga| !saga.is_completed());
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use chronicle_core::clock::SystemClock;
    use chronicle_core::config::AggregateStoreSettings;
    use chronicle_core::repository::EventStore;
    use chronicle_event_store::{InMemoryEventStore, InMemorySagaRepository, InMemorySnapshotStore};

    use super::*;
    use crate::aggregate_store::EventSourcedAggregateStore;
    use crate::saga_store::PersistentSagaStore;
    use crate::testing::{Counter, Tally};

    fn cached(events: Arc<dyn EventStore>, ttl: Duration) -> CachedAggregateStore<Counter> {
        let inner = EventSourcedAggregateStore::<Counter>::new(
            events,
            Arc::new(InMemorySnapshotStore::new()),
            AggregateStoreSettings::default(),
            SystemClock::shared(),
        );
        CachedAggregateStore::new(Arc::new(inner), ttl)
    }

    #[test]
    fn test_sliding_cache_expires_after_idle_period() {
        // Arrange
        let cache = SlidingCache::new(Duration::from_millis(20));
        let key = Uuid::new_v4();
        cache.insert(key, 7);

        // Act
        let fresh = cache.get(key);
        std::thread::sleep(Duration::from_millis(40));
        let stale = cache.get(key);

        // Assert
        assert_eq!(fresh, Some(7));
        assert_eq!(stale, None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_cache_hit_matches_fresh_load() {
        // Arrange
        let events = Arc::new(InMemoryEventStore::default());
        let store = cached(events.clone(), Duration::from_secs(60));
        let id = Uuid::new_v4();
        let mut counter = store.get(id).await.unwrap();
        counter.increment(4).unwrap();
        store.save(counter, Uuid::new_v4()).await.unwrap();

        // Act
        let hit = store.get(id).await.unwrap();
        let fresh = cached(events, Duration::from_secs(60)).get(id).await.unwrap();

        // Assert
        assert_eq!(store.cache().len(), 1);
        assert_eq!(hit.version(), fresh.version());
        assert_eq!(hit.total(), fresh.total());
    }

    #[tokio::test]
    async fn test_cache_hit_does_not_read_the_stream() {
        // Arrange
        let events = Arc::new(InMemoryEventStore::default());
        let store = cached(events.clone(), Duration::from_secs(60));
        let uncached = EventSourcedAggregateStore::<Counter>::new(
            events,
            Arc::new(InMemorySnapshotStore::new()),
            AggregateStoreSettings::default(),
            SystemClock::shared(),
        );
        let id = Uuid::new_v4();
        let mut counter = store.get(id).await.unwrap();
        counter.increment(1).unwrap();
        store.save(counter, Uuid::new_v4()).await.unwrap();
        let mut behind_the_cache = uncached.get(id).await.unwrap();
        behind_the_cache.increment(5).unwrap();
        uncached.save(behind_the_cache, Uuid::new_v4()).await.unwrap();

        // Act
        let counter = store.get(id).await.unwrap();

        // Assert
        assert_eq!(counter.version(), 1);
        assert_eq!(counter.total(), 1);
        store.cache().evict(id);
        assert_eq!(store.get(id).await.unwrap().total(), 6);
    }

    #[tokio::test]
    async fn test_conflicting_save_evicts_stale_entry() {
        // Arrange
        let events = Arc::new(InMemoryEventStore::default());
        let store = cached(events.clone(), Duration::from_secs(60));
        let other_writer = cached(events, Duration::from_secs(60));
        let id = Uuid::new_v4();
        let mut counter = store.get(id).await.unwrap();
        counter.increment(1).unwrap();
        store.save(counter, Uuid::new_v4()).await.unwrap();
        let mut theirs = other_writer.get(id).await.unwrap();
        theirs.increment(10).unwrap();
        other_writer.save(theirs, Uuid::new_v4()).await.unwrap();

        // Act
        let mut stale = store.get(id).await.unwrap();
        stale.increment(100).unwrap();
        let result = store.save(stale, Uuid::new_v4()).await;
        let reloaded = store.get(id).await.unwrap();

        // Assert
        assert!(matches!(result, Err(DomainError::ConcurrencyConflict { .. })));
        assert_eq!(reloaded.version(), 2);
        assert_eq!(reloaded.total(), 11);
    }

    #[tokio::test]
    async fn test_saga_cache_updates_on_save_and_drops_purged_sagas() {
        // Arrange
        let inner = PersistentSagaStore::<Tally>::new(Arc::new(InMemorySagaRepository::new()));
        let store = CachedSagaStore::new(Arc::new(inner), Duration::from_secs(60));
        let correlation_id = Uuid::new_v4();
        let mut saga = SagaInstance::<Tally>::new(correlation_id);
        saga.state.seen = 2;
        saga.mark_completed();
        store.save(saga, Uuid::new_v4()).await.unwrap();
        assert_eq!(store.get(correlation_id).await.unwrap().unwrap().state.seen, 2);

        // Act
        let purged = store.purge_completed().await.unwrap();

        // Assert
        assert_eq!(purged, 1);
        assert!(store.get(correlation_id).await.unwrap().is_none());
    }
}
