//! Test event stores: `EventStore` doubles for exercising error paths and
//! inspecting writes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chronicle_core::error::DomainError;
use chronicle_core::repository::{Commit, EventStore, StoredEvent};
use chronicle_event_store::InMemoryEventStore;
use parking_lot::Mutex;
use uuid::Uuid;

/// An in-memory event store that records every append attempt, including the
/// ones it rejects.
#[derive(Debug, Default)]
pub struct RecordingEventStore {
    inner: InMemoryEventStore,
    attempts: Mutex<Vec<Commit>>,
}

impl RecordingEventStore {
    /// Creates an empty recording store with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every commit passed to `append`, in call order.
    pub fn appended(&self) -> Vec<Commit> {
        self.attempts.lock().clone()
    }

    /// Current version of a stream.
    pub fn stream_version(&self, aggregate_id: Uuid) -> i64 {
        self.inner.stream_version(aggregate_id)
    }
}

#[async_trait]
impl EventStore for RecordingEventStore {
    async fn append(&self, commit: Commit) -> Result<i64, DomainError> {
        self.attempts.lock().push(commit.clone());
        self.inner.append(commit).await
    }

    async fn read_page(
        &self,
        aggregate_id: Uuid,
        from_version: i64,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        self.inner.read_page(aggregate_id, from_version, limit).await
    }

    fn page_size(&self) -> usize {
        self.inner.page_size()
    }

    async fn undispatched(&self) -> Result<Vec<Commit>, DomainError> {
        self.inner.undispatched().await
    }

    async fn mark_dispatched(
        &self,
        aggregate_id: Uuid,
        commit_id: Uuid,
    ) -> Result<(), DomainError> {
        self.inner.mark_dispatched(aggregate_id, commit_id).await
    }
}

/// An event store that fails every call with the configured error.
#[derive(Debug, Clone)]
pub struct FailingEventStore {
    error: DomainError,
}

impl FailingEventStore {
    /// Fails with `error` on every call.
    #[must_use]
    pub fn new(error: DomainError) -> Self {
        Self { error }
    }

    /// Fails with `StorageUnavailable("connection refused")`.
    #[must_use]
    pub fn unavailable() -> Self {
        Self::new(DomainError::StorageUnavailable("connection refused".into()))
    }
}

#[async_trait]
impl EventStore for FailingEventStore {
    async fn append(&self, _commit: Commit) -> Result<i64, DomainError> {
        Err(self.error.clone())
    }

    async fn read_page(
        &self,
        _aggregate_id: Uuid,
        _from_version: i64,
        _limit: usize,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        Err(self.error.clone())
    }

    fn page_size(&self) -> usize {
        100
    }

    async fn undispatched(&self) -> Result<Vec<Commit>, DomainError> {
        Err(self.error.clone())
    }

    async fn mark_dispatched(&self, _: Uuid, _: Uuid) -> Result<(), DomainError> {
        Err(self.error.clone())
    }
}

/// Wraps another store and fails the first `failures` appends with the
/// configured error before delegating. Reads always delegate.
pub struct FlakyEventStore {
    inner: Arc<dyn EventStore>,
    error: DomainError,
    remaining: AtomicU32,
    attempts: AtomicU32,
}

impl std::fmt::Debug for FlakyEventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlakyEventStore")
            .field("error", &self.error)
            .field("remaining", &self.remaining)
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

impl FlakyEventStore {
    /// Fails the next `failures` appends with `error`.
    #[must_use]
    pub fn new(inner: Arc<dyn EventStore>, failures: u32, error: DomainError) -> Self {
        Self {
            inner,
            error,
            remaining: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
        }
    }

    /// Number of `append` calls so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventStore for FlakyEventStore {
    async fn append(&self, commit: Commit) -> Result<i64, DomainError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(self.error.clone());
        }
        self.inner.append(commit).await
    }

    async fn read_page(
        &self,
        aggregate_id: Uuid,
        from_version: i64,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        self.inner.read_page(aggregate_id, from_version, limit).await
    }

    fn page_size(&self) -> usize {
        self.inner.page_size()
    }

    async fn undispatched(&self) -> Result<Vec<Commit>, DomainError> {
        self.inner.undispatched().await
    }

    async fn mark_dispatched(
        &self,
        aggregate_id: Uuid,
        commit_id: Uuid,
    ) -> Result<(), DomainError> {
        self.inner.mark_dispatched(aggregate_id, commit_id).await
    }
}
