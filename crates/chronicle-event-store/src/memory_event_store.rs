//! In-memory implementation of the `EventStore` trait.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use chronicle_core::config::EventStoreSettings;
use chronicle_core::error::DomainError;
use chronicle_core::repository::{Commit, EventStore, StoredEvent};

#[derive(Debug)]
struct CommitEntry {
    commit: Commit,
    dispatched: bool,
}

#[derive(Debug, Default)]
struct Inner {
    streams: HashMap<Uuid, Vec<StoredEvent>>,
    commits: Vec<CommitEntry>,
    commit_index: HashMap<(Uuid, Uuid), usize>,
}

/// Process-local event store. Commits are linearized by a single lock.
#[derive(Debug)]
pub struct InMemoryEventStore {
    settings: EventStoreSettings,
    inner: Mutex<Inner>,
}

impl InMemoryEventStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(settings: EventStoreSettings) -> Self {
        Self {
            settings,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Current version of a stream (0 if it has no events).
    #[must_use]
    pub fn stream_version(&self, aggregate_id: Uuid) -> i64 {
        self.inner
            .lock()
            .streams
            .get(&aggregate_id)
            .and_then(|events| events.last())
            .map_or(0, |event| event.sequence_number)
    }

    /// Number of commits recorded across all streams.
    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.inner.lock().commits.len()
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new(EventStoreSettings::default())
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, commit: Commit) -> Result<i64, DomainError> {
        commit.validate()?;
        let mut inner = self.inner.lock();
        let key = (commit.aggregate_id, commit.commit_id);

        if self.settings.detect_duplicate_commits {
            if let Some(&index) = inner.commit_index.get(&key) {
                return Err(DomainError::DuplicateCommit {
                    aggregate_id: commit.aggregate_id,
                    commit_id: commit.commit_id,
                    committed_version: inner.commits[index].commit.resulting_version(),
                });
            }
        }

        let current = inner
            .streams
            .get(&commit.aggregate_id)
            .and_then(|events| events.last())
            .map_or(0, |event| event.sequence_number);
        if current != commit.expected_version {
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id: commit.aggregate_id,
                expected: commit.expected_version,
                actual: current,
            });
        }
        if commit.events.is_empty() {
            return Ok(current);
        }

        let version = commit.resulting_version();
        inner
            .streams
            .entry(commit.aggregate_id)
            .or_default()
            .extend(commit.events.iter().cloned());
        let index = inner.commits.len();
        inner.commits.push(CommitEntry {
            commit,
            dispatched: !self.settings.mark_dispatched,
        });
        inner.commit_index.insert(key, index);
        Ok(version)
    }

    async fn read_page(
        &self,
        aggregate_id: Uuid,
        from_version: i64,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        let inner = self.inner.lock();
        Ok(inner
            .streams
            .get(&aggregate_id)
            .map(|events| {
                events
                    .iter()
                    .filter(|event| event.sequence_number > from_version)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn page_size(&self) -> usize {
        self.settings.page_size
    }

    async fn undispatched(&self) -> Result<Vec<Commit>, DomainError> {
        let inner = self.inner.lock();
        Ok(inner
            .commits
            .iter()
            .filter(|entry| !entry.dispatched)
            .map(|entry| entry.commit.clone())
            .collect())
    }

    async fn mark_dispatched(
        &self,
        aggregate_id: Uuid,
        commit_id: Uuid,
    ) -> Result<(), DomainError> {
        let mut inner = self.inner.lock();
        if let Some(&index) = inner.commit_index.get(&(aggregate_id, commit_id)) {
            inner.commits[index].dispatched = true;
        }
        Ok(())
    }
}
