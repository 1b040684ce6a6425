//! Event store contract.
//!
//! The event store is an append-only commit log per aggregate stream. Each
//! [`Commit`] is written atomically with an expected-version precondition and
//! an idempotency key (`commit_id`). Reads are paged: [`read_stream`] turns the
//! page-bounded [`EventStore::read_page`] into a lazy stream of events.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use uuid::Uuid;

use crate::error::DomainError;
use crate::event::DomainEvent;

/// Stored representation of a domain event.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Aggregate this event belongs to.
    pub aggregate_id: Uuid,
    /// Event type name for deserialization routing.
    pub event_type: String,
    /// Serialized event payload.
    pub payload: serde_json::Value,
    /// Sequence number within the aggregate stream.
    pub sequence_number: i64,
    /// Correlation ID for tracing.
    pub correlation_id: Uuid,
    /// Causation ID linking to the causing event/command.
    pub causation_id: Uuid,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
}

impl StoredEvent {
    /// Builds the stored form of a domain event.
    #[must_use]
    pub fn from_domain<E: DomainEvent + ?Sized>(event: &E) -> Self {
        let meta = event.metadata();
        Self {
            event_id: meta.event_id,
            aggregate_id: meta.aggregate_id,
            event_type: event.event_type().to_owned(),
            payload: event.to_payload(),
            sequence_number: meta.sequence_number,
            correlation_id: meta.correlation_id,
            causation_id: meta.causation_id,
            occurred_at: meta.occurred_at,
        }
    }
}

/// The atomic unit written to the event store.
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    /// Idempotency key, unique per commit attempt.
    pub commit_id: Uuid,
    /// Stream the events belong to.
    pub aggregate_id: Uuid,
    /// Aggregate type name, used to pick a decoder when redispatching.
    pub aggregate_type: String,
    /// Version the stream must be at for the commit to succeed.
    pub expected_version: i64,
    /// Events in order; versions continue from `expected_version + 1`.
    pub events: Vec<StoredEvent>,
    /// When the commit was created.
    pub committed_at: DateTime<Utc>,
}

impl Commit {
    /// Version of the stream once this commit is applied.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn resulting_version(&self) -> i64 {
        self.expected_version + self.events.len() as i64
    }

    /// Checks that events belong to the stream and number contiguously from
    /// `expected_version + 1`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` on a foreign event or a gap.
    pub fn validate(&self) -> Result<(), DomainError> {
        let mut next = self.expected_version + 1;
        for event in &self.events {
            if event.aggregate_id != self.aggregate_id {
                return Err(DomainError::Validation(format!(
                    "event {} belongs to aggregate {}, not {}",
                    event.event_id, event.aggregate_id, self.aggregate_id
                )));
            }
            if event.sequence_number != next {
                return Err(DomainError::Validation(format!(
                    "event {} has sequence number {}, expected {next}",
                    event.event_id, event.sequence_number
                )));
            }
            next += 1;
        }
        Ok(())
    }
}

/// Append-only commit log with optimistic concurrency.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends a commit and returns the resulting stream version.
    ///
    /// # Errors
    ///
    /// - `DomainError::DuplicateCommit` if duplicate detection is enabled and
    ///   `commit.commit_id` was already recorded for the stream.
    /// - `DomainError::ConcurrencyConflict` if the stream is not at
    ///   `commit.expected_version`.
    /// - `DomainError::StorageUnavailable` / `DomainError::Storage` on backend
    ///   faults.
    async fn append(&self, commit: Commit) -> Result<i64, DomainError>;

    /// Reads up to `limit` events with a sequence number greater than
    /// `from_version`, ordered by sequence number.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` on backend faults.
    async fn read_page(
        &self,
        aggregate_id: Uuid,
        from_version: i64,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, DomainError>;

    /// Configured read page size.
    fn page_size(&self) -> usize;

    /// Commits that have not been flagged as dispatched, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` on backend faults.
    async fn undispatched(&self) -> Result<Vec<Commit>, DomainError>;

    /// Flags a commit as dispatched downstream.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` on backend faults.
    async fn mark_dispatched(&self, aggregate_id: Uuid, commit_id: Uuid)
    -> Result<(), DomainError>;
}

/// Lazily streams the events of an aggregate with a sequence number greater
/// than `from_version`, fetching one page at a time.
pub fn read_stream(
    store: &dyn EventStore,
    aggregate_id: Uuid,
    from_version: i64,
) -> BoxStream<'_, Result<StoredEvent, DomainError>> {
    let limit = store.page_size().max(1);
    stream::unfold(Some(from_version), move |cursor| async move {
        let from = cursor?;
        match store.read_page(aggregate_id, from, limit).await {
            Ok(page) => {
                let next = match page.last() {
                    Some(last) if page.len() >= limit => Some(last.sequence_number),
                    _ => None,
                };
                Some((stream::iter(page.into_iter().map(Ok)).boxed(), next))
            }
            Err(err) => Some((stream::iter(vec![Err(err)]).boxed(), None)),
        }
    })
    .flatten()
    .boxed()
}

/// Collects a whole stream into memory.
///
/// # Errors
///
/// Returns the first error raised while paging.
pub async fn load_events(
    store: &dyn EventStore,
    aggregate_id: Uuid,
    from_version: i64,
) -> Result<Vec<StoredEvent>, DomainError> {
    let mut events = Vec::new();
    let mut stream = read_stream(store, aggregate_id, from_version);
    while let Some(event) = stream.next().await {
        events.push(event?);
    }
    Ok(events)
}
