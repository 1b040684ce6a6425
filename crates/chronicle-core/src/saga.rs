//! Saga (process manager) abstractions and the saga persistence contract.
//!
//! A saga is persisted as a state record rather than an event stream, but it
//! follows the same versioning discipline as aggregates: every save names the
//! version it was loaded at and fails with a concurrency conflict otherwise.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::command::Command;
use crate::error::DomainError;
use crate::event::{DomainEvent, EventMetadata};

/// Event type name of synthesized timeout events.
pub const SAGA_TIMEOUT_EVENT_TYPE: &str = "saga.timeout";

/// Namespace for deterministic saga identifiers.
const SAGA_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6c2b_1f0e_8a4d_4f3b_9e57_0d1c_2a3b_4c5d);

/// Business state of a saga type.
pub trait SagaState: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Saga type name, part of the saga's identity.
    const SAGA_TYPE: &'static str;
}

/// Derives the identifier of the saga of `saga_type` correlated by
/// `correlation_id`.
#[must_use]
pub fn saga_id(saga_type: &str, correlation_id: Uuid) -> Uuid {
    let mut name = Vec::with_capacity(saga_type.len() + 17);
    name.extend_from_slice(saga_type.as_bytes());
    name.push(b':');
    name.extend_from_slice(correlation_id.as_bytes());
    Uuid::new_v5(&SAGA_ID_NAMESPACE, &name)
}

/// An in-memory saga: lifecycle fields plus typed state.
#[derive(Debug, Clone)]
pub struct SagaInstance<S> {
    id: Uuid,
    correlation_id: Uuid,
    version: i64,
    completed: bool,
    timeout: Option<DateTime<Utc>>,
    /// Business state.
    pub state: S,
    published: Vec<Arc<dyn Command>>,
}

impl<S: SagaState> SagaInstance<S> {
    /// Starts a new saga at version 0.
    #[must_use]
    pub fn new(correlation_id: Uuid) -> Self {
        Self {
            id: saga_id(S::SAGA_TYPE, correlation_id),
            correlation_id,
            version: 0,
            completed: false,
            timeout: None,
            state: S::default(),
            published: Vec::new(),
        }
    }

    /// Rebuilds a saga from its persisted record.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the state does not decode, or
    /// `DomainError::Validation` if the record is of another saga type.
    pub fn from_record(record: SagaRecord) -> Result<Self, DomainError> {
        if record.saga_type != S::SAGA_TYPE {
            return Err(DomainError::Validation(format!(
                "saga record {} is of type {}, not {}",
                record.saga_id,
                record.saga_type,
                S::SAGA_TYPE
            )));
        }
        Ok(Self {
            id: record.saga_id,
            correlation_id: record.correlation_id,
            version: record.version,
            completed: record.completed,
            timeout: record.timeout,
            state: serde_json::from_value(record.state)?,
            published: Vec::new(),
        })
    }

    /// Builds the record persisted for this saga at `version`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the state does not encode.
    pub fn to_record(&self, version: i64) -> Result<SagaRecord, DomainError> {
        Ok(SagaRecord {
            saga_id: self.id,
            saga_type: S::SAGA_TYPE.to_owned(),
            correlation_id: self.correlation_id,
            version,
            completed: self.completed,
            timeout: self.timeout,
            state: serde_json::to_value(&self.state)?,
        })
    }

    /// Saga identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Correlation identifier.
    #[must_use]
    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    /// Persisted version (0 for a saga never saved).
    #[must_use]
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Whether the saga has reached its terminal state.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Currently scheduled timeout.
    #[must_use]
    pub fn timeout(&self) -> Option<DateTime<Utc>> {
        self.timeout
    }

    /// Schedules (or reschedules) the saga's timeout.
    pub fn schedule_timeout(&mut self, at: DateTime<Utc>) {
        self.timeout = Some(at);
    }

    /// Clears any scheduled timeout.
    pub fn clear_timeout(&mut self) {
        self.timeout = None;
    }

    /// Marks the saga completed and clears its timeout.
    pub fn mark_completed(&mut self) {
        self.completed = true;
        self.timeout = None;
    }

    /// Queues a command to publish once the saga is saved.
    pub fn publish(&mut self, command: impl Command) {
        self.published.push(Arc::new(command));
    }

    /// Commands queued during the current handling cycle.
    #[must_use]
    pub fn published(&self) -> &[Arc<dyn Command>] {
        &self.published
    }

    /// Takes queued commands and records the new persisted version.
    #[must_use]
    pub fn into_committed(mut self, version: i64) -> (Self, Vec<Arc<dyn Command>>) {
        let published = std::mem::take(&mut self.published);
        self.version = version;
        (self, published)
    }
}

/// Persisted form of a saga.
#[derive(Debug, Clone, PartialEq)]
pub struct SagaRecord {
    /// Saga identifier.
    pub saga_id: Uuid,
    /// Saga type name.
    pub saga_type: String,
    /// Correlation identifier.
    pub correlation_id: Uuid,
    /// Version after the save that produced this record.
    pub version: i64,
    /// Terminal flag.
    pub completed: bool,
    /// Scheduled timeout.
    pub timeout: Option<DateTime<Utc>>,
    /// Serialized business state.
    pub state: serde_json::Value,
}

/// A due (or upcoming) saga timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTimeout {
    /// Saga identifier.
    pub saga_id: Uuid,
    /// Saga type name.
    pub saga_type: String,
    /// Correlation identifier.
    pub correlation_id: Uuid,
    /// When the timeout is due.
    pub due_at: DateTime<Utc>,
}

/// Persistence contract for saga records.
#[async_trait]
pub trait SagaRepository: Send + Sync {
    /// Loads the saga of `saga_type` correlated by `correlation_id`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` on backend faults.
    async fn load(
        &self,
        saga_type: &str,
        correlation_id: Uuid,
    ) -> Result<Option<SagaRecord>, DomainError>;

    /// Saves `record`, which must carry `expected_version + 1`.
    ///
    /// # Errors
    ///
    /// - `DomainError::SagaCompleted` if the persisted saga is completed.
    /// - `DomainError::DuplicateCommit` if `commit_id` was already applied to
    ///   this saga, carrying the version that commit produced.
    /// - `DomainError::ConcurrencyConflict` if the persisted version is not
    ///   `expected_version`.
    async fn save(
        &self,
        record: &SagaRecord,
        expected_version: i64,
        commit_id: Uuid,
    ) -> Result<(), DomainError>;

    /// Timeouts of non-completed sagas due strictly before `before`, earliest
    /// first.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` on backend faults.
    async fn scheduled_timeouts(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<ScheduledTimeout>, DomainError>;

    /// Deletes completed sagas and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` on backend faults.
    async fn purge_completed(&self) -> Result<u64, DomainError>;
}

/// Synthetic event delivered to a saga when its timeout falls due.
#[derive(Debug, Clone)]
pub struct SagaTimeout {
    /// Event metadata; `aggregate_id` is the saga id.
    pub metadata: EventMetadata,
    /// Saga type the timeout belongs to.
    pub saga_type: String,
    /// The instant the timeout was scheduled for.
    pub scheduled: DateTime<Utc>,
}

impl SagaTimeout {
    /// Builds the timeout event for a scheduled timeout.
    #[must_use]
    pub fn new(timeout: &ScheduledTimeout, event_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            metadata: EventMetadata {
                event_id,
                event_type: SAGA_TIMEOUT_EVENT_TYPE.to_owned(),
                aggregate_id: timeout.saga_id,
                sequence_number: 0,
                correlation_id: timeout.correlation_id,
                causation_id: timeout.saga_id,
                occurred_at: now,
            },
            saga_type: timeout.saga_type.clone(),
            scheduled: timeout.due_at,
        }
    }

    /// Correlation identifier of the saga.
    #[must_use]
    pub fn correlation_id(&self) -> Uuid {
        self.metadata.correlation_id
    }
}

impl DomainEvent for SagaTimeout {
    fn event_type(&self) -> &'static str {
        SAGA_TIMEOUT_EVENT_TYPE
    }

    fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "saga_type": self.saga_type,
            "scheduled": self.scheduled,
        })
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }
}
