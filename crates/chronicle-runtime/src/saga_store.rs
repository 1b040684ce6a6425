//! Typed saga persistence over a [`SagaRepository`].

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use chronicle_core::command::Command;
use chronicle_core::error::DomainError;
use chronicle_core::saga::{SagaInstance, SagaRepository, SagaState, ScheduledTimeout};

/// Result of a successful saga save.
#[derive(Clone)]
pub struct SagaSaveOutcome<S> {
    /// The saga at its new version.
    pub saga: SagaInstance<S>,
    /// Commit id of the save.
    pub commit_id: Uuid,
    /// Persisted version after the save.
    pub version: i64,
    /// Commands the saga queued during this cycle. Empty for a duplicate.
    pub published: Vec<Arc<dyn Command>>,
    /// The save had already been applied by an earlier attempt.
    pub duplicate: bool,
}

impl<S: SagaState> std::fmt::Debug for SagaSaveOutcome<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaSaveOutcome")
            .field("saga_id", &self.saga.id())
            .field("commit_id", &self.commit_id)
            .field("version", &self.version)
            .field("published", &self.published.len())
            .field("duplicate", &self.duplicate)
            .finish()
    }
}

/// Load and persist sagas of state type `S`.
#[async_trait]
pub trait SagaStore<S: SagaState>: Send + Sync {
    /// Loads the saga correlated by `correlation_id`, if one was saved.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` on backend faults or an undecodable state.
    async fn get(&self, correlation_id: Uuid) -> Result<Option<SagaInstance<S>>, DomainError>;

    /// Persists the saga at its version + 1 under `commit_id`.
    ///
    /// # Errors
    ///
    /// - `DomainError::ConcurrencyConflict` if the saga moved on since it was
    ///   loaded.
    /// - `DomainError::SagaCompleted` if the persisted saga is completed.
    async fn save(
        &self,
        saga: SagaInstance<S>,
        commit_id: Uuid,
    ) -> Result<SagaSaveOutcome<S>, DomainError>;

    /// Timeouts of this saga type due strictly before `before`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` on backend faults.
    async fn scheduled_timeouts(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<ScheduledTimeout>, DomainError>;

    /// Deletes completed sagas.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` on backend faults.
    async fn purge_completed(&self) -> Result<u64, DomainError>;
}

/// Saga store writing straight to a repository.
pub struct PersistentSagaStore<S> {
    repository: Arc<dyn SagaRepository>,
    _state: PhantomData<fn() -> S>,
}

impl<S> std::fmt::Debug for PersistentSagaStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentSagaStore").finish_non_exhaustive()
    }
}

impl<S: SagaState> PersistentSagaStore<S> {
    /// Creates a store over `repository`.
    #[must_use]
    pub fn new(repository: Arc<dyn SagaRepository>) -> Self {
        Self {
            repository,
            _state: PhantomData,
        }
    }
}

#[async_trait]
impl<S: SagaState> SagaStore<S> for PersistentSagaStore<S> {
    async fn get(&self, correlation_id: Uuid) -> Result<Option<SagaInstance<S>>, DomainError> {
        self.repository
            .load(S::SAGA_TYPE, correlation_id)
            .await?
            .map(SagaInstance::from_record)
            .transpose()
    }

    async fn save(
        &self,
        saga: SagaInstance<S>,
        commit_id: Uuid,
    ) -> Result<SagaSaveOutcome<S>, DomainError> {
        let expected_version = saga.version();
        let version = expected_version + 1;
        let record = saga.to_record(version)?;
        match self.repository.save(&record, expected_version, commit_id).await {
            Ok(()) => {
                debug!(
                    saga_id = %record.saga_id,
                    %commit_id,
                    version,
                    completed = record.completed,
                    "saga saved"
                );
                let (saga, published) = saga.into_committed(version);
                Ok(SagaSaveOutcome {
                    saga,
                    commit_id,
                    version,
                    published,
                    duplicate: false,
                })
            }
            Err(DomainError::DuplicateCommit {
                committed_version, ..
            }) => {
                debug!(saga_id = %record.saga_id, %commit_id, committed_version, "saga save already applied");
                let saga = match self.get(saga.correlation_id()).await? {
                    Some(current) => current,
                    None => saga.into_committed(committed_version).0,
                };
                Ok(SagaSaveOutcome {
                    saga,
                    commit_id,
                    version: committed_version,
                    published: Vec::new(),
                    duplicate: true,
                })
            }
            Err(err) => Err(err),
        }
    }

    async fn scheduled_timeouts(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<ScheduledTimeout>, DomainError> {
        let mut due = self.repository.scheduled_timeouts(before).await?;
        due.retain(|timeout| timeout.saga_type == S::SAGA_TYPE);
        Ok(due)
    }

    async fn purge_completed(&self) -> Result<u64, DomainError> {
        self.repository.purge_completed().await
    }
}
