//! In-memory implementation of the `SagaRepository` trait.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use chronicle_core::error::DomainError;
use chronicle_core::saga::{SagaRecord, SagaRepository, ScheduledTimeout, saga_id};

#[derive(Debug, Clone)]
struct Entry {
    record: SagaRecord,
    /// Every commit applied to the saga, with the version it produced.
    commits: HashMap<Uuid, i64>,
}

/// Process-local saga persistence.
#[derive(Debug, Default)]
pub struct InMemorySagaRepository {
    sagas: Mutex<HashMap<Uuid, Entry>>,
}

impl InMemorySagaRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted sagas, completed ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sagas.lock().len()
    }

    /// Whether no saga is persisted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sagas.lock().is_empty()
    }
}

#[async_trait]
impl SagaRepository for InMemorySagaRepository {
    async fn load(
        &self,
        saga_type: &str,
        correlation_id: Uuid,
    ) -> Result<Option<SagaRecord>, DomainError> {
        let id = saga_id(saga_type, correlation_id);
        Ok(self.sagas.lock().get(&id).map(|entry| entry.record.clone()))
    }

    async fn save(
        &self,
        record: &SagaRecord,
        expected_version: i64,
        commit_id: Uuid,
    ) -> Result<(), DomainError> {
        if record.version != expected_version + 1 {
            return Err(DomainError::Validation(format!(
                "saga {} record carries version {}, expected {}",
                record.saga_id,
                record.version,
                expected_version + 1
            )));
        }

        let mut sagas = self.sagas.lock();
        let current = match sagas.get(&record.saga_id) {
            Some(entry) => {
                if let Some(&committed_version) = entry.commits.get(&commit_id) {
                    return Err(DomainError::DuplicateCommit {
                        aggregate_id: record.saga_id,
                        commit_id,
                        committed_version,
                    });
                }
                if entry.record.completed {
                    return Err(DomainError::SagaCompleted(record.saga_id));
                }
                entry.record.version
            }
            None => 0,
        };
        if current != expected_version {
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id: record.saga_id,
                expected: expected_version,
                actual: current,
            });
        }

        let entry = sagas.entry(record.saga_id).or_insert_with(|| Entry {
            record: record.clone(),
            commits: HashMap::new(),
        });
        entry.record = record.clone();
        entry.commits.insert(commit_id, record.version);
        Ok(())
    }

    async fn scheduled_timeouts(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<ScheduledTimeout>, DomainError> {
        let mut due: Vec<ScheduledTimeout> = self
            .sagas
            .lock()
            .values()
            .filter(|entry| !entry.record.completed)
            .filter_map(|entry| {
                let at = entry.record.timeout?;
                (at < before).then(|| ScheduledTimeout {
                    saga_id: entry.record.saga_id,
                    saga_type: entry.record.saga_type.clone(),
                    correlation_id: entry.record.correlation_id,
                    due_at: at,
                })
            })
            .collect();
        due.sort_by_key(|timeout| timeout.due_at);
        Ok(due)
    }

    async fn purge_completed(&self) -> Result<u64, DomainError> {
        let mut sagas = self.sagas.lock();
        let before = sagas.len();
        sagas.retain(|_, entry| !entry.record.completed);
        Ok((before - sagas.len()) as u64)
    }
}
