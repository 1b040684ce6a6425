//! PostgreSQL implementation of the `SagaRepository` trait.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use chronicle_core::codec::PayloadCodec;
use chronicle_core::error::DomainError;
use chronicle_core::saga::{SagaRecord, SagaRepository, ScheduledTimeout, saga_id};

use crate::pg_error::map_sqlx_error;

/// PostgreSQL-backed saga repository.
#[derive(Debug, Clone)]
pub struct PgSagaRepository {
    pool: PgPool,
    codec: Arc<dyn PayloadCodec>,
}

impl PgSagaRepository {
    /// Creates a new `PgSagaRepository`.
    #[must_use]
    pub fn new(pool: PgPool, codec: Arc<dyn PayloadCodec>) -> Self {
        Self { pool, codec }
    }
}

#[async_trait]
impl SagaRepository for PgSagaRepository {
    async fn load(
        &self,
        saga_type: &str,
        correlation_id: Uuid,
    ) -> Result<Option<SagaRecord>, DomainError> {
        let row = sqlx::query(
            r"
            SELECT saga_id, saga_type, correlation_id, version, completed, timeout, state
            FROM sagas
            WHERE saga_id = $1
            ",
        )
        .bind(saga_id(saga_type, correlation_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let state: Vec<u8> = row.try_get("state").map_err(map_sqlx_error)?;
        Ok(Some(SagaRecord {
            saga_id: row.try_get("saga_id").map_err(map_sqlx_error)?,
            saga_type: row.try_get("saga_type").map_err(map_sqlx_error)?,
            correlation_id: row.try_get("correlation_id").map_err(map_sqlx_error)?,
            version: row.try_get("version").map_err(map_sqlx_error)?,
            completed: row.try_get("completed").map_err(map_sqlx_error)?,
            timeout: row.try_get("timeout").map_err(map_sqlx_error)?,
            state: self.codec.decode(&state)?,
        }))
    }

    #[tracing::instrument(skip(self, record), fields(saga_id = %record.saga_id, version = record.version))]
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
        let state = self.codec.encode(&record.state)?;
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let current = sqlx::query(
            r"
            SELECT version, completed
            FROM sagas
            WHERE saga_id = $1
            FOR UPDATE
            ",
        )
        .bind(record.saga_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let current_version = match current {
            Some(row) => {
                let version: i64 = row.try_get("version").map_err(map_sqlx_error)?;
                let completed: bool = row.try_get("completed").map_err(map_sqlx_error)?;
                let applied: Option<i64> = sqlx::query_scalar(
                    r"
                    SELECT version
                    FROM saga_commits
                    WHERE saga_id = $1 AND commit_id = $2
                    ",
                )
                .bind(record.saga_id)
                .bind(commit_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
                if let Some(committed_version) = applied {
                    return Err(DomainError::DuplicateCommit {
                        aggregate_id: record.saga_id,
                        commit_id,
                        committed_version,
                    });
                }
                if completed {
                    return Err(DomainError::SagaCompleted(record.saga_id));
                }
                version
            }
            None => 0,
        };
        if current_version != expected_version {
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id: record.saga_id,
                expected: expected_version,
                actual: current_version,
            });
        }

        let written = sqlx::query(
            r"
            INSERT INTO sagas
                (saga_id, saga_type, correlation_id, version, completed, timeout, state)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (saga_id) DO UPDATE SET
                version = EXCLUDED.version,
                completed = EXCLUDED.completed,
                timeout = EXCLUDED.timeout,
                state = EXCLUDED.state
            WHERE sagas.version = $8
            ",
        )
        .bind(record.saga_id)
        .bind(&record.saga_type)
        .bind(record.correlation_id)
        .bind(record.version)
        .bind(record.completed)
        .bind(record.timeout)
        .bind(state)
        .bind(expected_version)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if written.rows_affected() == 0 {
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id: record.saga_id,
                expected: expected_version,
                actual: expected_version + 1,
            });
        }

        sqlx::query(
            r"
            INSERT INTO saga_commits (saga_id, commit_id, version)
            VALUES ($1, $2, $3)
            ",
        )
        .bind(record.saga_id)
        .bind(commit_id)
        .bind(record.version)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn scheduled_timeouts(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<ScheduledTimeout>, DomainError> {
        let rows = sqlx::query(
            r"
            SELECT saga_id, saga_type, correlation_id, timeout
            FROM sagas
            WHERE NOT completed AND timeout IS NOT NULL AND timeout < $1
            ORDER BY timeout
            ",
        )
        .bind(before)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter()
            .map(|row| {
                Ok(ScheduledTimeout {
                    saga_id: row.try_get("saga_id").map_err(map_sqlx_error)?,
                    saga_type: row.try_get("saga_type").map_err(map_sqlx_error)?,
                    correlation_id: row.try_get("correlation_id").map_err(map_sqlx_error)?,
                    due_at: row.try_get("timeout").map_err(map_sqlx_error)?,
                })
            })
            .collect()
    }

    async fn purge_completed(&self) -> Result<u64, DomainError> {
        let deleted = sqlx::query("DELETE FROM sagas WHERE completed")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        tracing::debug!(purged = deleted.rows_affected(), "completed sagas purged");
        Ok(deleted.rows_affected())
    }
}
