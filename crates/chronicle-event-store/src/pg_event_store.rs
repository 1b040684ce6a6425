//! PostgreSQL implementation of the `EventStore` trait.
//!
//! Every append runs in one transaction: the stream head row is locked with
//! `SELECT ... FOR UPDATE`, the expected version is checked against it, and
//! the commit row plus its events are inserted before the head is advanced.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use chronicle_core::codec::PayloadCodec;
use chronicle_core::config::EventStoreSettings;
use chronicle_core::error::DomainError;
use chronicle_core::repository::{Commit, EventStore, StoredEvent};
use chronicle_core::sequential::SequentialIdGenerator;

use crate::pg_error::{is_unique_violation, map_sqlx_error};
use crate::schema::{DUPLICATE_COMMIT_INDEX, EVENTS_SEQUENCE_CONSTRAINT};

/// PostgreSQL-backed event store.
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
    settings: EventStoreSettings,
    codec: Arc<dyn PayloadCodec>,
    ids: Arc<SequentialIdGenerator>,
}

impl PgEventStore {
    /// Creates a new `PgEventStore`. Commit row keys are minted by `ids`.
    #[must_use]
    pub fn new(
        pool: PgPool,
        settings: EventStoreSettings,
        codec: Arc<dyn PayloadCodec>,
        ids: Arc<SequentialIdGenerator>,
    ) -> Self {
        Self {
            pool,
            settings,
            codec,
            ids,
        }
    }

    async fn committed_version(
        &self,
        aggregate_id: Uuid,
        commit_id: Uuid,
    ) -> Result<Option<i64>, DomainError> {
        sqlx::query_scalar(
            r"
            SELECT version
            FROM commits
            WHERE aggregate_id = $1 AND commit_id = $2
            ",
        )
        .bind(aggregate_id)
        .bind(commit_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)
    }

    async fn stream_version(&self, aggregate_id: Uuid) -> Result<i64, DomainError> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM streams WHERE aggregate_id = $1")
                .bind(aggregate_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        Ok(version.unwrap_or(0))
    }

    /// Turns a failed insert into the conflict or duplicate it stands for.
    async fn classify_insert_error(&self, commit: &Commit, err: sqlx::Error) -> DomainError {
        if is_unique_violation(&err, DUPLICATE_COMMIT_INDEX) {
            return match self
                .committed_version(commit.aggregate_id, commit.commit_id)
                .await
            {
                Ok(Some(committed_version)) => DomainError::DuplicateCommit {
                    aggregate_id: commit.aggregate_id,
                    commit_id: commit.commit_id,
                    committed_version,
                },
                Ok(None) => map_sqlx_error(err),
                Err(e) => e,
            };
        }
        if is_unique_violation(&err, EVENTS_SEQUENCE_CONSTRAINT) {
            return match self.stream_version(commit.aggregate_id).await {
                Ok(actual) => DomainError::ConcurrencyConflict {
                    aggregate_id: commit.aggregate_id,
                    expected: commit.expected_version,
                    actual,
                },
                Err(e) => e,
            };
        }
        map_sqlx_error(err)
    }

    fn decode_event(&self, row: &PgRow) -> Result<StoredEvent, DomainError> {
        let payload: Vec<u8> = row.try_get("payload").map_err(map_sqlx_error)?;
        Ok(StoredEvent {
            event_id: row.try_get("event_id").map_err(map_sqlx_error)?,
            aggregate_id: row.try_get("aggregate_id").map_err(map_sqlx_error)?,
            event_type: row.try_get("event_type").map_err(map_sqlx_error)?,
            payload: self.codec.decode(&payload)?,
            sequence_number: row.try_get("sequence_number").map_err(map_sqlx_error)?,
            correlation_id: row.try_get("correlation_id").map_err(map_sqlx_error)?,
            causation_id: row.try_get("causation_id").map_err(map_sqlx_error)?,
            occurred_at: row.try_get("occurred_at").map_err(map_sqlx_error)?,
        })
    }

    async fn insert_commit(
        &self,
        commit: &Commit,
        payloads: Vec<Vec<u8>>,
    ) -> Result<Result<i64, sqlx::Error>, DomainError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        sqlx::query(
            r"
            INSERT INTO streams (aggregate_id, aggregate_type, version)
            VALUES ($1, $2, 0)
            ON CONFLICT (aggregate_id) DO NOTHING
            ",
        )
        .bind(commit.aggregate_id)
        .bind(&commit.aggregate_type)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let current: i64 = sqlx::query_scalar(
            r"
            SELECT version
            FROM streams
            WHERE aggregate_id = $1
            FOR UPDATE
            ",
        )
        .bind(commit.aggregate_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if self.settings.detect_duplicate_commits {
            let committed: Option<i64> = sqlx::query_scalar(
                "SELECT version FROM commits WHERE aggregate_id = $1 AND commit_id = $2",
            )
            .bind(commit.aggregate_id)
            .bind(commit.commit_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
            if let Some(committed_version) = committed {
                return Err(DomainError::DuplicateCommit {
                    aggregate_id: commit.aggregate_id,
                    commit_id: commit.commit_id,
                    committed_version,
                });
            }
        }

        if current != commit.expected_version {
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id: commit.aggregate_id,
                expected: commit.expected_version,
                actual: current,
            });
        }
        if commit.events.is_empty() {
            return Ok(Ok(current));
        }

        let version = commit.resulting_version();
        let inserted = sqlx::query(
            r"
            INSERT INTO commits
                (id, aggregate_id, aggregate_type, commit_id, version, committed_at, dispatched)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(self.ids.next_id())
        .bind(commit.aggregate_id)
        .bind(&commit.aggregate_type)
        .bind(commit.commit_id)
        .bind(version)
        .bind(commit.committed_at)
        .bind(!self.settings.mark_dispatched)
        .execute(&mut *tx)
        .await;
        if let Err(e) = inserted {
            return Ok(Err(e));
        }

        let mut qb = QueryBuilder::<Postgres>::new(
            "INSERT INTO domain_events (event_id, aggregate_id, commit_id, event_type, payload, \
             sequence_number, correlation_id, causation_id, occurred_at) ",
        );
        qb.push_values(commit.events.iter().zip(payloads), |mut b, (event, payload)| {
            b.push_bind(event.event_id)
                .push_bind(event.aggregate_id)
                .push_bind(commit.commit_id)
                .push_bind(&event.event_type)
                .push_bind(payload)
                .push_bind(event.sequence_number)
                .push_bind(event.correlation_id)
                .push_bind(event.causation_id)
                .push_bind(event.occurred_at);
        });
        if let Err(e) = qb.build().execute(&mut *tx).await {
            return Ok(Err(e));
        }

        if let Err(e) = sqlx::query("UPDATE streams SET version = $1 WHERE aggregate_id = $2")
            .bind(version)
            .bind(commit.aggregate_id)
            .execute(&mut *tx)
            .await
        {
            return Ok(Err(e));
        }

        Ok(tx.commit().await.map(|()| version))
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    #[instrument(skip(self, commit), fields(aggregate_id = %commit.aggregate_id, commit_id = %commit.commit_id))]
    async fn append(&self, commit: Commit) -> Result<i64, DomainError> {
        commit.validate()?;
        let payloads = commit
            .events
            .iter()
            .map(|event| self.codec.encode(&event.payload))
            .collect::<Result<Vec<_>, _>>()?;

        match self.insert_commit(&commit, payloads).await? {
            Ok(version) => {
                debug!(version, events = commit.events.len(), "commit appended");
                Ok(version)
            }
            Err(e) => Err(self.classify_insert_error(&commit, e).await),
        }
    }

    async fn read_page(
        &self,
        aggregate_id: Uuid,
        from_version: i64,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        let rows = sqlx::query(
            r"
            SELECT event_id, aggregate_id, event_type, payload, sequence_number,
                   correlation_id, causation_id, occurred_at
            FROM domain_events
            WHERE aggregate_id = $1 AND sequence_number > $2
            ORDER BY sequence_number
            LIMIT $3
            ",
        )
        .bind(aggregate_id)
        .bind(from_version)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(|row| self.decode_event(row)).collect()
    }

    fn page_size(&self) -> usize {
        self.settings.page_size
    }

    async fn undispatched(&self) -> Result<Vec<Commit>, DomainError> {
        let heads = sqlx::query(
            r"
            SELECT aggregate_id, aggregate_type, commit_id, version, committed_at
            FROM commits
            WHERE NOT dispatched
            ORDER BY id
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let mut commits = Vec::with_capacity(heads.len());
        for head in heads {
            let aggregate_id: Uuid = head.try_get("aggregate_id").map_err(map_sqlx_error)?;
            let commit_id: Uuid = head.try_get("commit_id").map_err(map_sqlx_error)?;
            let version: i64 = head.try_get("version").map_err(map_sqlx_error)?;
            let committed_at: DateTime<Utc> =
                head.try_get("committed_at").map_err(map_sqlx_error)?;

            let rows = sqlx::query(
                r"
                SELECT event_id, aggregate_id, event_type, payload, sequence_number,
                       correlation_id, causation_id, occurred_at
                FROM domain_events
                WHERE aggregate_id = $1 AND commit_id = $2
                ORDER BY sequence_number
                ",
            )
            .bind(aggregate_id)
            .bind(commit_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
            let events = rows
                .iter()
                .map(|row| self.decode_event(row))
                .collect::<Result<Vec<_>, _>>()?;

            #[allow(clippy::cast_possible_wrap)]
            let expected_version = version - events.len() as i64;
            commits.push(Commit {
                commit_id,
                aggregate_id,
                aggregate_type: head.try_get("aggregate_type").map_err(map_sqlx_error)?,
                expected_version,
                events,
                committed_at,
            });
        }
        Ok(commits)
    }

    async fn mark_dispatched(
        &self,
        aggregate_id: Uuid,
        commit_id: Uuid,
    ) -> Result<(), DomainError> {
        sqlx::query(
            r"
            UPDATE commits
            SET dispatched = TRUE
            WHERE aggregate_id = $1 AND commit_id = $2
            ",
        )
        .bind(aggregate_id)
        .bind(commit_id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}
