//! PostgreSQL implementation of the `SnapshotStore` trait.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use chronicle_core::codec::PayloadCodec;
use chronicle_core::error::DomainError;
use chronicle_core::snapshot::{Snapshot, SnapshotStore};

use crate::pg_error::map_sqlx_error;

/// PostgreSQL-backed snapshot store. One row per stream, last write wins.
#[derive(Debug, Clone)]
pub struct PgSnapshotStore {
    pool: PgPool,
    codec: Arc<dyn PayloadCodec>,
}

impl PgSnapshotStore {
    /// Creates a new `PgSnapshotStore`.
    #[must_use]
    pub fn new(pool: PgPool, codec: Arc<dyn PayloadCodec>) -> Self {
        Self { pool, codec }
    }
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    #[tracing::instrument(skip(self))]
    async fn get(&self, aggregate_id: Uuid) -> Result<Option<Snapshot>, DomainError> {
        let row = sqlx::query(
            r"
            SELECT version, state, taken_at
            FROM snapshots
            WHERE aggregate_id = $1
            ",
        )
        .bind(aggregate_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let state: Vec<u8> = row.try_get("state").map_err(map_sqlx_error)?;
        Ok(Some(Snapshot {
            aggregate_id,
            version: row.try_get("version").map_err(map_sqlx_error)?,
            state: self.codec.decode(&state)?,
            taken_at: row.try_get("taken_at").map_err(map_sqlx_error)?,
        }))
    }

    #[tracing::instrument(skip(self, snapshot), fields(aggregate_id = %snapshot.aggregate_id, version = snapshot.version))]
    async fn put(&self, snapshot: Snapshot) -> Result<(), DomainError> {
        let state = self.codec.encode(&snapshot.state)?;
        sqlx::query(
            r"
            INSERT INTO snapshots (aggregate_id, version, state, taken_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (aggregate_id)
            DO UPDATE SET version = EXCLUDED.version, state = EXCLUDED.state, taken_at = EXCLUDED.taken_at
            ",
        )
        .bind(snapshot.aggregate_id)
        .bind(snapshot.version)
        .bind(state)
        .bind(snapshot.taken_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}
