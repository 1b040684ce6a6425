//! PostgreSQL schema for the event, snapshot and saga stores.

use sqlx::PgPool;

use chronicle_core::config::EventStoreSettings;
use chronicle_core::error::DomainError;

use crate::pg_error::map_sqlx_error;

/// Unique constraint guarding stream versions.
pub const EVENTS_SEQUENCE_CONSTRAINT: &str = "uq_domain_events_aggregate_sequence";

/// Unique index guarding commit idempotency.
pub const DUPLICATE_COMMIT_INDEX: &str = "uq_commits_aggregate_commit";

/// SQL to create the stream head, commit and event tables.
pub const CREATE_EVENT_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS streams (
    aggregate_id    UUID PRIMARY KEY,
    aggregate_type  VARCHAR(255) NOT NULL,
    version         BIGINT NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS commits (
    id              UUID PRIMARY KEY,
    aggregate_id    UUID NOT NULL,
    aggregate_type  VARCHAR(255) NOT NULL,
    commit_id       UUID NOT NULL,
    version         BIGINT NOT NULL,
    committed_at    TIMESTAMPTZ NOT NULL,
    dispatched      BOOLEAN NOT NULL DEFAULT FALSE
);

CREATE INDEX IF NOT EXISTS idx_commits_undispatched
    ON commits (id) WHERE NOT dispatched;

CREATE TABLE IF NOT EXISTS domain_events (
    event_id        UUID PRIMARY KEY,
    aggregate_id    UUID NOT NULL,
    commit_id       UUID NOT NULL,
    event_type      VARCHAR(255) NOT NULL,
    payload         BYTEA NOT NULL,
    sequence_number BIGINT NOT NULL,
    correlation_id  UUID NOT NULL,
    causation_id    UUID NOT NULL,
    occurred_at     TIMESTAMPTZ NOT NULL,
    CONSTRAINT uq_domain_events_aggregate_sequence UNIQUE (aggregate_id, sequence_number)
);

CREATE INDEX IF NOT EXISTS idx_domain_events_commit_id
    ON domain_events (commit_id);

CREATE INDEX IF NOT EXISTS idx_domain_events_correlation_id
    ON domain_events (correlation_id);
";

/// SQL to create the unique index that makes commit ids idempotency keys.
pub const CREATE_DUPLICATE_COMMIT_INDEX: &str = r"
CREATE UNIQUE INDEX IF NOT EXISTS uq_commits_aggregate_commit
    ON commits (aggregate_id, commit_id);
";

/// SQL to create the snapshot table.
pub const CREATE_SNAPSHOTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS snapshots (
    aggregate_id    UUID PRIMARY KEY,
    version         BIGINT NOT NULL,
    state           BYTEA NOT NULL,
    taken_at        TIMESTAMPTZ NOT NULL
);
";

/// SQL to create the saga table and its commit history.
pub const CREATE_SAGAS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS sagas (
    saga_id         UUID PRIMARY KEY,
    saga_type       VARCHAR(255) NOT NULL,
    correlation_id  UUID NOT NULL,
    version         BIGINT NOT NULL,
    completed       BOOLEAN NOT NULL DEFAULT FALSE,
    timeout         TIMESTAMPTZ NULL,
    state           BYTEA NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sagas_pending_timeout
    ON sagas (timeout) WHERE NOT completed AND timeout IS NOT NULL;

CREATE TABLE IF NOT EXISTS saga_commits (
    saga_id         UUID NOT NULL REFERENCES sagas (saga_id) ON DELETE CASCADE,
    commit_id       UUID NOT NULL,
    version         BIGINT NOT NULL,
    CONSTRAINT uq_saga_commits_saga_commit PRIMARY KEY (saga_id, commit_id)
);
";

/// Applies the schema. Idempotent; safe to run on every startup.
///
/// The duplicate-commit index is only created when duplicate detection is
/// enabled.
///
/// # Errors
///
/// Returns `DomainError` if a DDL statement fails.
#[tracing::instrument(skip(pool))]
pub async fn migrate(pool: &PgPool, settings: &EventStoreSettings) -> Result<(), DomainError> {
    let mut statements = vec![CREATE_EVENT_TABLES, CREATE_SNAPSHOTS_TABLE, CREATE_SAGAS_TABLE];
    if settings.detect_duplicate_commits {
        statements.push(CREATE_DUPLICATE_COMMIT_INDEX);
    }
    for sql in statements {
        sqlx::raw_sql(sql)
            .execute(pool)
            .await
            .map_err(map_sqlx_error)?;
    }
    tracing::debug!("schema applied");
    Ok(())
}
