//! Domain error types.

use thiserror::Error;
use uuid::Uuid;

/// Top-level error type shared by stores, handlers and processors.
#[derive(Debug, Clone, Error)]
pub enum DomainError {
    /// An aggregate was not found.
    #[error("aggregate not found: {0}")]
    AggregateNotFound(Uuid),

    /// Optimistic concurrency conflict.
    #[error("concurrency conflict on aggregate {aggregate_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The aggregate that had the conflict.
        aggregate_id: Uuid,
        /// The expected version.
        expected: i64,
        /// The actual version found.
        actual: i64,
    },

    /// The commit identifier was already recorded for the stream.
    #[error("duplicate commit {commit_id} on aggregate {aggregate_id} (committed at version {committed_version})")]
    DuplicateCommit {
        /// The aggregate the commit was written to.
        aggregate_id: Uuid,
        /// The replayed commit identifier.
        commit_id: Uuid,
        /// The version the original commit produced.
        committed_version: i64,
    },

    /// A saga has completed and can no longer be modified.
    #[error("saga {0} is completed")]
    SagaCompleted(Uuid),

    /// A validation error in domain logic.
    #[error("validation error: {0}")]
    Validation(String),

    /// No handler is registered for a message type.
    #[error("no handler registered for {0}")]
    HandlerNotFound(String),

    /// Invalid configuration or handler registration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The backing store could not be reached.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The backing store rejected an operation.
    #[error("storage error{}: {message}", code.as_ref().map(|c| format!(" [{c}]")).unwrap_or_default())]
    Storage {
        /// Vendor error code, when the backend reports one.
        code: Option<String>,
        /// Human-readable message.
        message: String,
    },

    /// The message bus no longer accepts envelopes.
    #[error("message bus is closed")]
    BusClosed,

    /// The retry budget elapsed before the operation succeeded.
    #[error("retry budget exceeded after {attempts} attempts ({elapsed_ms} ms): {last}")]
    RetryBudgetExceeded {
        /// Number of attempts made.
        attempts: u32,
        /// Wall-clock time spent retrying.
        elapsed_ms: u64,
        /// The error returned by the final attempt.
        last: Box<DomainError>,
    },

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
