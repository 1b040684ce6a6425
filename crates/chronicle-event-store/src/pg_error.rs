//! Translation of `sqlx` errors into `DomainError`, and the PostgreSQL
//! transient error classifier.

use chronicle_core::error::DomainError;
use chronicle_core::transient::{DefaultTransientErrorClassifier, TransientErrorClassifier};

/// SQLSTATE for `unique_violation`.
pub const UNIQUE_VIOLATION: &str = "23505";

/// SQLSTATEs that are worth retrying unchanged.
pub const TRANSIENT_SQLSTATES: &[&str] = &[
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "55P03", // lock_not_available
    "57014", // query_canceled
    "53300", // too_many_connections
    "57P01", // admin_shutdown
];

/// SQLSTATE class for connection exceptions.
const CONNECTION_EXCEPTION_CLASS: &str = "08";

/// Maps a `sqlx` error onto the engine's error taxonomy.
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> DomainError {
    match err {
        sqlx::Error::Database(db) => DomainError::Storage {
            code: db.code().map(|code| code.into_owned()),
            message: db.message().to_owned(),
        },
        e @ (sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed) => DomainError::StorageUnavailable(e.to_string()),
        other => DomainError::Infrastructure(other.to_string()),
    }
}

/// Returns `true` if `err` violates the named unique constraint.
pub(crate) fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            db.code().as_deref() == Some(UNIQUE_VIOLATION) && db.constraint() == Some(constraint)
        }
        _ => false,
    }
}

/// Classifier for errors raised by the PostgreSQL backends.
///
/// On top of the default rules, the [`TRANSIENT_SQLSTATES`] and every
/// connection exception (class `08`) are transient.
#[derive(Debug, Clone)]
pub struct PgTransientErrorClassifier {
    base: DefaultTransientErrorClassifier,
}

impl Default for PgTransientErrorClassifier {
    fn default() -> Self {
        Self {
            base: DefaultTransientErrorClassifier::with_codes(TRANSIENT_SQLSTATES.iter().copied()),
        }
    }
}

impl TransientErrorClassifier for PgTransientErrorClassifier {
    fn is_transient(&self, error: &DomainError) -> bool {
        match error {
            DomainError::Storage {
                code: Some(code), ..
            } if code.starts_with(CONNECTION_EXCEPTION_CLASS) => true,
            other => self.base.is_transient(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn storage(code: &str) -> DomainError {
        DomainError::Storage {
            code: Some(code.to_owned()),
            message: "boom".to_owned(),
        }
    }

    #[test]
    fn test_serialization_failure_and_deadlock_are_transient() {
        let classifier = PgTransientErrorClassifier::default();

        assert!(classifier.is_transient(&storage("40001")));
        assert!(classifier.is_transient(&storage("40P01")));
    }

    #[test]
    fn test_connection_exception_class_is_transient() {
        let classifier = PgTransientErrorClassifier::default();

        assert!(classifier.is_transient(&storage("08006")));
        assert!(classifier.is_transient(&storage("08001")));
    }

    #[test]
    fn test_constraint_violations_are_permanent() {
        let classifier = PgTransientErrorClassifier::default();

        assert!(!classifier.is_transient(&storage(UNIQUE_VIOLATION)));
        assert!(!classifier.is_transient(&storage("23502")));
        assert!(!classifier.is_transient(&DomainError::Storage {
            code: None,
            message: "no code".to_owned(),
        }));
    }

    #[test]
    fn test_conflicts_and_outages_stay_transient() {
        let classifier = PgTransientErrorClassifier::default();

        assert!(classifier.is_transient(&DomainError::ConcurrencyConflict {
            aggregate_id: Uuid::new_v4(),
            expected: 1,
            actual: 2,
        }));
        assert!(classifier.is_transient(&DomainError::StorageUnavailable(
            "connection refused".to_owned()
        )));
        assert!(!classifier.is_transient(&DomainError::Validation("no".to_owned())));
    }

    #[test]
    fn test_pool_timeout_maps_to_storage_unavailable() {
        let mapped = map_sqlx_error(sqlx::Error::PoolTimedOut);

        assert!(matches!(mapped, DomainError::StorageUnavailable(_)));
    }

    #[test]
    fn test_row_not_found_maps_to_infrastructure() {
        let mapped = map_sqlx_error(sqlx::Error::RowNotFound);

        assert!(matches!(mapped, DomainError::Infrastructure(_)));
    }
}
