//! Transient error classification.

use crate::error::DomainError;

/// Decides whether a failed operation may succeed if retried unchanged.
///
/// Classifiers never retry anything themselves; the processors consult them
/// to decide retry eligibility.
pub trait TransientErrorClassifier: Send + Sync + std::fmt::Debug {
    /// Returns `true` if `error` is worth retrying.
    fn is_transient(&self, error: &DomainError) -> bool;
}

/// Backend-agnostic classifier.
///
/// Concurrency conflicts and unreachable storage are transient; vendor
/// storage faults are transient only for the configured codes.
#[derive(Debug, Clone, Default)]
pub struct DefaultTransientErrorClassifier {
    transient_codes: Vec<String>,
}

impl DefaultTransientErrorClassifier {
    /// Creates a classifier that also treats the given vendor codes as
    /// transient.
    #[must_use]
    pub fn with_codes<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            transient_codes: codes.into_iter().map(Into::into).collect(),
        }
    }
}

impl TransientErrorClassifier for DefaultTransientErrorClassifier {
    fn is_transient(&self, error: &DomainError) -> bool {
        match error {
            DomainError::ConcurrencyConflict { .. } | DomainError::StorageUnavailable(_) => true,
            DomainError::Storage {
                code: Some(code), ..
            } => self.transient_codes.iter().any(|c| c == code),
            _ => false,
        }
    }
}
