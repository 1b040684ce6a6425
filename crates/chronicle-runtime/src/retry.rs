//! Time-bounded retry of a handling attempt.
//!
//! Concurrency conflicts retry in a tight loop, yielding to the scheduler
//! between attempts, until `save_retry_timeout` has elapsed since the first
//! attempt. Other transient faults wait `transient_retry_delay` between
//! attempts and are bounded by `retry_timeout`. Errors the classifier does not
//! consider transient are returned at once.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use chronicle_core::config::ProcessorSettings;
use chronicle_core::error::DomainError;
use chronicle_core::transient::TransientErrorClassifier;

/// Retry budgets and the classifier that decides eligibility.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    classifier: Arc<dyn TransientErrorClassifier>,
    retry_timeout: Duration,
    save_retry_timeout: Duration,
    transient_retry_delay: Duration,
}

impl RetryPolicy {
    /// Builds a policy from processor settings.
    #[must_use]
    pub fn from_settings(
        settings: &ProcessorSettings,
        classifier: Arc<dyn TransientErrorClassifier>,
    ) -> Self {
        Self {
            classifier,
            retry_timeout: settings.retry_timeout,
            save_retry_timeout: settings.save_retry_timeout,
            transient_retry_delay: settings.transient_retry_delay,
        }
    }

    /// Runs `attempt` until it succeeds, fails permanently or exhausts the
    /// budget for the kind of error it keeps returning. `attempt` receives the
    /// 1-based attempt number; `on_retry` is called before every retry.
    ///
    /// # Errors
    ///
    /// - The attempt's own error if it is not transient.
    /// - `DomainError::RetryBudgetExceeded` wrapping the last error once the
    ///   budget has elapsed.
    pub async fn run<T, F, Fut, R>(&self, mut attempt: F, mut on_retry: R) -> Result<T, DomainError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, DomainError>>,
        R: FnMut(u32, &DomainError),
    {
        let started = Instant::now();
        let mut attempts = 0u32;
        loop {
            attempts = attempts.saturating_add(1);
            let err = match attempt(attempts).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !self.classifier.is_transient(&err) {
                return Err(err);
            }

            let conflict = matches!(err, DomainError::ConcurrencyConflict { .. });
            let budget = if conflict {
                self.save_retry_timeout
            } else {
                self.retry_timeout
            };
            let elapsed = started.elapsed();
            if elapsed >= budget {
                return Err(DomainError::RetryBudgetExceeded {
                    attempts,
                    elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    last: Box::new(err),
                });
            }

            on_retry(attempts, &err);
            if conflict || self.transient_retry_delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(self.transient_retry_delay).await;
            }
        }
    }
}
