//! Saga timeout scheduling.
//!
//! The scheduler polls the saga repository for timeouts due before now and
//! publishes a [`SagaTimeout`] event for each. A timeout stays due until the
//! saga handles it, so the scheduler remembers what it already raised. A
//! timeout that is still due once the redelivery interval has passed since it
//! was raised is raised again; a rescheduled timeout is raised as soon as it
//! is due.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use chronicle_core::clock::SharedClock;
use chronicle_core::config::SagaStoreSettings;
use chronicle_core::error::DomainError;
use chronicle_core::saga::{SagaRepository, SagaState, SagaTimeout};
use chronicle_core::sequential::SequentialIdGenerator;

use crate::hooks::SagaHook;
use crate::publisher::EventPublisher;
use crate::saga_store::SagaSaveOutcome;

#[derive(Debug, Clone, Copy)]
struct Raised {
    due_at: DateTime<Utc>,
    raised_at: DateTime<Utc>,
    deliveries: u32,
}

/// Raises due saga timeouts onto the event bus.
pub struct TimeoutScheduler {
    repository: Arc<dyn SagaRepository>,
    publisher: EventPublisher,
    clock: SharedClock,
    ids: Arc<SequentialIdGenerator>,
    poll_interval: Duration,
    redelivery_interval: Duration,
    wake: Arc<Notify>,
    fired: Mutex<HashMap<Uuid, Raised>>,
}

impl std::fmt::Debug for TimeoutScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutScheduler")
            .field("poll_interval", &self.poll_interval)
            .field("redelivery_interval", &self.redelivery_interval)
            .field("fired", &self.fired.lock().len())
            .finish_non_exhaustive()
    }
}

impl TimeoutScheduler {
    /// Creates a scheduler polling every `settings.timeout_poll_interval`.
    #[must_use]
    pub fn new(
        repository: Arc<dyn SagaRepository>,
        publisher: EventPublisher,
        clock: SharedClock,
        ids: Arc<SequentialIdGenerator>,
        settings: &SagaStoreSettings,
    ) -> Self {
        Self {
            repository,
            publisher,
            clock,
            ids,
            poll_interval: settings.timeout_poll_interval.max(Duration::from_millis(1)),
            redelivery_interval: settings.timeout_redelivery_interval,
            wake: Arc::new(Notify::new()),
            fired: Mutex::new(HashMap::new()),
        }
    }

    /// Saga hook that wakes the scheduler whenever a saved saga carries a
    /// timeout.
    #[must_use]
    pub fn trigger(&self) -> TimeoutTrigger {
        TimeoutTrigger {
            wake: Arc::clone(&self.wake),
        }
    }

    /// Raises every due timeout that was not raised yet, or was raised at
    /// least one redelivery interval ago, and returns how many were
    /// published.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` if the repository query fails or the event bus
    /// is closed.
    pub async fn poll_once(&self) -> Result<usize, DomainError> {
        let now = self.clock.now();
        let due = self.repository.scheduled_timeouts(now).await?;

        let to_raise: Vec<_> = {
            let mut fired = self.fired.lock();
            fired.retain(|saga_id, raised| {
                due.iter()
                    .any(|t| t.saga_id == *saga_id && t.due_at == raised.due_at)
            });
            due.into_iter()
                .filter_map(|t| match fired.get(&t.saga_id) {
                    Some(raised) if raised.due_at == t.due_at => self
                        .redelivery_due(raised.raised_at, now)
                        .then_some((t, raised.deliveries + 1)),
                    _ => Some((t, 1)),
                })
                .collect()
        };

        let mut raised = 0;
        for (timeout, deliveries) in to_raise {
            let event = SagaTimeout::new(&timeout, self.ids.next_id_at(now), now);
            self.publisher.publish(Arc::new(event)).await?;
            if deliveries > 1 {
                warn!(
                    saga_id = %timeout.saga_id,
                    saga_type = %timeout.saga_type,
                    due_at = %timeout.due_at,
                    deliveries,
                    "saga timeout still due, raised again"
                );
            } else {
                info!(
                    saga_id = %timeout.saga_id,
                    saga_type = %timeout.saga_type,
                    correlation_id = %timeout.correlation_id,
                    due_at = %timeout.due_at,
                    "saga timeout raised"
                );
            }
            self.fired.lock().insert(
                timeout.saga_id,
                Raised {
                    due_at: timeout.due_at,
                    raised_at: now,
                    deliveries,
                },
            );
            raised += 1;
        }
        Ok(raised)
    }

    fn redelivery_due(&self, raised_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(raised_at)
            .to_std()
            .is_ok_and(|elapsed| elapsed >= self.redelivery_interval)
    }

    /// Runs the polling loop on the current tokio runtime until the returned
    /// handle is stopped.
    #[must_use]
    pub fn spawn(self: Arc<Self>) -> TimeoutSchedulerHandle {
        let (stop, mut stopped) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(poll_interval = ?self.poll_interval, "timeout scheduler started");
            loop {
                tokio::select! {
                    biased;
                    _ = stopped.changed() => break,
                    _ = interval.tick() => {}
                    () = self.wake.notified() => {}
                }
                if let Err(err) = self.poll_once().await {
                    warn!(error = %err, "timeout poll failed");
                }
            }
            debug!("timeout scheduler stopped");
        });
        TimeoutSchedulerHandle { stop, task }
    }
}

/// Handle to a running scheduler loop.
#[derive(Debug)]
pub struct TimeoutSchedulerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl TimeoutSchedulerHandle {
    /// Stops the loop and waits for it to exit.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(err) = self.task.await {
            warn!(error = %err, "timeout scheduler task failed");
        }
    }
}

/// Wakes a [`TimeoutScheduler`] after a saga save that set a timeout.
#[derive(Debug, Clone)]
pub struct TimeoutTrigger {
    wake: Arc<Notify>,
}

#[async_trait]
impl<S: SagaState> SagaHook<S> for TimeoutTrigger {
    fn name(&self) -> &'static str {
        "timeout-trigger"
    }

    async fn post_save(&self, outcome: &SagaSaveOutcome<S>) -> Result<(), DomainError> {
        if !outcome.duplicate && outcome.saga.timeout().is_some() {
            self.wake.notify_one();
        }
        Ok(())
    }
}
