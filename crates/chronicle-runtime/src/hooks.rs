//! Post-save hook pipelines for aggregate and saga stores.
//!
//! Hooks run in registration order once a save has committed. A failing hook
//! is logged and the remaining hooks still run; the save itself stays
//! successful.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error};
use uuid::Uuid;

use chronicle_core::aggregate::AggregateRoot;
use chronicle_core::error::DomainError;
use chronicle_core::event::DomainEvent;
use chronicle_core::repository::EventStore;
use chronicle_core::saga::{SagaInstance, SagaState, ScheduledTimeout};

use crate::aggregate_store::{AggregateStore, SaveOutcome};
use crate::publisher::{CommandPublisher, EventPublisher};
use crate::saga_store::{SagaSaveOutcome, SagaStore};

/// Side effect run after an aggregate save commits.
#[async_trait]
pub trait AggregateHook<A: AggregateRoot>: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Runs the side effect.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` if the side effect failed. The save is not undone.
    async fn post_save(&self, outcome: &SaveOutcome<A>) -> Result<(), DomainError>;
}

/// Side effect run after a saga save commits.
#[async_trait]
pub trait SagaHook<S: SagaState>: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Runs the side effect.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` if the side effect failed. The save is not undone.
    async fn post_save(&self, outcome: &SagaSaveOutcome<S>) -> Result<(), DomainError>;
}

/// Aggregate store decorator running hooks after each successful save.
pub struct HookedAggregateStore<A> {
    inner: Arc<dyn AggregateStore<A>>,
    hooks: Vec<Arc<dyn AggregateHook<A>>>,
}

impl<A: AggregateRoot> std::fmt::Debug for HookedAggregateStore<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hooks: Vec<&str> = self.hooks.iter().map(|hook| hook.name()).collect();
        f.debug_struct("HookedAggregateStore")
            .field("hooks", &hooks)
            .finish_non_exhaustive()
    }
}

impl<A: AggregateRoot> HookedAggregateStore<A> {
    /// Wraps `inner` with an empty hook list.
    #[must_use]
    pub fn new(inner: Arc<dyn AggregateStore<A>>) -> Self {
        Self {
            inner,
            hooks: Vec::new(),
        }
    }

    /// Appends a hook.
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn AggregateHook<A>>) -> Self {
        self.hooks.push(hook);
        self
    }
}

#[async_trait]
impl<A: AggregateRoot> AggregateStore<A> for HookedAggregateStore<A> {
    async fn get(&self, aggregate_id: Uuid) -> Result<A, DomainError> {
        self.inner.get(aggregate_id).await
    }

    async fn save(&self, aggregate: A, commit_id: Uuid) -> Result<SaveOutcome<A>, DomainError> {
        let outcome = self.inner.save(aggregate, commit_id).await?;
        for hook in &self.hooks {
            if let Err(err) = hook.post_save(&outcome).await {
                error!(
                    hook = hook.name(),
                    aggregate_id = %outcome.aggregate.aggregate_id(),
                    %commit_id,
                    error = %err,
                    "post-save hook failed"
                );
            }
        }
        Ok(outcome)
    }
}

/// Saga store decorator running hooks after each successful save.
pub struct HookedSagaStore<S> {
    inner: Arc<dyn SagaStore<S>>,
    hooks: Vec<Arc<dyn SagaHook<S>>>,
}

impl<S: SagaState> std::fmt::Debug for HookedSagaStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hooks: Vec<&str> = self.hooks.iter().map(|hook| hook.name()).collect();
        f.debug_struct("HookedSagaStore")
            .field("hooks", &hooks)
            .finish_non_exhaustive()
    }
}

impl<S: SagaState> HookedSagaStore<S> {
    /// Wraps `inner` with an empty hook list.
    #[must_use]
    pub fn new(inner: Arc<dyn SagaStore<S>>) -> Self {
        Self {
            inner,
            hooks: Vec::new(),
        }
    }

    /// Appends a hook.
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn SagaHook<S>>) -> Self {
        self.hooks.push(hook);
        self
    }
}

#[async_trait]
impl<S: SagaState> SagaStore<S> for HookedSagaStore<S> {
    async fn get(&self, correlation_id: Uuid) -> Result<Option<SagaInstance<S>>, DomainError> {
        self.inner.get(correlation_id).await
    }

    async fn save(
        &self,
        saga: SagaInstance<S>,
        commit_id: Uuid,
    ) -> Result<SagaSaveOutcome<S>, DomainError> {
        let outcome = self.inner.save(saga, commit_id).await?;
        for hook in &self.hooks {
            if let Err(err) = hook.post_save(&outcome).await {
                error!(
                    hook = hook.name(),
                    saga_id = %outcome.saga.id(),
                    %commit_id,
                    error = %err,
                    "post-save hook failed"
                );
            }
        }
        Ok(outcome)
    }

    async fn scheduled_timeouts(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<ScheduledTimeout>, DomainError> {
        self.inner.scheduled_timeouts(before).await
    }

    async fn purge_completed(&self) -> Result<u64, DomainError> {
        self.inner.purge_completed().await
    }
}

/// Publishes the events of each new commit, then flags the commit as
/// dispatched when enabled.
pub struct PublishEventsHook<A> {
    publisher: EventPublisher,
    events: Arc<dyn EventStore>,
    mark_dispatched: bool,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A: AggregateRoot> PublishEventsHook<A> {
    /// Creates the hook. `events` must be the store the commits land in.
    #[must_use]
    pub fn new(publisher: EventPublisher, events: Arc<dyn EventStore>, mark_dispatched: bool) -> Self {
        Self {
            publisher,
            events,
            mark_dispatched,
            _aggregate: PhantomData,
        }
    }
}

#[async_trait]
impl<A: AggregateRoot> AggregateHook<A> for PublishEventsHook<A> {
    fn name(&self) -> &'static str {
        "publish-events"
    }

    async fn post_save(&self, outcome: &SaveOutcome<A>) -> Result<(), DomainError> {
        if outcome.duplicate || outcome.events.is_empty() {
            return Ok(());
        }
        for event in &outcome.events {
            let event: Arc<dyn DomainEvent> = Arc::new(event.clone());
            self.publisher.publish(event).await?;
        }
        if self.mark_dispatched {
            self.events
                .mark_dispatched(outcome.aggregate.aggregate_id(), outcome.commit_id)
                .await?;
        }
        debug!(
            aggregate_id = %outcome.aggregate.aggregate_id(),
            commit_id = %outcome.commit_id,
            events = outcome.events.len(),
            "commit dispatched"
        );
        Ok(())
    }
}

/// Sends the commands a saga published once its save commits.
pub struct PublishCommandsHook<S> {
    publisher: CommandPublisher,
    _state: PhantomData<fn() -> S>,
}

impl<S: SagaState> PublishCommandsHook<S> {
    /// Creates the hook.
    #[must_use]
    pub fn new(publisher: CommandPublisher) -> Self {
        Self {
            publisher,
            _state: PhantomData,
        }
    }
}

#[async_trait]
impl<S: SagaState> SagaHook<S> for PublishCommandsHook<S> {
    fn name(&self) -> &'static str {
        "publish-commands"
    }

    async fn post_save(&self, outcome: &SagaSaveOutcome<S>) -> Result<(), DomainError> {
        if outcome.duplicate {
            return Ok(());
        }
        for command in &outcome.published {
            self.publisher.send(Arc::clone(command)).await?;
        }
        Ok(())
    }
}
