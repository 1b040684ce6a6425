//! Event handlers that drive sagas.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use chronicle_core::envelope::{Envelope, Message, downcast_event};
use chronicle_core::error::DomainError;
use chronicle_core::event::DomainEvent;
use chronicle_core::saga::{SagaInstance, SagaState, SagaTimeout};

use crate::handler::{HandlerContext, MessageHandler, Persisted};
use crate::processor::ProcessingState;
use crate::saga_store::SagaStore;

/// How an event relates to a saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaTrigger {
    /// Starts the saga correlated by the id if it does not exist yet.
    Start(Uuid),
    /// Continues an existing saga; ignored when none exists.
    Continue(Uuid),
    /// The event does not concern this saga type.
    Ignore,
}

type Correlate<E> = Box<dyn Fn(&E) -> SagaTrigger + Send + Sync>;
type Handle<S, E> =
    Box<dyn Fn(&mut SagaInstance<S>, &E, &HandlerContext<'_>) -> Result<(), DomainError> + Send + Sync>;

fn event_of<'a, E: DomainEvent>(name: &str, envelope: &'a Envelope) -> Result<&'a E, DomainError> {
    let Message::Event(event) = &envelope.message else {
        return Err(DomainError::Configuration(format!(
            "{name} received command {}",
            envelope.message.type_name()
        )));
    };
    downcast_event::<E>(event.as_ref()).ok_or_else(|| {
        DomainError::Configuration(format!(
            "{name} received event {}",
            envelope.message.type_name()
        ))
    })
}

fn persisted<S: SagaState>(saga: &SagaInstance<S>, version: i64, duplicate: bool) -> Persisted {
    Persisted {
        stream_id: saga.id(),
        version,
        duplicate,
    }
}

/// Feeds events of type `E` to sagas with state `S`.
///
/// The save's commit id is the event's message id, so a redelivered event
/// does not advance the saga twice.
pub struct SagaEventHandler<S, E> {
    name: String,
    store: Arc<dyn SagaStore<S>>,
    correlate: Correlate<E>,
    handle: Handle<S, E>,
    _types: PhantomData<fn() -> (S, E)>,
}

impl<S: SagaState, E: DomainEvent> SagaEventHandler<S, E> {
    /// Creates a handler. `correlate` decides which saga the event targets;
    /// `handle` runs the saga's reaction.
    #[must_use]
    pub fn new<C, H>(store: Arc<dyn SagaStore<S>>, correlate: C, handle: H) -> Self
    where
        C: Fn(&E) -> SagaTrigger + Send + Sync + 'static,
        H: Fn(&mut SagaInstance<S>, &E, &HandlerContext<'_>) -> Result<(), DomainError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: format!("{}<{}>", S::SAGA_TYPE, std::any::type_name::<E>()),
            store,
            correlate: Box::new(correlate),
            handle: Box::new(handle),
            _types: PhantomData,
        }
    }
}

#[async_trait]
impl<S: SagaState, E: DomainEvent> MessageHandler for SagaEventHandler<S, E> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(
        &self,
        envelope: &Envelope,
        ctx: &HandlerContext<'_>,
    ) -> Result<Option<Persisted>, DomainError> {
        let event = event_of::<E>(&self.name, envelope)?;
        let (correlation_id, may_start) = match (self.correlate)(event) {
            SagaTrigger::Start(id) => (id, true),
            SagaTrigger::Continue(id) => (id, false),
            SagaTrigger::Ignore => return Ok(None),
        };

        let mut saga = match self.store.get(correlation_id).await? {
            Some(saga) => saga,
            None if may_start => SagaInstance::new(correlation_id),
            None => {
                debug!(handler = %self.name, %correlation_id, "no saga to continue");
                return Ok(None);
            }
        };
        if saga.is_completed() {
            debug!(handler = %self.name, saga_id = %saga.id(), "saga already completed");
            return Ok(None);
        }
        ctx.transition(ProcessingState::AggregateLoaded);
        (self.handle)(&mut saga, event, ctx)?;
        ctx.transition(ProcessingState::HandlerExecuted);

        match self.store.save(saga, ctx.headers().message_id).await {
            Ok(outcome) => Ok(Some(persisted(&outcome.saga, outcome.version, outcome.duplicate))),
            Err(DomainError::SagaCompleted(saga_id)) => {
                debug!(handler = %self.name, %saga_id, "saga completed concurrently");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

type OnTimeout<S> =
    Box<dyn Fn(&mut SagaInstance<S>, &HandlerContext<'_>) -> Result<(), DomainError> + Send + Sync>;

/// Delivers [`SagaTimeout`] events to sagas with state `S`.
///
/// A timeout is stale, and dropped, when the saga completed or its timeout
/// was cleared or rescheduled after the event was raised.
pub struct SagaTimeoutHandler<S> {
    name: String,
    store: Arc<dyn SagaStore<S>>,
    on_timeout: OnTimeout<S>,
}

impl<S: SagaState> SagaTimeoutHandler<S> {
    /// Creates a handler running `on_timeout` when a saga's timeout fires.
    #[must_use]
    pub fn new<F>(store: Arc<dyn SagaStore<S>>, on_timeout: F) -> Self
    where
        F: Fn(&mut SagaInstance<S>, &HandlerContext<'_>) -> Result<(), DomainError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: format!("{}<timeout>", S::SAGA_TYPE),
            store,
            on_timeout: Box::new(on_timeout),
        }
    }
}

#[async_trait]
impl<S: SagaState> MessageHandler for SagaTimeoutHandler<S> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(
        &self,
        envelope: &Envelope,
        ctx: &HandlerContext<'_>,
    ) -> Result<Option<Persisted>, DomainError> {
        let timeout = event_of::<SagaTimeout>(&self.name, envelope)?;
        if timeout.saga_type != S::SAGA_TYPE {
            return Ok(None);
        }
        let Some(mut saga) = self.store.get(timeout.correlation_id()).await? else {
            return Ok(None);
        };
        if saga.is_completed() || saga.timeout() != Some(timeout.scheduled) {
            debug!(
                handler = %self.name,
                saga_id = %saga.id(),
                scheduled = %timeout.scheduled,
                current = ?saga.timeout(),
                "stale timeout dropped"
            );
            return Ok(None);
        }
        ctx.transition(ProcessingState::AggregateLoaded);
        saga.clear_timeout();
        (self.on_timeout)(&mut saga, ctx)?;
        ctx.transition(ProcessingState::HandlerExecuted);

        match self.store.save(saga, ctx.headers().message_id).await {
            Ok(outcome) => Ok(Some(persisted(&outcome.saga, outcome.version, outcome.duplicate))),
            Err(DomainError::SagaCompleted(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }
}
