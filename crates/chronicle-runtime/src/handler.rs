//! Message handlers and the per-attempt handling context.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use chronicle_core::aggregate::AggregateRoot;
use chronicle_core::clock::Clock;
use chronicle_core::command::Command;
use chronicle_core::envelope::{Envelope, EnvelopeHeaders, Message, downcast_command};
use chronicle_core::error::DomainError;

use crate::aggregate_store::AggregateStore;
use crate::processor::{ProcessingObserver, ProcessingState};

/// What a handler persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Persisted {
    /// Aggregate or saga id.
    pub stream_id: Uuid,
    /// Version after the save.
    pub version: i64,
    /// The save had already been applied.
    pub duplicate: bool,
}

/// Context handed to a handler for one attempt.
pub struct HandlerContext<'a> {
    headers: &'a EnvelopeHeaders,
    clock: &'a dyn Clock,
    observer: &'a dyn ProcessingObserver,
    attempt: u32,
}

impl<'a> HandlerContext<'a> {
    /// Creates a context for attempt number `attempt` (1-based).
    #[must_use]
    pub fn new(
        headers: &'a EnvelopeHeaders,
        clock: &'a dyn Clock,
        observer: &'a dyn ProcessingObserver,
        attempt: u32,
    ) -> Self {
        Self {
            headers,
            clock,
            observer,
            attempt,
        }
    }

    /// Headers of the envelope being handled.
    #[must_use]
    pub fn headers(&self) -> &EnvelopeHeaders {
        self.headers
    }

    /// Current time.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// The clock the processor runs on.
    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock
    }

    /// Attempt number, starting at 1.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Reports a processing state change.
    pub fn transition(&self, state: ProcessingState) {
        self.observer.on_transition(self.headers, state);
    }
}

/// Handles one message type: loads the target, runs business logic, saves.
///
/// Returns `Ok(None)` when the message did not concern this handler (for
/// instance an event for a saga that does not exist).
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Handles one attempt.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` from loading, business logic or saving.
    async fn handle(
        &self,
        envelope: &Envelope,
        ctx: &HandlerContext<'_>,
    ) -> Result<Option<Persisted>, DomainError>;
}

/// Runs a command against the aggregate it targets.
///
/// The commit id of the save is the envelope's message id, so a redelivered
/// command is recognized as already applied.
pub struct AggregateCommandHandler<A, C, F> {
    name: String,
    store: Arc<dyn AggregateStore<A>>,
    execute: F,
    _command: PhantomData<fn(&C)>,
}

impl<A, C, F> AggregateCommandHandler<A, C, F>
where
    A: AggregateRoot,
    C: Command,
    F: Fn(&mut A, &C, &HandlerContext<'_>) -> Result<(), DomainError> + Send + Sync + 'static,
{
    /// Creates a handler running `execute` on aggregates from `store`.
    #[must_use]
    pub fn new(store: Arc<dyn AggregateStore<A>>, execute: F) -> Self {
        Self {
            name: format!("{}<{}>", A::AGGREGATE_TYPE, std::any::type_name::<C>()),
            store,
            execute,
            _command: PhantomData,
        }
    }
}

#[async_trait]
impl<A, C, F> MessageHandler for AggregateCommandHandler<A, C, F>
where
    A: AggregateRoot,
    C: Command,
    F: Fn(&mut A, &C, &HandlerContext<'_>) -> Result<(), DomainError> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(
        &self,
        envelope: &Envelope,
        ctx: &HandlerContext<'_>,
    ) -> Result<Option<Persisted>, DomainError> {
        let Message::Command(command) = &envelope.message else {
            return Err(DomainError::Configuration(format!(
                "{} received event {}",
                self.name,
                envelope.message.type_name()
            )));
        };
        let command = downcast_command::<C>(command.as_ref()).ok_or_else(|| {
            DomainError::Configuration(format!(
                "{} received command {}",
                self.name,
                envelope.message.type_name()
            ))
        })?;

        let mut aggregate = self.store.get(command.aggregate_id()).await?;
        ctx.transition(ProcessingState::AggregateLoaded);
        (self.execute)(&mut aggregate, command, ctx)?;
        ctx.transition(ProcessingState::HandlerExecuted);

        let outcome = self.store.save(aggregate, ctx.headers().message_id).await?;
        Ok(Some(Persisted {
            stream_id: outcome.aggregate.aggregate_id(),
            version: outcome.version,
            duplicate: outcome.duplicate,
        }))
    }
}

#[cfg(test)]
mod tests {
    use chronicle_core::clock::SystemClock;
    use chronicle_core::config::AggregateStoreSettings;
    use chronicle_core::repository::EventStore;
    use chronicle_event_store::{InMemoryEventStore, InMemorySnapshotStore};

    use super::*;
    use crate::aggregate_store::EventSourcedAggregateStore;
    use crate::processor::TracingObserver;
    use crate::testing::{Counter, Increment, RecordingObserver};

    fn handler(events: Arc<InMemoryEventStore>) -> impl MessageHandler {
        let store: Arc<dyn AggregateStore<Counter>> =
            Arc::new(EventSourcedAggregateStore::<Counter>::new(
                events,
                Arc::new(InMemorySnapshotStore::new()),
                AggregateStoreSettings::default(),
                SystemClock::shared(),
            ));
        AggregateCommandHandler::new(
            store,
            |counter: &mut Counter, command: &Increment, ctx: &HandlerContext<'_>| {
                counter.increment_for(command.by, ctx.headers().correlation_id)
            },
        )
    }

    fn envelope(counter_id: Uuid, by: i64) -> Envelope {
        Envelope::command(
            Uuid::new_v4(),
            Utc::now(),
            Arc::new(Increment { counter_id, by }),
        )
    }

    #[tokio::test]
    async fn test_command_is_applied_and_saved_under_message_id() {
        // Arrange
        let events = Arc::new(InMemoryEventStore::default());
        let handler = handler(events.clone());
        let counter_id = Uuid::new_v4();
        let envelope = envelope(counter_id, 3);
        let observer = RecordingObserver::default();
        let ctx = HandlerContext::new(&envelope.headers, &SystemClock, &observer, 1);

        // Act
        let persisted = handler.handle(&envelope, &ctx).await.unwrap();

        // Assert
        assert_eq!(
            persisted,
            Some(Persisted {
                stream_id: counter_id,
                version: 1,
                duplicate: false,
            })
        );
        let states: Vec<ProcessingState> =
            observer.transitions.lock().iter().map(|(_, s)| *s).collect();
        assert_eq!(
            states,
            vec![ProcessingState::AggregateLoaded, ProcessingState::HandlerExecuted]
        );
        let pending = events.undispatched().await.unwrap();
        assert_eq!(pending[0].commit_id, envelope.headers.message_id);
    }

    #[tokio::test]
    async fn test_redelivered_command_is_reported_as_duplicate() {
        let events = Arc::new(InMemoryEventStore::default());
        let handler = handler(events.clone());
        let counter_id = Uuid::new_v4();
        let envelope = envelope(counter_id, 3);
        let ctx = HandlerContext::new(&envelope.headers, &SystemClock, &TracingObserver, 1);
        handler.handle(&envelope, &ctx).await.unwrap();

        let persisted = handler.handle(&envelope, &ctx).await.unwrap().unwrap();

        assert!(persisted.duplicate);
        assert_eq!(persisted.version, 1);
        assert_eq!(events.stream_version(counter_id), 1);
    }

    #[tokio::test]
    async fn test_business_rule_violation_is_returned() {
        let events = Arc::new(InMemoryEventStore::default());
        let handler = handler(events.clone());
        let counter_id = Uuid::new_v4();
        let envelope = envelope(counter_id, -1);
        let ctx = HandlerContext::new(&envelope.headers, &SystemClock, &TracingObserver, 1);

        let result = handler.handle(&envelope, &ctx).await;

        assert!(matches!(result, Err(DomainError::Validation(_))));
        assert_eq!(events.stream_version(counter_id), 0);
    }
}
