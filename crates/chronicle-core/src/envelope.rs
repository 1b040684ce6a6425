//! Envelopes carried on the message bus.

use std::any::Any;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::command::Command;
use crate::event::DomainEvent;

/// Upcast to `Any` for runtime-type dispatch of trait objects.
///
/// Implemented for every `'static` type. Call it on a `&dyn Command` or
/// `&dyn DomainEvent`, never on the `Arc` that owns one.
pub trait AsAny {
    /// Returns `self` as `&dyn Any`.
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Headers attached to every envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeHeaders {
    /// Unique message identifier. For commands this is also the commit id
    /// used when persisting the resulting events.
    pub message_id: Uuid,
    /// Correlation ID shared by a command and everything it causes.
    pub correlation_id: Uuid,
    /// When the envelope was created.
    pub timestamp: DateTime<Utc>,
}

/// Message body: either a command or an event.
#[derive(Debug, Clone)]
pub enum Message {
    /// A command targeting one aggregate.
    Command(Arc<dyn Command>),
    /// An event raised by an aggregate or synthesized by the engine.
    Event(Arc<dyn DomainEvent>),
}

impl Message {
    /// Type name of the body, for logging.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Command(command) => command.command_type(),
            Self::Event(event) => event.event_type(),
        }
    }

    /// Runtime type of the body, used to resolve handlers.
    #[must_use]
    pub fn body_type_id(&self) -> std::any::TypeId {
        match self {
            Self::Command(command) => command.as_ref().as_any().type_id(),
            Self::Event(event) => event.as_ref().as_any().type_id(),
        }
    }
}

/// The unit carried on the message bus.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Envelope headers.
    pub headers: EnvelopeHeaders,
    /// Message body.
    pub message: Message,
}

impl Envelope {
    /// Wraps a command.
    #[must_use]
    pub fn command(message_id: Uuid, timestamp: DateTime<Utc>, command: Arc<dyn Command>) -> Self {
        Self {
            headers: EnvelopeHeaders {
                message_id,
                correlation_id: command.correlation_id(),
                timestamp,
            },
            message: Message::Command(command),
        }
    }

    /// Wraps an event.
    #[must_use]
    pub fn event(message_id: Uuid, timestamp: DateTime<Utc>, event: Arc<dyn DomainEvent>) -> Self {
        Self {
            headers: EnvelopeHeaders {
                message_id,
                correlation_id: event.metadata().correlation_id,
                timestamp,
            },
            message: Message::Event(event),
        }
    }
}

/// Downcasts a command trait object to its concrete type.
#[must_use]
pub fn downcast_command<C: Command>(command: &dyn Command) -> Option<&C> {
    command.as_any().downcast_ref::<C>()
}

/// Downcasts an event trait object to its concrete type.
#[must_use]
pub fn downcast_event<E: DomainEvent>(event: &dyn DomainEvent) -> Option<&E> {
    event.as_any().downcast_ref::<E>()
}
