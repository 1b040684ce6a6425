//! Typed producers that wrap commands and events into envelopes.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use chronicle_core::clock::SharedClock;
use chronicle_core::command::Command;
use chronicle_core::envelope::Envelope;
use chronicle_core::error::DomainError;
use chronicle_core::event::DomainEvent;
use chronicle_core::sequential::SequentialIdGenerator;

use crate::bus::MessageSender;

/// Sends commands to a command bus.
///
/// Each command gets a fresh sequential message id, which the command handler
/// later uses as the commit id.
#[derive(Clone)]
pub struct CommandPublisher {
    sender: MessageSender,
    ids: Arc<SequentialIdGenerator>,
    clock: SharedClock,
}

impl std::fmt::Debug for CommandPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandPublisher")
            .field("sender", &self.sender)
            .finish_non_exhaustive()
    }
}

impl CommandPublisher {
    /// Creates a publisher on `sender`.
    #[must_use]
    pub fn new(sender: MessageSender, ids: Arc<SequentialIdGenerator>, clock: SharedClock) -> Self {
        Self { sender, ids, clock }
    }

    /// Queues `command` and returns its message id.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::BusClosed` if the bus no longer accepts envelopes.
    pub async fn send(&self, command: Arc<dyn Command>) -> Result<Uuid, DomainError> {
        let now = self.clock.now();
        let message_id = self.ids.next_id_at(now);
        debug!(
            %message_id,
            command_type = command.command_type(),
            aggregate_id = %command.aggregate_id(),
            "sending command"
        );
        self.sender
            .send(Envelope::command(message_id, now, command))
            .await?;
        Ok(message_id)
    }
}

/// Publishes events to an event bus. The message id is the event id.
#[derive(Clone)]
pub struct EventPublisher {
    sender: MessageSender,
    clock: SharedClock,
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("sender", &self.sender)
            .finish_non_exhaustive()
    }
}

impl EventPublisher {
    /// Creates a publisher on `sender`.
    #[must_use]
    pub fn new(sender: MessageSender, clock: SharedClock) -> Self {
        Self { sender, clock }
    }

    /// Queues `event`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::BusClosed` if the bus no longer accepts envelopes.
    pub async fn publish(&self, event: Arc<dyn DomainEvent>) -> Result<(), DomainError> {
        let message_id = event.metadata().event_id;
        debug!(%message_id, event_type = event.event_type(), "publishing event");
        self.sender
            .send(Envelope::event(message_id, self.clock.now(), event))
            .await
    }
}
