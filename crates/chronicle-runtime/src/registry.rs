//! Dispatch tables mapping message types to handlers.
//!
//! A registry is assembled once at startup and validated when built:
//! registering a handler for the wrong message kind, or a second handler for
//! one command type, fails there rather than at first dispatch.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use chronicle_core::command::Command;
use chronicle_core::envelope::Message;
use chronicle_core::error::DomainError;
use chronicle_core::event::DomainEvent;

use crate::handler::MessageHandler;

/// Which message kind a registry dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Commands: exactly one handler per type.
    Command,
    /// Events: any number of handlers per type.
    Event,
}

struct Registration {
    type_id: TypeId,
    type_name: &'static str,
    kind: MessageKind,
    handler: Arc<dyn MessageHandler>,
}

/// Immutable message-type → handlers table.
pub struct HandlerRegistry {
    kind: MessageKind,
    handlers: HashMap<TypeId, Vec<Arc<dyn MessageHandler>>>,
    type_names: HashMap<TypeId, &'static str>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&str> = self.type_names.values().copied().collect();
        types.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("kind", &self.kind)
            .field("types", &types)
            .finish()
    }
}

impl HandlerRegistry {
    /// Starts a command registry.
    #[must_use]
    pub fn commands() -> RegistryBuilder {
        RegistryBuilder::new(MessageKind::Command)
    }

    /// Starts an event registry.
    #[must_use]
    pub fn events() -> RegistryBuilder {
        RegistryBuilder::new(MessageKind::Event)
    }

    /// Message kind this registry dispatches.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Handlers registered for the body type of `message`, in registration
    /// order.
    #[must_use]
    pub fn handlers_for(&self, message: &Message) -> &[Arc<dyn MessageHandler>] {
        self.handlers
            .get(&message.body_type_id())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of message types with at least one handler.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Collects registrations for a [`HandlerRegistry`].
pub struct RegistryBuilder {
    kind: MessageKind,
    registrations: Vec<Registration>,
}

impl std::fmt::Debug for RegistryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("kind", &self.kind)
            .field("registrations", &self.registrations.len())
            .finish()
    }
}

impl RegistryBuilder {
    fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            registrations: Vec::new(),
        }
    }

    /// Registers `handler` for command type `C`.
    #[must_use]
    pub fn command<C: Command>(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.registrations.push(Registration {
            type_id: TypeId::of::<C>(),
            type_name: std::any::type_name::<C>(),
            kind: MessageKind::Command,
            handler,
        });
        self
    }

    /// Registers `handler` for event type `E`.
    #[must_use]
    pub fn event<E: DomainEvent>(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.registrations.push(Registration {
            type_id: TypeId::of::<E>(),
            type_name: std::any::type_name::<E>(),
            kind: MessageKind::Event,
            handler,
        });
        self
    }

    /// Validates and freezes the table.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Configuration` if a registration targets the
    /// other message kind, or a command type has more than one handler.
    pub fn build(self) -> Result<HandlerRegistry, DomainError> {
        let mut handlers: HashMap<TypeId, Vec<Arc<dyn MessageHandler>>> = HashMap::new();
        let mut type_names = HashMap::new();
        for registration in self.registrations {
            if registration.kind != self.kind {
                return Err(DomainError::Configuration(format!(
                    "{:?} registry cannot dispatch {:?} {}",
                    self.kind, registration.kind, registration.type_name
                )));
            }
            let entry = handlers.entry(registration.type_id).or_default();
            if self.kind == MessageKind::Command && !entry.is_empty() {
                return Err(DomainError::Configuration(format!(
                    "command {} already has a handler",
                    registration.type_name
                )));
            }
            entry.push(registration.handler);
            type_names.insert(registration.type_id, registration.type_name);
        }
        Ok(HandlerRegistry {
            kind: self.kind,
            handlers,
            type_names,
        })
    }
}
