//! Chronicle runtime.
//!
//! Aggregate and saga stores with their cache and hook decorators, the
//! timeout scheduler, the bounded message bus, handler registries and the
//! command/event processors that tie them together.

pub mod aggregate_store;
pub mod bus;
pub mod cache;
pub mod handler;
pub mod hooks;
pub mod processor;
pub mod publisher;
pub mod recovery;
pub mod registry;
pub mod retry;
pub mod saga_handler;
pub mod saga_store;
pub mod timeout;

#[cfg(test)]
mod testing;

pub use aggregate_store::{AggregateStore, EventSourcedAggregateStore, SaveOutcome};
pub use bus::{Delivery, MessageReceiver, MessageSender, message_bus};
pub use cache::{CachedAggregateStore, CachedSagaStore, SlidingCache};
pub use handler::{AggregateCommandHandler, HandlerContext, MessageHandler, Persisted};
pub use hooks::{
    AggregateHook, HookedAggregateStore, HookedSagaStore, PublishCommandsHook, PublishEventsHook,
    SagaHook,
};
pub use processor::{
    ProcessingObserver, ProcessingOutcome, ProcessingState, Processor, ProcessorBuilder,
    ProcessorStats, ShutdownReport, TracingObserver,
};
pub use publisher::{CommandPublisher, EventPublisher};
pub use recovery::{DispatchRecovery, RecoveryReport};
pub use registry::{HandlerRegistry, MessageKind, RegistryBuilder};
pub use retry::RetryPolicy;
pub use saga_handler::{SagaEventHandler, SagaTimeoutHandler, SagaTrigger};
pub use saga_store::{PersistentSagaStore, SagaSaveOutcome, SagaStore};
pub use timeout::{TimeoutScheduler, TimeoutSchedulerHandle, TimeoutTrigger};
