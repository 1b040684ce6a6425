//! Shared test doubles and utilities for the Chronicle event-sourcing engine.

mod clock;
mod logging;
mod store;

pub use clock::{FixedClock, ManualClock};
pub use logging::init_tracing;
pub use store::{FailingEventStore, FlakyEventStore, RecordingEventStore};
