//! Wall-clock abstraction.
//!
//! Event timestamps, commit times and saga timeouts all read time through
//! [`Clock`] so tests can pin or advance it.

use std::sync::Arc;

use chrono::{DateTime, Utc};

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Shared clock handle passed to stores, handlers and the scheduler.
pub type SharedClock = Arc<dyn Clock>;

/// Production clock that delegates to the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Returns the system clock as a shared handle.
    #[must_use]
    pub fn shared() -> SharedClock {
        Arc::new(Self)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
