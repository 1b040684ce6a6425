//! Re-publishing of commits whose events never reached the bus.
//!
//! A process that stops between appending a commit and publishing its events
//! leaves the commit undispatched. Running recovery at startup publishes those
//! events and marks the commits dispatched.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use chronicle_core::aggregate::AggregateRoot;
use chronicle_core::error::DomainError;
use chronicle_core::event::DomainEvent;
use chronicle_core::repository::{EventStore, StoredEvent};

use crate::publisher::EventPublisher;

type Decoder = Box<dyn Fn(&StoredEvent) -> Result<Arc<dyn DomainEvent>, DomainError> + Send + Sync>;

/// Counts from one recovery run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Commits published and marked dispatched.
    pub commits: usize,
    /// Events published.
    pub events: usize,
    /// Commits left undispatched because no decoder knows their aggregate
    /// type.
    pub skipped: usize,
}

/// Publishes undispatched commits of the registered aggregate types.
pub struct DispatchRecovery {
    events: Arc<dyn EventStore>,
    publisher: EventPublisher,
    decoders: HashMap<&'static str, Decoder>,
}

impl std::fmt::Debug for DispatchRecovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&str> = self.decoders.keys().copied().collect();
        types.sort_unstable();
        f.debug_struct("DispatchRecovery")
            .field("aggregate_types", &types)
            .finish_non_exhaustive()
    }
}

impl DispatchRecovery {
    /// Creates a recovery with no aggregate types registered.
    #[must_use]
    pub fn new(events: Arc<dyn EventStore>, publisher: EventPublisher) -> Self {
        Self {
            events,
            publisher,
            decoders: HashMap::new(),
        }
    }

    /// Registers aggregate type `A`'s event decoder.
    #[must_use]
    pub fn with_aggregate<A: AggregateRoot>(mut self) -> Self {
        self.decoders.insert(
            A::AGGREGATE_TYPE,
            Box::new(|stored| {
                let event = A::decode_event(stored)?;
                Ok(Arc::new(event) as Arc<dyn DomainEvent>)
            }),
        );
        self
    }

    /// Publishes every undispatched commit, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` if the store cannot be read or updated, an event
    /// does not decode, or the bus is closed. Commits handled before the
    /// error stay dispatched.
    pub async fn run(&self) -> Result<RecoveryReport, DomainError> {
        let mut report = RecoveryReport::default();
        for commit in self.events.undispatched().await? {
            let Some(decode) = self.decoders.get(commit.aggregate_type.as_str()) else {
                warn!(
                    commit_id = %commit.commit_id,
                    aggregate_type = %commit.aggregate_type,
                    "no decoder for undispatched commit"
                );
                report.skipped += 1;
                continue;
            };
            let decoded = commit
                .events
                .iter()
                .map(|stored| decode(stored))
                .collect::<Result<Vec<_>, _>>()?;
            for event in decoded {
                self.publisher.publish(event).await?;
                report.events += 1;
            }
            self.events
                .mark_dispatched(commit.aggregate_id, commit.commit_id)
                .await?;
            report.commits += 1;
        }
        if report.commits > 0 || report.skipped > 0 {
            info!(
                commits = report.commits,
                events = report.events,
                skipped = report.skipped,
                "undispatched commits recovered"
            );
        }
        Ok(report)
    }
}
