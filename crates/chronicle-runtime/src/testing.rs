//! Fixtures shared by the unit tests of this crate.

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use chronicle_core::aggregate::AggregateRoot;
use chronicle_core::command::Command;
use chronicle_core::envelope::EnvelopeHeaders;
use chronicle_core::error::DomainError;
use chronicle_core::event::{DomainEvent, EventMetadata};
use chronicle_core::repository::StoredEvent;
use chronicle_core::saga::SagaState;

use crate::processor::{ProcessingObserver, ProcessingOutcome, ProcessingState};

pub(crate) const INCREMENTED: &str = "counter.incremented";

#[derive(Debug, Clone)]
pub(crate) struct Incremented {
    pub metadata: EventMetadata,
    pub by: i64,
}

#[derive(Serialize, Deserialize)]
struct IncrementedPayload {
    by: i64,
}

impl DomainEvent for Incremented {
    fn event_type(&self) -> &'static str {
        INCREMENTED
    }

    fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({ "by": self.by })
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CounterSnapshot {
    pub total: i64,
}

#[derive(Debug, Clone)]
pub(crate) struct Counter {
    id: Uuid,
    version: i64,
    total: i64,
    uncommitted: Vec<Incremented>,
}

impl Counter {
    pub(crate) fn total(&self) -> i64 {
        self.total
    }

    pub(crate) fn increment(&mut self, by: i64) -> Result<(), DomainError> {
        self.increment_for(by, Uuid::nil())
    }

    pub(crate) fn increment_for(&mut self, by: i64, correlation_id: Uuid) -> Result<(), DomainError> {
        if by <= 0 {
            return Err(DomainError::Validation(format!(
                "increment must be positive, got {by}"
            )));
        }
        let sequence_number = self.version + i64::try_from(self.uncommitted.len()).unwrap() + 1;
        self.uncommitted.push(Incremented {
            metadata: EventMetadata {
                event_id: Uuid::new_v4(),
                event_type: INCREMENTED.to_owned(),
                aggregate_id: self.id,
                sequence_number,
                correlation_id,
                causation_id: correlation_id,
                occurred_at: Utc::now(),
            },
            by,
        });
        Ok(())
    }
}

impl AggregateRoot for Counter {
    type Event = Incremented;
    type Snapshot = CounterSnapshot;

    const AGGREGATE_TYPE: &'static str = "counter";

    fn new(id: Uuid) -> Self {
        Self {
            id,
            version: 0,
            total: 0,
            uncommitted: Vec::new(),
        }
    }

    fn aggregate_id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn apply(&mut self, event: &Incremented) {
        self.total += event.by;
        self.version += 1;
    }

    fn uncommitted_events(&self) -> &[Incremented] {
        &self.uncommitted
    }

    fn clear_uncommitted_events(&mut self) {
        self.uncommitted.clear();
    }

    fn decode_event(stored: &StoredEvent) -> Result<Incremented, DomainError> {
        let payload: IncrementedPayload = serde_json::from_value(stored.payload.clone())?;
        Ok(Incremented {
            metadata: EventMetadata {
                event_id: stored.event_id,
                event_type: stored.event_type.clone(),
                aggregate_id: stored.aggregate_id,
                sequence_number: stored.sequence_number,
                correlation_id: stored.correlation_id,
                causation_id: stored.causation_id,
                occurred_at: stored.occurred_at,
            },
            by: payload.by,
        })
    }

    fn to_snapshot(&self) -> CounterSnapshot {
        CounterSnapshot { total: self.total }
    }

    fn from_snapshot(id: Uuid, version: i64, state: CounterSnapshot) -> Self {
        Self {
            id,
            version,
            total: state.total,
            uncommitted: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Increment {
    pub counter_id: Uuid,
    pub by: i64,
}

impl Command for Increment {
    fn command_type(&self) -> &'static str {
        "counter.increment"
    }

    fn correlation_id(&self) -> Uuid {
        self.counter_id
    }

    fn aggregate_id(&self) -> Uuid {
        self.counter_id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct Tally {
    pub seen: u32,
}

impl SagaState for Tally {
    const SAGA_TYPE: &'static str = "test.tally";
}

/// Observer that keeps every transition and outcome.
#[derive(Debug, Default)]
pub(crate) struct RecordingObserver {
    pub transitions: Mutex<Vec<(Uuid, ProcessingState)>>,
    pub outcomes: Mutex<Vec<(Uuid, ProcessingOutcome)>>,
}

impl ProcessingObserver for RecordingObserver {
    fn on_transition(&self, headers: &EnvelopeHeaders, state: ProcessingState) {
        self.transitions.lock().push((headers.message_id, state));
    }

    fn on_outcome(&self, headers: &EnvelopeHeaders, _message_type: &str, outcome: &ProcessingOutcome) {
        self.outcomes.lock().push((headers.message_id, outcome.clone()));
    }
}
