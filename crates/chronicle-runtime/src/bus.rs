//! Bounded multi-producer, multi-consumer envelope queue.
//!
//! Producers block when the queue is full. Closing the bus turns away new
//! envelopes and releases producers still waiting for room. Each envelope is
//! delivered to exactly one consumer. The bus tracks envelopes that were accepted but whose
//! processing has not finished yet, so a processor can tell when it is idle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::{Mutex, Notify, mpsc};
use tracing::trace;

use chronicle_core::envelope::Envelope;
use chronicle_core::error::DomainError;

#[derive(Debug, Default)]
struct Counters {
    pending: AtomicUsize,
    in_flight: AtomicUsize,
}

/// Creates a bus holding at most `capacity` queued envelopes.
#[must_use]
pub fn message_bus(capacity: usize) -> (MessageSender, MessageReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let counters = Arc::new(Counters::default());
    let accepting = Arc::new(AtomicBool::new(true));
    (
        MessageSender {
            tx,
            accepting: Arc::clone(&accepting),
            closed: Arc::new(Notify::new()),
            counters: Arc::clone(&counters),
        },
        MessageReceiver {
            rx: Arc::new(Mutex::new(rx)),
            accepting,
            counters,
        },
    )
}

/// Producer handle. Clones share the same queue.
#[derive(Debug, Clone)]
pub struct MessageSender {
    tx: mpsc::Sender<Envelope>,
    accepting: Arc<AtomicBool>,
    closed: Arc<Notify>,
    counters: Arc<Counters>,
}

impl MessageSender {
    /// Queues an envelope, waiting for room if the bus is full.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::BusClosed` once the bus stopped accepting,
    /// including when it is closed while this call waits for room.
    pub async fn send(&self, envelope: Envelope) -> Result<(), DomainError> {
        let closed = self.closed.notified();
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(DomainError::BusClosed);
        }
        let permit = tokio::select! {
            permit = self.tx.reserve() => permit.map_err(|_| DomainError::BusClosed)?,
            () = closed => return Err(DomainError::BusClosed),
        };
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(DomainError::BusClosed);
        }
        let message_id = envelope.headers.message_id;
        self.counters.pending.fetch_add(1, Ordering::SeqCst);
        permit.send(envelope);
        trace!(%message_id, "envelope queued");
        Ok(())
    }

    /// Stops accepting new envelopes and wakes producers waiting for room.
    /// Already queued envelopes stay queued.
    pub fn close(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        self.closed.notify_waiters();
    }

    /// Whether the bus still accepts envelopes.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }
}

/// Consumer handle. Clones compete for envelopes.
#[derive(Debug, Clone)]
pub struct MessageReceiver {
    rx: Arc<Mutex<mpsc::Receiver<Envelope>>>,
    accepting: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl MessageReceiver {
    /// Waits for the next envelope. Returns `None` once every sender is gone
    /// and the queue is empty.
    pub async fn recv(&self) -> Option<Delivery> {
        let envelope = self.rx.lock().await.recv().await?;
        Some(Delivery::new(envelope, Arc::clone(&self.counters)))
    }

    /// Takes the next envelope if one is queued and no consumer is waiting.
    pub fn try_recv(&self) -> Option<Delivery> {
        let envelope = self.rx.try_lock().ok()?.try_recv().ok()?;
        Some(Delivery::new(envelope, Arc::clone(&self.counters)))
    }

    /// Envelopes accepted but not yet fully processed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.counters.pending.load(Ordering::SeqCst)
    }

    /// Envelopes currently held by a consumer.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::SeqCst)
    }

    /// Envelopes waiting in the queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.pending().saturating_sub(self.in_flight())
    }

    /// Whether the bus still accepts envelopes.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }
}

/// An envelope taken off the bus. It counts as pending until dropped.
#[derive(Debug)]
pub struct Delivery {
    envelope: Envelope,
    counters: Arc<Counters>,
}

impl Delivery {
    fn new(envelope: Envelope, counters: Arc<Counters>) -> Self {
        counters.in_flight.fetch_add(1, Ordering::SeqCst);
        Self { envelope, counters }
    }

    /// The delivered envelope.
    #[must_use]
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.counters.pending.fetch_sub(1, Ordering::SeqCst);
    }
}
