//! Bounded-concurrency command and event processors.
//!
//! A processor owns a fixed pool of workers pulling envelopes from one bus.
//! Each envelope walks `Received → HandlerResolved → AggregateLoaded →
//! HandlerExecuted → Persisted`, with `Retrying` between attempts and
//! `Failed` as the terminal state for errors that are not retried or whose
//! budget ran out. A failed envelope is reported and the worker moves on.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use chronicle_core::clock::{SharedClock, SystemClock};
use chronicle_core::config::ProcessorSettings;
use chronicle_core::envelope::{Envelope, EnvelopeHeaders};
use chronicle_core::error::DomainError;
use chronicle_core::transient::{DefaultTransientErrorClassifier, TransientErrorClassifier};

use crate::bus::{MessageReceiver, MessageSender};
use crate::handler::{HandlerContext, Persisted};
use crate::registry::{HandlerRegistry, MessageKind};
use crate::retry::RetryPolicy;

/// Processing state of one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessingState {
    /// Taken off the bus.
    Received,
    /// Handlers found for the body type.
    HandlerResolved,
    /// Target aggregate or saga loaded.
    AggregateLoaded,
    /// Business logic ran.
    HandlerExecuted,
    /// Every handler persisted its result.
    Persisted,
    /// A transient failure is being retried.
    Retrying,
    /// Terminal failure.
    Failed,
}

/// Terminal outcome of one envelope.
#[derive(Debug, Clone)]
pub enum ProcessingOutcome {
    /// At least one handler saved.
    Persisted(Vec<Persisted>),
    /// No handler had anything to do.
    Ignored,
    /// Processing stopped on this error.
    Failed(DomainError),
}

/// Receives processing progress, typically for logging or metrics.
pub trait ProcessingObserver: Send + Sync {
    /// Called on every state change.
    fn on_transition(&self, _headers: &EnvelopeHeaders, _state: ProcessingState) {}

    /// Called once per envelope with its terminal outcome.
    fn on_outcome(&self, headers: &EnvelopeHeaders, message_type: &str, outcome: &ProcessingOutcome);
}

/// Observer that reports through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl ProcessingObserver for TracingObserver {
    fn on_transition(&self, headers: &EnvelopeHeaders, state: ProcessingState) {
        debug!(message_id = %headers.message_id, ?state, "state changed");
    }

    fn on_outcome(&self, headers: &EnvelopeHeaders, message_type: &str, outcome: &ProcessingOutcome) {
        let message_id = headers.message_id;
        let correlation_id = headers.correlation_id;
        match outcome {
            ProcessingOutcome::Persisted(saves) => {
                debug!(%message_id, %correlation_id, message_type, saves = saves.len(), "message processed");
            }
            ProcessingOutcome::Ignored => {
                debug!(%message_id, %correlation_id, message_type, "message ignored");
            }
            ProcessingOutcome::Failed(err @ DomainError::Validation(_)) => {
                warn!(%message_id, %correlation_id, message_type, error = %err, "message rejected");
            }
            ProcessingOutcome::Failed(err) => {
                error!(%message_id, %correlation_id, message_type, error = %err, "message failed");
            }
        }
    }
}

/// Counters kept by a processor.
#[derive(Debug, Default)]
pub struct ProcessorStats {
    received: AtomicU64,
    persisted: AtomicU64,
    ignored: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
}

impl ProcessorStats {
    /// Envelopes taken off the bus.
    #[must_use]
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Envelopes that ended `Persisted`.
    #[must_use]
    pub fn persisted(&self) -> u64 {
        self.persisted.load(Ordering::Relaxed)
    }

    /// Envelopes that ended `Ignored`.
    #[must_use]
    pub fn ignored(&self) -> u64 {
        self.ignored.load(Ordering::Relaxed)
    }

    /// Envelopes that ended `Failed`.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Retried attempts across all envelopes.
    #[must_use]
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }
}

/// What happened to queued work during shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Envelopes pending at shutdown that were processed.
    pub drained: usize,
    /// Envelopes dropped unprocessed once the shutdown timeout elapsed.
    pub abandoned: usize,
}

struct Worker {
    name: &'static str,
    registry: HandlerRegistry,
    retry: RetryPolicy,
    clock: SharedClock,
    observer: Arc<dyn ProcessingObserver>,
    stats: Arc<ProcessorStats>,
}

impl Worker {
    async fn process(&self, envelope: &Envelope) {
        let headers = &envelope.headers;
        let message_type = envelope.message.type_name();
        let span = info_span!(
            "process",
            processor = self.name,
            message_id = %headers.message_id,
            correlation_id = %headers.correlation_id,
            message_type,
        );
        let outcome = self.dispatch(envelope).instrument(span).await;
        let counter = match &outcome {
            ProcessingOutcome::Persisted(_) => &self.stats.persisted,
            ProcessingOutcome::Ignored => &self.stats.ignored,
            ProcessingOutcome::Failed(_) => &self.stats.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.observer.on_outcome(headers, message_type, &outcome);
    }

    async fn dispatch(&self, envelope: &Envelope) -> ProcessingOutcome {
        let headers = &envelope.headers;
        let observer = self.observer.as_ref();
        let clock = self.clock.as_ref();
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        observer.on_transition(headers, ProcessingState::Received);

        let handlers = self.registry.handlers_for(&envelope.message);
        if handlers.is_empty() {
            return match self.registry.kind() {
                MessageKind::Command => {
                    observer.on_transition(headers, ProcessingState::Failed);
                    ProcessingOutcome::Failed(DomainError::HandlerNotFound(
                        envelope.message.type_name().to_owned(),
                    ))
                }
                MessageKind::Event => ProcessingOutcome::Ignored,
            };
        }
        observer.on_transition(headers, ProcessingState::HandlerResolved);

        let mut saves = Vec::new();
        let mut failure = None;
        for handler in handlers {
            let result = self
                .retry
                .run(
                    |attempt| {
                        let ctx = HandlerContext::new(headers, clock, observer, attempt);
                        async move { handler.handle(envelope, &ctx).await }
                    },
                    |attempt, err| {
                        self.stats.retries.fetch_add(1, Ordering::Relaxed);
                        observer.on_transition(headers, ProcessingState::Retrying);
                        debug!(handler = handler.name(), attempt, error = %err, "retrying");
                    },
                )
                .await;
            match result {
                Ok(Some(persisted)) => saves.push(persisted),
                Ok(None) => {}
                Err(err) => {
                    debug!(handler = handler.name(), error = %err, "handler failed");
                    failure.get_or_insert(err);
                }
            }
        }

        if let Some(err) = failure {
            observer.on_transition(headers, ProcessingState::Failed);
            return ProcessingOutcome::Failed(err);
        }
        if saves.is_empty() {
            return ProcessingOutcome::Ignored;
        }
        observer.on_transition(headers, ProcessingState::Persisted);
        ProcessingOutcome::Persisted(saves)
    }
}

/// Configures a [`Processor`] before its workers start.
pub struct ProcessorBuilder {
    name: &'static str,
    registry: HandlerRegistry,
    sender: MessageSender,
    receiver: MessageReceiver,
    settings: ProcessorSettings,
    classifier: Arc<dyn TransientErrorClassifier>,
    clock: SharedClock,
    observer: Arc<dyn ProcessingObserver>,
}

impl std::fmt::Debug for ProcessorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorBuilder")
            .field("name", &self.name)
            .field("registry", &self.registry)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ProcessorBuilder {
    /// Replaces the default transient error classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn TransientErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Replaces the system clock.
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Replaces the tracing observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ProcessingObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Spawns the worker pool on the current tokio runtime.
    #[must_use]
    pub fn start(self) -> Processor {
        let stats = Arc::new(ProcessorStats::default());
        let worker = Arc::new(Worker {
            name: self.name,
            registry: self.registry,
            retry: RetryPolicy::from_settings(&self.settings, self.classifier),
            clock: self.clock,
            observer: self.observer,
            stats: Arc::clone(&stats),
        });
        let (stop, stopped) = watch::channel(false);
        let concurrency = self.settings.maximum_concurrency_level.max(1);
        let workers = (0..concurrency)
            .map(|index| {
                let worker = Arc::clone(&worker);
                let receiver = self.receiver.clone();
                let stopped = stopped.clone();
                tokio::spawn(run_worker(worker, receiver, stopped, index))
            })
            .collect();
        info!(processor = self.name, workers = concurrency, "processor started");
        Processor {
            name: self.name,
            sender: self.sender,
            receiver: self.receiver,
            stats,
            stop,
            workers: Mutex::new(workers),
            shutdown_timeout: self.settings.shutdown_timeout,
        }
    }
}

async fn run_worker(
    worker: Arc<Worker>,
    receiver: MessageReceiver,
    mut stopped: watch::Receiver<bool>,
    index: usize,
) {
    debug!(processor = worker.name, worker = index, "worker started");
    loop {
        if *stopped.borrow() {
            break;
        }
        let delivery = tokio::select! {
            biased;
            _ = stopped.changed() => break,
            delivery = receiver.recv() => match delivery {
                Some(delivery) => delivery,
                None => break,
            },
        };
        worker.process(delivery.envelope()).await;
    }
    debug!(processor = worker.name, worker = index, "worker stopped");
}

/// A running worker pool bound to one bus.
pub struct Processor {
    name: &'static str,
    sender: MessageSender,
    receiver: MessageReceiver,
    stats: Arc<ProcessorStats>,
    stop: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown_timeout: Duration,
}

impl std::fmt::Debug for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("name", &self.name)
            .field("pending", &self.receiver.pending())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Processor {
    /// Starts configuring a processor dispatching through `registry`.
    #[must_use]
    pub fn builder(
        name: &'static str,
        registry: HandlerRegistry,
        sender: MessageSender,
        receiver: MessageReceiver,
        settings: &ProcessorSettings,
    ) -> ProcessorBuilder {
        ProcessorBuilder {
            name,
            registry,
            sender,
            receiver,
            settings: settings.clone(),
            classifier: Arc::new(DefaultTransientErrorClassifier::default()),
            clock: SystemClock::shared(),
            observer: Arc::new(TracingObserver),
        }
    }

    /// Processor name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// A producer handle for this processor's bus.
    #[must_use]
    pub fn sender(&self) -> MessageSender {
        self.sender.clone()
    }

    /// Counters.
    #[must_use]
    pub fn stats(&self) -> &ProcessorStats {
        &self.stats
    }

    /// Envelopes accepted but not yet processed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.receiver.pending()
    }

    /// Waits until nothing is pending. Returns `false` if `timeout` elapsed
    /// first.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            while self.receiver.pending() > 0 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .is_ok()
    }

    /// Stops accepting envelopes, drains the queue for up to the configured
    /// shutdown timeout, then stops the workers. Envelopes still queued or in
    /// flight after the timeout are abandoned and reported.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.sender.close();
        let pending_at_start = self.receiver.pending();
        info!(processor = self.name, pending = pending_at_start, "processor shutting down");

        let drained_in_time = self.wait_idle(self.shutdown_timeout).await;
        let in_flight = if drained_in_time {
            0
        } else {
            self.receiver.in_flight()
        };
        let _ = self.stop.send(true);

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in &workers {
            if !drained_in_time {
                worker.abort();
            }
        }
        for worker in workers {
            if let Err(err) = worker.await {
                if !err.is_cancelled() {
                    error!(processor = self.name, error = %err, "worker panicked");
                }
            }
        }

        let mut abandoned = in_flight;
        while let Some(delivery) = self.receiver.try_recv() {
            let headers = &delivery.envelope().headers;
            warn!(
                processor = self.name,
                message_id = %headers.message_id,
                message_type = delivery.envelope().message.type_name(),
                "envelope abandoned at shutdown"
            );
            abandoned += 1;
        }
        let report = ShutdownReport {
            drained: pending_at_start.saturating_sub(abandoned),
            abandoned,
        };
        info!(
            processor = self.name,
            drained = report.drained,
            abandoned = report.abandoned,
            "processor stopped"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chronicle_core::aggregate::AggregateRoot;
    use chronicle_core::config::AggregateStoreSettings;
    use chronicle_event_store::{InMemoryEventStore, InMemorySnapshotStore};
    use chronicle_test_support::FlakyEventStore;
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use std::sync::atomic::AtomicBool;

    use crate::aggregate_store::{AggregateStore, EventSourcedAggregateStore, SaveOutcome};
    use crate::bus::message_bus;
    use crate::cache::CachedAggregateStore;
    use crate::handler::{AggregateCommandHandler, MessageHandler};
    use crate::testing::{Counter, Increment, RecordingObserver};

    fn settings() -> ProcessorSettings {
        ProcessorSettings {
            bounded_capacity: 64,
            maximum_concurrency_level: 4,
            retry_timeout: Duration::from_secs(2),
            save_retry_timeout: Duration::from_secs(2),
            transient_retry_delay: Duration::from_millis(1),
            shutdown_timeout: Duration::from_secs(2),
        }
    }

    fn counter_store(events: Arc<dyn chronicle_core::repository::EventStore>) -> Arc<dyn AggregateStore<Counter>> {
        let base = EventSourcedAggregateStore::<Counter>::new(
            events,
            Arc::new(InMemorySnapshotStore::new()),
            AggregateStoreSettings::default(),
            SystemClock::shared(),
        );
        Arc::new(CachedAggregateStore::new(Arc::new(base), Duration::from_secs(60)))
    }

    fn registry(store: Arc<dyn AggregateStore<Counter>>) -> HandlerRegistry {
        HandlerRegistry::commands()
            .command::<Increment>(Arc::new(AggregateCommandHandler::new(
                store,
                |counter: &mut Counter, command: &Increment, _ctx: &HandlerContext<'_>| {
                    counter.increment(command.by)
                },
            )))
            .build()
            .unwrap()
    }

    fn increment(counter_id: Uuid, by: i64) -> Envelope {
        Envelope::command(Uuid::new_v4(), Utc::now(), Arc::new(Increment { counter_id, by }))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_commands_on_one_aggregate_all_persist() {
        // Arrange
        let events = Arc::new(InMemoryEventStore::default());
        let store = counter_store(events.clone());
        let (sender, receiver) = message_bus(64);
        let processor =
            Processor::builder("commands", registry(store.clone()), sender.clone(), receiver, &settings())
                .start();
        let counter_id = Uuid::new_v4();

        // Act
        for by in 1..=20 {
            sender.send(increment(counter_id, by)).await.unwrap();
        }
        assert!(processor.wait_idle(Duration::from_secs(5)).await);

        // Assert
        let counter = store.get(counter_id).await.unwrap();
        assert_eq!(counter.version(), 20);
        assert_eq!(counter.total(), (1..=20).sum::<i64>());
        assert_eq!(processor.stats().persisted(), 20);
        assert_eq!(processor.stats().failed(), 0);
        processor.shutdown().await;
    }

    #[tokio::test]
    async fn test_command_without_handler_fails_and_worker_keeps_going() {
        // Arrange
        let observer = Arc::new(RecordingObserver::default());
        let (sender, receiver) = message_bus(8);
        let processor = Processor::builder(
            "commands",
            HandlerRegistry::commands().build().unwrap(),
            sender.clone(),
            receiver,
            &settings(),
        )
        .with_observer(observer.clone())
        .start();

        // Act
        sender.send(increment(Uuid::new_v4(), 1)).await.unwrap();
        sender.send(increment(Uuid::new_v4(), 1)).await.unwrap();
        assert!(processor.wait_idle(Duration::from_secs(2)).await);

        // Assert
        let outcomes = observer.outcomes.lock();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|(_, outcome)| matches!(
            outcome,
            ProcessingOutcome::Failed(DomainError::HandlerNotFound(_))
        )));
        drop(outcomes);
        processor.shutdown().await;
    }

    #[tokio::test]
    async fn test_transient_storage_fault_is_retried() {
        // Arrange
        let flaky = Arc::new(FlakyEventStore::new(
            Arc::new(InMemoryEventStore::default()),
            2,
            DomainError::StorageUnavailable("connection reset".into()),
        ));
        let store = counter_store(flaky.clone());
        let observer = Arc::new(RecordingObserver::default());
        let (sender, receiver) = message_bus(8);
        let processor = Processor::builder("commands", registry(store.clone()), sender.clone(), receiver, &settings())
            .with_observer(observer.clone())
            .start();
        let counter_id = Uuid::new_v4();
        let envelope = increment(counter_id, 5);
        let message_id = envelope.headers.message_id;

        // Act
        sender.send(envelope).await.unwrap();
        assert!(processor.wait_idle(Duration::from_secs(2)).await);

        // Assert
        assert_eq!(flaky.attempts(), 3);
        assert_eq!(processor.stats().retries(), 2);
        assert_eq!(store.get(counter_id).await.unwrap().total(), 5);
        let retrying = observer
            .transitions
            .lock()
            .iter()
            .filter(|(id, state)| *id == message_id && *state == ProcessingState::Retrying)
            .count();
        assert_eq!(retrying, 2);
        processor.shutdown().await;
    }

    #[tokio::test]
    async fn test_business_rule_violation_is_terminal() {
        let events = Arc::new(InMemoryEventStore::default());
        let store = counter_store(events.clone());
        let observer = Arc::new(RecordingObserver::default());
        let (sender, receiver) = message_bus(8);
        let processor = Processor::builder("commands", registry(store), sender.clone(), receiver, &settings())
            .with_observer(observer.clone())
            .start();

        sender.send(increment(Uuid::new_v4(), 0)).await.unwrap();
        assert!(processor.wait_idle(Duration::from_secs(2)).await);

        assert_eq!(processor.stats().failed(), 1);
        assert_eq!(processor.stats().retries(), 0);
        assert!(matches!(
            observer.outcomes.lock()[0].1,
            ProcessingOutcome::Failed(DomainError::Validation(_))
        ));
        processor.shutdown().await;
    }

    /// Commits a competing increment right before the first save goes
    /// through, so that save always hits a version conflict.
    struct RacingStore {
        inner: Arc<dyn AggregateStore<Counter>>,
        competing_by: i64,
        raced: AtomicBool,
    }

    #[async_trait]
    impl AggregateStore<Counter> for RacingStore {
        async fn get(&self, aggregate_id: Uuid) -> Result<Counter, DomainError> {
            self.inner.get(aggregate_id).await
        }

        async fn save(
            &self,
            aggregate: Counter,
            commit_id: Uuid,
        ) -> Result<SaveOutcome<Counter>, DomainError> {
            if !self.raced.swap(true, Ordering::SeqCst) {
                let mut competitor = self.inner.get(aggregate.aggregate_id()).await?;
                competitor.increment(self.competing_by)?;
                self.inner.save(competitor, Uuid::new_v4()).await?;
            }
            self.inner.save(aggregate, commit_id).await
        }
    }

    #[tokio::test]
    async fn test_conflicting_save_reloads_and_reapplies_command() {
        // Arrange
        let events = Arc::new(InMemoryEventStore::default());
        let store = counter_store(events.clone());
        let counter_id = Uuid::new_v4();
        let mut opened = store.get(counter_id).await.unwrap();
        opened.increment(100).unwrap();
        store.save(opened, Uuid::new_v4()).await.unwrap();
        let racing: Arc<dyn AggregateStore<Counter>> = Arc::new(RacingStore {
            inner: store.clone(),
            competing_by: 7,
            raced: AtomicBool::new(false),
        });
        let observer = Arc::new(RecordingObserver::default());
        let (sender, receiver) = message_bus(8);
        let processor = Processor::builder("commands", registry(racing), sender.clone(), receiver, &settings())
            .with_observer(observer.clone())
            .start();
        let envelope = increment(counter_id, 5);
        let message_id = envelope.headers.message_id;

        // Act
        sender.send(envelope).await.unwrap();
        assert!(processor.wait_idle(Duration::from_secs(2)).await);

        // Assert
        assert!(processor.stats().retries() >= 1);
        assert_eq!(processor.stats().persisted(), 1);
        assert_eq!(processor.stats().failed(), 0);
        let counter = store.get(counter_id).await.unwrap();
        assert_eq!(counter.version(), 3);
        assert_eq!(counter.total(), 112);
        assert_eq!(events.stream_version(counter_id), 3);
        assert!(observer
            .transitions
            .lock()
            .iter()
            .any(|(id, state)| *id == message_id && *state == ProcessingState::Retrying));
        processor.shutdown().await;
    }

    struct Slow;

    #[async_trait]
    impl MessageHandler for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        async fn handle(
            &self,
            _envelope: &Envelope,
            _ctx: &HandlerContext<'_>,
        ) -> Result<Option<Persisted>, DomainError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_shutdown_abandons_work_left_after_timeout() {
        // Arrange
        let (sender, receiver) = message_bus(8);
        let processor = Processor::builder(
            "commands",
            HandlerRegistry::commands()
                .command::<Increment>(Arc::new(Slow))
                .build()
                .unwrap(),
            sender.clone(),
            receiver,
            &ProcessorSettings {
                maximum_concurrency_level: 1,
                shutdown_timeout: Duration::from_millis(50),
                ..settings()
            },
        )
        .start();
        for _ in 0..3 {
            sender.send(increment(Uuid::new_v4(), 1)).await.unwrap();
        }

        // Act
        let report = processor.shutdown().await;

        // Assert
        assert_eq!(report.abandoned, 3);
        assert_eq!(report.drained, 0);
        assert!(matches!(
            sender.send(increment(Uuid::new_v4(), 1)).await,
            Err(DomainError::BusClosed)
        ));
        assert_eq!(processor.pending(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_drains_queued_work() {
        let events = Arc::new(InMemoryEventStore::default());
        let store = counter_store(events.clone());
        let (sender, receiver) = message_bus(8);
        let processor = Processor::builder("commands", registry(store.clone()), sender.clone(), receiver, &settings())
            .start();
        let counter_id = Uuid::new_v4();
        for _ in 0..5 {
            sender.send(increment(counter_id, 1)).await.unwrap();
        }

        let report = processor.shutdown().await;

        assert_eq!(report.abandoned, 0);
        assert_eq!(store.get(counter_id).await.unwrap().total(), 5);
    }
}
