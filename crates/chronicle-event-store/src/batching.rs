//! Batched (`async`) event store writes.
//!
//! [`BatchingEventStore`] accepts commits into a queue and returns as soon as
//! the commit is queued. A background flusher writes queued commits to the
//! wrapped store in arrival order, on every `flush_interval` tick or as soon
//! as `batch_size` commits are waiting. Reads go straight to the wrapped
//! store, so they only observe flushed commits.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};
use uuid::Uuid;

use chronicle_core::config::EventStoreSettings;
use chronicle_core::error::DomainError;
use chronicle_core::repository::{Commit, EventStore, StoredEvent};

enum Queued {
    Commit(Commit),
    Flush(oneshot::Sender<()>),
    Close(oneshot::Sender<()>),
}

/// Event store wrapper that trades durability latency for throughput.
pub struct BatchingEventStore {
    inner: Arc<dyn EventStore>,
    queue: mpsc::UnboundedSender<Queued>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for BatchingEventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchingEventStore")
            .field("closed", &self.queue.is_closed())
            .finish_non_exhaustive()
    }
}

impl BatchingEventStore {
    /// Wraps `inner` and spawns the background flusher on the current Tokio
    /// runtime.
    #[must_use]
    pub fn spawn(inner: Arc<dyn EventStore>, settings: &EventStoreSettings) -> Self {
        let (queue, receiver) = mpsc::unbounded_channel();
        let flusher = tokio::spawn(run_flusher(
            Arc::clone(&inner),
            receiver,
            settings.flush_interval,
            settings.batch_size.max(1),
        ));
        Self {
            inner,
            queue,
            flusher: Mutex::new(Some(flusher)),
        }
    }

    /// Writes every commit queued so far and waits for the write to finish.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the flusher has stopped.
    pub async fn flush(&self) -> Result<(), DomainError> {
        let (done, flushed) = oneshot::channel();
        self.queue
            .send(Queued::Flush(done))
            .map_err(|_| writer_stopped())?;
        flushed.await.map_err(|_| writer_stopped())
    }

    /// Flushes outstanding commits and stops the flusher. Later appends fail.
    pub async fn shutdown(&self) {
        let (done, closed) = oneshot::channel();
        if self.queue.send(Queued::Close(done)).is_ok() {
            let _ = closed.await;
        }
        let handle = self.flusher.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "event store flusher terminated abnormally");
            }
        }
    }
}

fn writer_stopped() -> DomainError {
    DomainError::Infrastructure("batched event store writer has stopped".to_owned())
}

async fn run_flusher(
    inner: Arc<dyn EventStore>,
    mut receiver: mpsc::UnboundedReceiver<Queued>,
    flush_interval: Duration,
    batch_size: usize,
) {
    let mut pending: Vec<Commit> = Vec::with_capacity(batch_size);
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => write_batch(inner.as_ref(), &mut pending).await,
            queued = receiver.recv() => match queued {
                Some(Queued::Commit(commit)) => {
                    pending.push(commit);
                    if pending.len() >= batch_size {
                        write_batch(inner.as_ref(), &mut pending).await;
                    }
                }
                Some(Queued::Flush(done)) => {
                    write_batch(inner.as_ref(), &mut pending).await;
                    let _ = done.send(());
                }
                Some(Queued::Close(done)) => {
                    receiver.close();
                    while let Ok(Queued::Commit(commit)) = receiver.try_recv() {
                        pending.push(commit);
                    }
                    write_batch(inner.as_ref(), &mut pending).await;
                    let _ = done.send(());
                    break;
                }
                None => {
                    write_batch(inner.as_ref(), &mut pending).await;
                    break;
                }
            },
        }
    }
    debug!("event store flusher stopped");
}

async fn write_batch(inner: &dyn EventStore, pending: &mut Vec<Commit>) {
    if pending.is_empty() {
        return;
    }
    debug!(commits = pending.len(), "flushing queued commits");
    for commit in pending.drain(..) {
        let aggregate_id = commit.aggregate_id;
        let commit_id = commit.commit_id;
        match inner.append(commit).await {
            Ok(_) => {}
            Err(DomainError::DuplicateCommit { .. }) => {
                debug!(%aggregate_id, %commit_id, "queued commit was already written");
            }
            Err(e) => {
                error!(%aggregate_id, %commit_id, error = %e, "failed to flush queued commit");
            }
        }
    }
}

#[async_trait]
impl EventStore for BatchingEventStore {
    async fn append(&self, commit: Commit) -> Result<i64, DomainError> {
        commit.validate()?;
        let version = commit.resulting_version();
        if commit.events.is_empty() {
            return Ok(version);
        }
        self.queue.send(Queued::Commit(commit)).map_err(|_| {
            warn!("append rejected, batched event store is shut down");
            writer_stopped()
        })?;
        Ok(version)
    }

    async fn read_page(
        &self,
        aggregate_id: Uuid,
        from_version: i64,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        self.inner.read_page(aggregate_id, from_version, limit).await
    }

    fn page_size(&self) -> usize {
        self.inner.page_size()
    }

    async fn undispatched(&self) -> Result<Vec<Commit>, DomainError> {
        self.inner.undispatched().await
    }

    async fn mark_dispatched(
        &self,
        aggregate_id: Uuid,
        commit_id: Uuid,
    ) -> Result<(), DomainError> {
        self.inner.mark_dispatched(aggregate_id, commit_id).await
    }
}
