//! Background persistence of accepted placements.
//!
//! Accepted placements are split into individual writes (one for the primary
//! coordinate, one per derived placement) and queued as [`UpdateTask`]s. The
//! [`UpdateWorker`] drains the queue, applies each write through the
//! [`RemotePersistence`] collaborator under the shared rate limit, and
//! re-queues transient failures with a bounded retry counter.
//!
//! Guarantees:
//!
//! - at-least-once application; the remote store is assumed idempotent for
//!   repeated writes of the same coordinate
//! - a failing task is retried at most `max_write_retries` times, then
//!   reported as a permanent failure and dropped — never retried forever
//! - retries of one task are strictly sequential; no concurrent duplicate
//!   writes of the same task
//! - after the stop signal the worker keeps draining until the queue is
//!   empty, so accepted placements are not lost at shutdown
//!
//! A placement's derived writes are independent tasks and may fail
//! independently of their primary.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::PersistError;
use crate::limiter::RateLimiter;
use crate::model::{Identifier, Placement, PlacementWrite, UpdateTask};

/// Receive poll granularity while running.
const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Shorter poll once the stop signal is set and the worker is draining.
const DRAINING_RECV_TIMEOUT: Duration = Duration::from_millis(500);

/// Remote position write, supplied by the host application.
///
/// Re-applying the same write must be safe (idempotent remote semantics).
pub trait RemotePersistence: Send + Sync + 'static {
    /// Persists one placement write.
    fn write_placement(
        &self,
        write: &PlacementWrite,
    ) -> impl Future<Output = Result<(), PersistError>> + Send;
}

impl<P: RemotePersistence> RemotePersistence for Arc<P> {
    fn write_placement(
        &self,
        write: &PlacementWrite,
    ) -> impl Future<Output = Result<(), PersistError>> + Send {
        P::write_placement(self, write)
    }
}

/// Shared write counters, read by the monitor and the final run report.
#[derive(Debug, Default)]
pub struct UpdateCounters {
    enqueued: AtomicU64,
    pending: AtomicU64,
    succeeded: AtomicU64,
    retries: AtomicU64,
    failed: AtomicU64,
    retries_by_identifier: DashMap<Identifier, u32>,
    failed_writes: Mutex<Vec<PlacementWrite>>,
}

impl UpdateCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes queued but not yet terminally handled.
    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::Relaxed)
    }

    /// Writes persisted successfully.
    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    /// Total retry attempts across all tasks.
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Writes dropped after exhausting their retries.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Total writes ever enqueued.
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    /// Retry attempts recorded for one identifier's writes.
    pub fn retries_for(&self, identifier: &Identifier) -> u32 {
        self.retries_by_identifier
            .get(identifier)
            .map(|entry| *entry)
            .unwrap_or(0)
    }

    /// Writes that permanently failed, for the run report.
    pub fn failed_writes(&self) -> Vec<PlacementWrite> {
        self.failed_writes
            .lock()
            .expect("failed writes lock poisoned")
            .clone()
    }

    fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        self.pending.fetch_add(1, Ordering::Relaxed);
    }

    fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        self.pending.fetch_sub(1, Ordering::Relaxed);
    }

    fn record_retry(&self, identifier: &Identifier) {
        self.retries.fetch_add(1, Ordering::Relaxed);
        *self
            .retries_by_identifier
            .entry(identifier.clone())
            .or_insert(0) += 1;
    }

    fn record_permanent_failure(&self, write: PlacementWrite) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.pending.fetch_sub(1, Ordering::Relaxed);
        self.failed_writes
            .lock()
            .expect("failed writes lock poisoned")
            .push(write);
    }

    fn record_permanent_failure_on_closed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.pending.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Producer handle onto the unbounded placement queue.
#[derive(Clone)]
pub struct PlacementQueue {
    tx: mpsc::UnboundedSender<UpdateTask>,
    counters: Arc<UpdateCounters>,
}

impl PlacementQueue {
    /// Creates the queue, its worker-side receiver, and the shared counters.
    pub fn new(counters: Arc<UpdateCounters>) -> (Self, mpsc::UnboundedReceiver<UpdateTask>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, counters }, rx)
    }

    /// Clones the underlying sender, used by the worker to re-queue failed
    /// tasks behind current work.
    pub fn requeue_sender(&self) -> mpsc::UnboundedSender<UpdateTask> {
        self.tx.clone()
    }

    /// Queues every write of an accepted placement.
    pub fn enqueue(&self, placement: Placement) {
        for write in placement.into_writes() {
            self.enqueue_write(write);
        }
    }

    /// Queues a single write.
    pub fn enqueue_write(&self, write: PlacementWrite) {
        self.counters.record_enqueued();
        // The receiver lives as long as the worker; a send can only fail
        // after shutdown, when no placements are produced anymore.
        if self.tx.send(UpdateTask::new(write)).is_err() {
            warn!("placement queue closed, dropping write");
            self.counters.record_permanent_failure_on_closed();
        }
    }
}

/// Background worker that persists queued placement writes.
pub struct UpdateWorker<P: RemotePersistence> {
    rx: mpsc::UnboundedReceiver<UpdateTask>,
    requeue_tx: mpsc::UnboundedSender<UpdateTask>,
    persistence: Arc<P>,
    limiter: Arc<RateLimiter>,
    counters: Arc<UpdateCounters>,
    max_retries: u32,
    retry_delay: Duration,
}

impl<P: RemotePersistence> UpdateWorker<P> {
    /// Creates a worker draining `rx`; `requeue_tx` must be the matching
    /// sender so failed tasks can be re-queued behind current work.
    pub fn new(
        rx: mpsc::UnboundedReceiver<UpdateTask>,
        requeue_tx: mpsc::UnboundedSender<UpdateTask>,
        persistence: Arc<P>,
        limiter: Arc<RateLimiter>,
        counters: Arc<UpdateCounters>,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            rx,
            requeue_tx,
            persistence,
            limiter,
            counters,
            max_retries,
            retry_delay,
        }
    }

    /// Runs until the stop signal is set *and* the queue has drained.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("update worker started");

        loop {
            if cancel.is_cancelled() && self.counters.pending() == 0 {
                break;
            }

            let timeout = if cancel.is_cancelled() {
                DRAINING_RECV_TIMEOUT
            } else {
                RECV_TIMEOUT
            };

            match tokio::time::timeout(timeout, self.rx.recv()).await {
                Ok(Some(task)) => self.process(task).await,
                Ok(None) => break,
                Err(_) => continue,
            }
        }

        info!(
            succeeded = self.counters.succeeded(),
            failed = self.counters.failed(),
            "update worker stopped"
        );
    }

    async fn process(&self, mut task: UpdateTask) {
        self.limiter.acquire().await;

        match self.persistence.write_placement(&task.write).await {
            Ok(()) => {
                debug!(
                    identifier = %task.write.identifier,
                    entity = %task.write.entity_id,
                    position = %task.write.position,
                    attempts = task.attempts,
                    "placement persisted"
                );
                self.counters.record_success();
            }
            Err(e) if e.is_transient() && task.attempts < self.max_retries => {
                task.attempts += 1;
                self.counters.record_retry(&task.write.identifier);
                warn!(
                    identifier = %task.write.identifier,
                    attempt = task.attempts,
                    max = self.max_retries,
                    error = %e,
                    "write failed, re-queueing"
                );
                tokio::time::sleep(self.retry_delay).await;
                if self.requeue_tx.send(task).is_err() {
                    // Channel gone; nothing left to do but count the loss.
                    self.counters.record_permanent_failure_on_closed();
                }
            }
            Err(e) => {
                warn!(
                    identifier = %task.write.identifier,
                    entity = %task.write.entity_id,
                    attempts = task.attempts,
                    error = %e,
                    "giving up on placement write"
                );
                self.counters.record_permanent_failure(task.write);
            }
        }
    }
}
