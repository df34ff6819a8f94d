//! Pipeline orchestration.
//!
//! [`PlacementPipeline::run`] wires the whole thing together: it spawns the
//! search producer, the update worker, and the throughput monitor, then
//! drives the main adjudication loop on the calling task. The main loop is
//! the only place the reviewer is consulted, so identifiers are presented one
//! at a time even though searches and writes proceed concurrently.
//!
//! The loop walks the work items in input order. For each identifier it first
//! checks the side cache, then polls the result channel, re-checking the
//! cache between polls in case the result fell back to it mid-wait. Results
//! arriving for a different identifier are parked in the cache; after
//! `skip_ahead_threshold` consecutive out-of-order results the loop
//! adjudicates the nearest cached later identifier immediately and then
//! returns to the current one, so a single slow search cannot hold completed
//! work hostage. An identifier whose result never arrives within
//! `result_wait` is recorded as skipped and the run proceeds.
//!
//! Shutdown is ordered: drain the write queue (deadline resets on progress),
//! signal cancellation, then join the background tasks with a bounded
//! timeout.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adjudicate::{AdjudicationOutcome, AdjudicationUi, Adjudicator, SpacingContext};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::limiter::RateLimiter;
use crate::model::{SheetRef, WorkItem};
use crate::monitor::PipelineMonitor;
use crate::relay::{ResultRelay, SearchResult};
use crate::report::{IdentifierOutcome, RunReport};
use crate::search::{RemoteSearch, SearchProducer};
use crate::update::{PlacementQueue, RemotePersistence, UpdateCounters, UpdateWorker};

/// The complete search-and-placement pipeline.
///
/// Generic over its three collaborators: the remote search, the remote
/// persistence store, and the adjudication UI.
pub struct PlacementPipeline<S, P, U>
where
    S: RemoteSearch,
    P: RemotePersistence,
    U: AdjudicationUi,
{
    search: Arc<S>,
    persistence: Arc<P>,
    ui: Arc<U>,
    config: PipelineConfig,
}

impl<S, P, U> PlacementPipeline<S, P, U>
where
    S: RemoteSearch,
    P: RemotePersistence,
    U: AdjudicationUi,
{
    pub fn new(search: S, persistence: P, ui: U, config: PipelineConfig) -> Self {
        Self {
            search: Arc::new(search),
            persistence: Arc::new(persistence),
            ui: Arc::new(ui),
            config,
        }
    }

    /// Runs the pipeline over `items` against `sheets` to completion.
    ///
    /// Every work item reaches exactly one terminal outcome in the returned
    /// report, whatever order adjudication actually happened in.
    pub async fn run(
        self,
        items: Vec<WorkItem>,
        sheets: Vec<SheetRef>,
    ) -> Result<RunReport, PipelineError> {
        if sheets.is_empty() {
            return Err(PipelineError::NoSheets);
        }

        let total = items.len();
        info!(identifiers = total, sheets = sheets.len(), "pipeline starting");

        let limiter = Arc::new(RateLimiter::new(
            self.config.rate_limit,
            self.config.rate_window,
        ));
        let relay = Arc::new(ResultRelay::new(
            self.config.channel_capacity,
            self.config.deliver_timeout,
        ));
        let counters = Arc::new(UpdateCounters::new());
        let (queue, write_rx) = PlacementQueue::new(Arc::clone(&counters));
        let searches_completed = Arc::new(AtomicU64::new(0));
        let cancel = CancellationToken::new();

        let producer_handle = tokio::spawn(
            SearchProducer::new(
                Arc::clone(&self.search),
                Arc::clone(&limiter),
                Arc::clone(&relay),
                Arc::clone(&searches_completed),
            )
            .run(items.clone(), Arc::new(sheets), cancel.clone()),
        );

        let worker_handle = tokio::spawn(
            UpdateWorker::new(
                write_rx,
                queue.requeue_sender(),
                Arc::clone(&self.persistence),
                Arc::clone(&limiter),
                Arc::clone(&counters),
                self.config.max_write_retries,
                self.config.write_retry_delay,
            )
            .run(cancel.clone()),
        );

        let monitor_handle = tokio::spawn(
            PipelineMonitor::new(
                Arc::clone(&searches_completed),
                Arc::clone(&counters),
                Arc::clone(&relay),
                total as u64,
                &self.config,
            )
            .run(cancel.clone()),
        );

        let spacing = Arc::new(SpacingContext::new(
            self.config.default_spacing,
            self.config.spacing_step,
            self.config.max_spacing,
        ));
        let adjudicator = Adjudicator::new(
            Arc::clone(&self.ui),
            Arc::clone(&spacing),
            self.config.nudge_step,
        );

        let resolved = self
            .adjudication_loop(&items, &relay, &adjudicator, &queue)
            .await;

        self.drain_writes(&counters).await;
        cancel.cancel();
        self.join_background(producer_handle, worker_handle, monitor_handle)
            .await;

        let outcomes = items
            .into_iter()
            .zip(resolved)
            .map(|(item, outcome)| {
                let outcome = match outcome {
                    Some(IdentifierOutcome::Placed { .. }) => IdentifierOutcome::Placed {
                        retries: counters.retries_for(&item.identifier),
                    },
                    Some(other) => other,
                    // Unreachable: the loop resolves every index. Recorded
                    // as a timeout rather than panicking mid-report.
                    None => IdentifierOutcome::SkippedTimeout,
                };
                (item.identifier, outcome)
            })
            .collect();

        let report = RunReport {
            outcomes,
            writes_succeeded: counters.succeeded(),
            write_retries: counters.retries(),
            writes_failed: counters.failed(),
            failed_writes: counters.failed_writes(),
        };
        info!(
            placed = report.placed_count(),
            abandoned = report.abandoned_count(),
            unresolved = report.unresolved_count(),
            writes_succeeded = report.writes_succeeded,
            writes_failed = report.writes_failed,
            "pipeline finished"
        );

        Ok(report)
    }

    /// Walks the work items in input order, resolving each to a terminal
    /// outcome. Skip-ahead may resolve later indices early; they are skipped
    /// over when the walk reaches them.
    async fn adjudication_loop(
        &self,
        items: &[WorkItem],
        relay: &ResultRelay,
        adjudicator: &Adjudicator<U>,
        queue: &PlacementQueue,
    ) -> Vec<Option<IdentifierOutcome>> {
        let mut resolved: Vec<Option<IdentifierOutcome>> = vec![None; items.len()];
        let mut out_of_order: u32 = 0;
        let mut idx = 0;

        'items: while idx < items.len() {
            if resolved[idx].is_some() {
                idx += 1;
                continue;
            }
            let item = &items[idx];

            if let Some(result) = relay.take_cached(&item.identifier) {
                resolved[idx] = Some(self.resolve(item, result, adjudicator, queue).await);
                out_of_order = 0;
                idx += 1;
                continue;
            }

            let deadline = tokio::time::Instant::now() + self.config.result_wait;
            loop {
                if out_of_order >= self.config.skip_ahead_threshold && relay.cached_count() > 0 {
                    if let Some(ahead) = nearest_cached_index(items, &resolved, idx, relay) {
                        if let Some(result) = relay.take_cached(&items[ahead].identifier) {
                            info!(
                                waiting_on = %item.identifier,
                                skipping_to = %items[ahead].identifier,
                                out_of_order,
                                "results arriving out of order, adjudicating a cached identifier"
                            );
                            resolved[ahead] =
                                Some(self.resolve(&items[ahead], result, adjudicator, queue).await);
                        }
                    }
                    out_of_order = 0;
                    // Back to the top without advancing; the current
                    // identifier gets a fresh wait after the detour.
                    continue 'items;
                }

                // The current identifier's result may have fallen back to
                // the cache after the entry check, while we were waiting.
                if let Some(result) = relay.take_cached(&item.identifier) {
                    resolved[idx] = Some(self.resolve(item, result, adjudicator, queue).await);
                    out_of_order = 0;
                    idx += 1;
                    continue 'items;
                }

                match relay.take(self.config.poll_interval).await {
                    Some(result) if result.identifier == item.identifier => {
                        resolved[idx] = Some(self.resolve(item, result, adjudicator, queue).await);
                        out_of_order = 0;
                        idx += 1;
                        continue 'items;
                    }
                    Some(result) => {
                        debug!(
                            waiting_on = %item.identifier,
                            received = %result.identifier,
                            "out-of-order result, parking in cache"
                        );
                        relay.cache_result(result);
                        out_of_order += 1;
                    }
                    None => {}
                }

                if tokio::time::Instant::now() >= deadline {
                    warn!(
                        identifier = %item.identifier,
                        waited = ?self.config.result_wait,
                        "no search result in time, skipping identifier"
                    );
                    resolved[idx] = Some(IdentifierOutcome::SkippedTimeout);
                    idx += 1;
                    continue 'items;
                }
            }
        }

        resolved
    }

    /// Resolves one identifier from its search result to a terminal outcome,
    /// queueing the placement writes on accept.
    async fn resolve(
        &self,
        item: &WorkItem,
        result: SearchResult,
        adjudicator: &Adjudicator<U>,
        queue: &PlacementQueue,
    ) -> IdentifierOutcome {
        if result.all_sheets_failed() {
            warn!(
                identifier = %item.identifier,
                sheets = result.searched_sheets,
                "every sheet search failed, absence not verified"
            );
            return IdentifierOutcome::SearchFailed;
        }

        match adjudicator.adjudicate(item, result.candidates).await {
            AdjudicationOutcome::Placed(placement) => {
                queue.enqueue(placement);
                IdentifierOutcome::Placed { retries: 0 }
            }
            // Zero presentations means zero candidates existed; the reviewer
            // was never consulted, so this is not a rejection.
            AdjudicationOutcome::Abandoned { candidates_seen: 0 } => {
                debug!(identifier = %item.identifier, "no candidate on any sheet");
                IdentifierOutcome::NothingFound
            }
            AdjudicationOutcome::Abandoned { candidates_seen } => {
                debug!(
                    identifier = %item.identifier,
                    candidates_seen,
                    "identifier abandoned by reviewer"
                );
                IdentifierOutcome::Abandoned { candidates_seen }
            }
        }
    }

    /// Waits for the write queue to empty. The deadline resets whenever the
    /// queue makes progress, so a slow-but-moving backlog is not cut off.
    async fn drain_writes(&self, counters: &UpdateCounters) {
        let mut last_pending = counters.pending();
        if last_pending == 0 {
            return;
        }
        info!(pending = last_pending, "waiting for queued writes to drain");

        let mut deadline = tokio::time::Instant::now() + self.config.drain_timeout;
        loop {
            let pending = counters.pending();
            if pending == 0 {
                info!("write queue drained");
                return;
            }
            if pending < last_pending {
                deadline = tokio::time::Instant::now() + self.config.drain_timeout;
                last_pending = pending;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    pending,
                    timeout = ?self.config.drain_timeout,
                    "write queue did not drain in time, shutting down anyway"
                );
                return;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Joins the background tasks, bounded by the configured join timeout.
    async fn join_background(
        &self,
        producer: JoinHandle<()>,
        worker: JoinHandle<()>,
        monitor: JoinHandle<()>,
    ) {
        for (name, handle) in [
            ("search producer", producer),
            ("update worker", worker),
            ("monitor", monitor),
        ] {
            match tokio::time::timeout(self.config.join_timeout, handle).await {
                Ok(Ok(())) => debug!(task = name, "background task joined"),
                Ok(Err(e)) => warn!(task = name, error = %e, "background task panicked"),
                Err(_) => warn!(task = name, "background task did not stop in time"),
            }
        }
    }
}

/// Finds the nearest unresolved index after `current` that has a cached
/// result waiting.
fn nearest_cached_index(
    items: &[WorkItem],
    resolved: &[Option<IdentifierOutcome>],
    current: usize,
    relay: &ResultRelay,
) -> Option<usize> {
    (current + 1..items.len())
        .filter(|&i| resolved[i].is_none())
        .find(|&i| relay.has_cached(&items[i].identifier))
}
