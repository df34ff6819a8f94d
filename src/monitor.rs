//! Pipeline throughput monitor.
//!
//! Periodically samples the producer and worker completion counters,
//! computes deltas since the previous sample, and warns when either side has
//! stalled while work remains outstanding. Read-only; it takes no corrective
//! action.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::relay::ResultRelay;
use crate::update::UpdateCounters;

/// Watchdog over the search producer and update worker.
pub struct PipelineMonitor {
    searches_completed: Arc<AtomicU64>,
    update_counters: Arc<UpdateCounters>,
    relay: Arc<ResultRelay>,
    total_identifiers: u64,
    interval: std::time::Duration,
}

impl PipelineMonitor {
    pub fn new(
        searches_completed: Arc<AtomicU64>,
        update_counters: Arc<UpdateCounters>,
        relay: Arc<ResultRelay>,
        total_identifiers: u64,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            searches_completed,
            update_counters,
            relay,
            total_identifiers,
            interval: config.monitor_interval,
        }
    }

    /// Samples until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // interval fires immediately on first tick; skip that sample.
        interval.tick().await;

        let mut last_searches = self.searches_completed.load(Ordering::Relaxed);
        let mut last_writes = self.update_counters.succeeded();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let searches = self.searches_completed.load(Ordering::Relaxed);
            let writes = self.update_counters.succeeded();
            let pending_writes = self.update_counters.pending();

            self.report_sample(
                searches,
                searches - last_searches,
                writes,
                writes - last_writes,
                pending_writes,
            );

            last_searches = searches;
            last_writes = writes;
        }

        debug!("pipeline monitor stopped");
    }

    fn report_sample(
        &self,
        searches: u64,
        search_delta: u64,
        writes: u64,
        write_delta: u64,
        pending_writes: u64,
    ) {
        info!(
            searches,
            total = self.total_identifiers,
            search_delta,
            writes,
            write_delta,
            pending_writes,
            cached_results = self.relay.cached_count(),
            "pipeline status"
        );

        if search_delta == 0 && searches < self.total_identifiers {
            warn!(
                completed = searches,
                total = self.total_identifiers,
                "search producer appears stalled, no progress since last sample"
            );
        }

        if write_delta == 0 && pending_writes > 0 {
            warn!(
                pending = pending_writes,
                "update worker appears stalled with pending writes"
            );
        }

        if self.relay.channel_full() {
            info!("result channel full, new results are being cached");
        }
    }
}
