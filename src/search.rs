//! Background search producer.
//!
//! The [`SearchProducer`] walks the pending identifiers in list order. For
//! each one it fans out a rate-limited search call per sheet, merges the
//! candidates, and hands the result to the [`ResultRelay`]. A failing sheet
//! search is logged and contributes zero candidates; it never aborts the
//! identifier. The producer moves to the next identifier whether the delivery
//! went through the channel or fell back to the cache.
//!
//! Cancellation is cooperative and checked between identifiers only;
//! in-flight search calls are allowed to finish.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SearchError;
use crate::limiter::RateLimiter;
use crate::model::{Candidate, Identifier, SheetRef, WorkItem};
use crate::relay::{ResultRelay, SearchResult};

/// Remote text search over one sheet.
///
/// Supplied by the host application. May fail transiently; the producer
/// treats a failure as zero results for that sheet.
pub trait RemoteSearch: Send + Sync + 'static {
    /// Searches `identifier` on `sheet`, returning all candidate locations.
    fn search(
        &self,
        sheet: &SheetRef,
        identifier: &Identifier,
    ) -> impl Future<Output = Result<Vec<Candidate>, SearchError>> + Send;
}

impl<S: RemoteSearch> RemoteSearch for Arc<S> {
    fn search(
        &self,
        sheet: &SheetRef,
        identifier: &Identifier,
    ) -> impl Future<Output = Result<Vec<Candidate>, SearchError>> + Send {
        S::search(self, sheet, identifier)
    }
}

/// Background producer that searches every pending identifier on every sheet.
pub struct SearchProducer<S: RemoteSearch> {
    search: Arc<S>,
    limiter: Arc<RateLimiter>,
    relay: Arc<ResultRelay>,
    completed: Arc<AtomicU64>,
}

impl<S: RemoteSearch> SearchProducer<S> {
    /// Creates a producer.
    ///
    /// `completed` is incremented once per finished identifier and is read
    /// by the throughput monitor.
    pub fn new(
        search: Arc<S>,
        limiter: Arc<RateLimiter>,
        relay: Arc<ResultRelay>,
        completed: Arc<AtomicU64>,
    ) -> Self {
        Self {
            search,
            limiter,
            relay,
            completed,
        }
    }

    /// Runs the producer over `items` until done or cancelled.
    ///
    /// The cancellation token is checked between identifiers; it does not
    /// interrupt in-flight search calls.
    pub async fn run(
        self,
        items: Vec<WorkItem>,
        sheets: Arc<Vec<SheetRef>>,
        cancel: CancellationToken,
    ) {
        let total = items.len();
        info!(
            identifiers = total,
            sheets = sheets.len(),
            "search producer started"
        );

        for (index, item) in items.into_iter().enumerate() {
            if cancel.is_cancelled() {
                info!(
                    completed = index,
                    total, "search producer stopping on cancellation"
                );
                return;
            }

            let result = self.search_identifier(&item.identifier, &sheets).await;
            debug!(
                identifier = %item.identifier,
                candidates = result.candidates.len(),
                failed_sheets = result.failed_sheets,
                "search complete"
            );

            self.relay.deliver(result).await;
            self.completed.fetch_add(1, Ordering::Relaxed);
        }

        info!(total, "search producer finished all identifiers");
    }

    /// Searches one identifier across all sheets concurrently.
    async fn search_identifier(
        &self,
        identifier: &Identifier,
        sheets: &[SheetRef],
    ) -> SearchResult {
        let calls = sheets.iter().map(|sheet| {
            let search = Arc::clone(&self.search);
            let limiter = Arc::clone(&self.limiter);
            async move {
                limiter.acquire().await;
                (sheet, search.search(sheet, identifier).await)
            }
        });

        let mut candidates = Vec::new();
        let mut failed_sheets = 0;

        for (sheet, outcome) in join_all(calls).await {
            match outcome {
                Ok(found) => candidates.extend(found),
                Err(e) => {
                    warn!(
                        identifier = %identifier,
                        sheet = %sheet.name,
                        error = %e,
                        "sheet search failed, treating as zero candidates"
                    );
                    failed_sheets += 1;
                }
            }
        }

        SearchResult {
            identifier: identifier.clone(),
            candidates,
            failed_sheets,
            searched_sheets: sheets.len(),
        }
    }
}
