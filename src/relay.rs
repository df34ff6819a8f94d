//! Hand-off channel between the search producer and the main loop.
//!
//! The [`ResultRelay`] pairs a bounded channel with an unbounded keyed side
//! cache. The producer attempts a short-timeout send; when the consumer has
//! fallen behind and the channel is full, the result is parked in the cache
//! instead, so the producer never stalls on a slow reviewer.
//!
//! The consumer pops the channel with [`ResultRelay::take`] and reads the
//! cache directly with [`ResultRelay::take_cached`]. Results taken from the
//! channel for an identifier other than the one currently being processed
//! are re-parked in the cache by the consumer via
//! [`ResultRelay::cache_result`].
//!
//! Invariant: every delivered result is retrievable exactly once, through the
//! channel or through the cache; nothing is dropped.

use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tracing::debug;

use crate::model::{Candidate, Identifier};

/// Merged search results for one identifier.
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// The identifier these candidates belong to.
    pub identifier: Identifier,

    /// All candidate locations found across all sheets.
    pub candidates: Vec<Candidate>,

    /// Number of sheets whose search call failed.
    pub failed_sheets: usize,

    /// Number of sheets searched.
    pub searched_sheets: usize,
}

impl SearchResult {
    /// Returns true when every sheet search failed, so an empty candidate
    /// list means "search broke", not "nothing found".
    pub fn all_sheets_failed(&self) -> bool {
        self.searched_sheets > 0 && self.failed_sheets == self.searched_sheets
    }
}

/// Bounded hand-off channel with an out-of-order side cache.
pub struct ResultRelay {
    tx: mpsc::Sender<SearchResult>,
    rx: tokio::sync::Mutex<mpsc::Receiver<SearchResult>>,
    cache: DashMap<Identifier, SearchResult>,
    deliver_timeout: Duration,
}

impl ResultRelay {
    /// Creates a relay with the given channel capacity and producer-side
    /// send timeout.
    pub fn new(capacity: usize, deliver_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel(capacity);

        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            cache: DashMap::new(),
            deliver_timeout,
        }
    }

    /// Hands a result to the consumer.
    ///
    /// Attempts a bounded-channel send for at most the deliver timeout; on a
    /// full channel the result is parked in the side cache instead. The
    /// producer is never blocked indefinitely.
    pub async fn deliver(&self, result: SearchResult) {
        match self.tx.send_timeout(result, self.deliver_timeout).await {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(result))
            | Err(SendTimeoutError::Closed(result)) => {
                debug!(
                    identifier = %result.identifier,
                    cached = self.cache.len() + 1,
                    "result channel full, parking result in cache"
                );
                self.cache.insert(result.identifier.clone(), result);
            }
        }
    }

    /// Pops the next result from the channel, waiting up to `timeout`.
    ///
    /// Returns `None` on timeout or when the producer side has closed with
    /// nothing buffered. The side cache is not consulted here; callers read
    /// it directly with [`take_cached`](Self::take_cached).
    pub async fn take(&self, timeout: Duration) -> Option<SearchResult> {
        let mut rx = self.rx.lock().await;
        tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
    }

    /// Removes and returns the cached result for `identifier`, if any.
    pub fn take_cached(&self, identifier: &Identifier) -> Option<SearchResult> {
        self.cache.remove(identifier).map(|(_, result)| result)
    }

    /// Parks a result in the cache (consumer side, for out-of-order takes).
    pub fn cache_result(&self, result: SearchResult) {
        self.cache.insert(result.identifier.clone(), result);
    }

    /// Returns true if `identifier` currently has a cached result.
    pub fn has_cached(&self, identifier: &Identifier) -> bool {
        self.cache.contains_key(identifier)
    }

    /// Number of results parked in the cache.
    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }

    /// Returns true if the channel has no free slots.
    pub fn channel_full(&self) -> bool {
        self.tx.capacity() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(key: &str) -> SearchResult {
        SearchResult {
            identifier: Identifier::new(key),
            candidates: Vec::new(),
            failed_sheets: 0,
            searched_sheets: 1,
        }
    }

    #[tokio::test]
    async fn test_deliver_then_take() {
        let relay = ResultRelay::new(4, Duration::from_millis(10));

        relay.deliver(result("A")).await;
        let taken = relay.take(Duration::from_millis(100)).await.unwrap();

        assert_eq!(taken.identifier.as_str(), "A");
        assert_eq!(relay.cached_count(), 0);
    }

    #[tokio::test]
    async fn test_full_channel_falls_back_to_cache() {
        let relay = ResultRelay::new(1, Duration::from_millis(10));

        relay.deliver(result("A")).await;
        relay.deliver(result("B")).await; // channel full, parked

        assert!(relay.channel_full());
        assert_eq!(relay.cached_count(), 1);
        assert!(relay.has_cached(&Identifier::new("B")));

        let from_channel = relay.take(Duration::from_millis(100)).await.unwrap();
        assert_eq!(from_channel.identifier.as_str(), "A");

        let from_cache = relay.take_cached(&Identifier::new("B")).unwrap();
        assert_eq!(from_cache.identifier.as_str(), "B");
    }

    #[tokio::test]
    async fn test_take_times_out_when_empty() {
        let relay = ResultRelay::new(1, Duration::from_millis(10));
        assert!(relay.take(Duration::from_millis(20)).await.is_none());
    }

    #[tokio::test]
    async fn test_no_result_is_ever_lost() {
        // Deliver more results than the channel holds; every one must be
        // retrievable exactly once via channel or cache.
        let relay = ResultRelay::new(2, Duration::from_millis(5));
        let keys: Vec<String> = (0..10).map(|i| format!("id-{i}")).collect();

        for key in &keys {
            relay.deliver(result(key)).await;
        }

        let mut seen = Vec::new();
        while let Some(r) = relay.take(Duration::from_millis(20)).await {
            seen.push(r.identifier.as_str().to_string());
        }
        for key in &keys {
            if let Some(r) = relay.take_cached(&Identifier::new(key.clone())) {
                seen.push(r.identifier.as_str().to_string());
            }
        }

        seen.sort();
        let mut expected = keys.clone();
        expected.sort();
        assert_eq!(seen, expected);
        assert_eq!(relay.cached_count(), 0);
    }

    #[tokio::test]
    async fn test_cache_result_reparks_out_of_order_take() {
        let relay = ResultRelay::new(4, Duration::from_millis(10));

        relay.deliver(result("B")).await;
        let taken = relay.take(Duration::from_millis(100)).await.unwrap();

        // Consumer wanted "A"; re-park "B".
        relay.cache_result(taken);
        assert!(relay.has_cached(&Identifier::new("B")));
    }

    #[test]
    fn test_all_sheets_failed_classification() {
        let mut r = result("A");
        assert!(!r.all_sheets_failed());

        r.failed_sheets = 1;
        assert!(r.all_sheets_failed());

        r.searched_sheets = 3;
        r.failed_sheets = 2;
        assert!(!r.all_sheets_failed());
    }
}
