//! Sliding-window rate limiter for remote store calls.
//!
//! Bounds the number of operations *started* within a trailing time window.
//! Both the search producer and the update worker draw from the same limiter
//! since both talk to the same remote store.
//!
//! Unlike a plain semaphore, the window is measured from operation start
//! times, so a burst of N calls is followed by a full window of quiet before
//! the next N may begin. `acquire()` never errors; it only delays.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Rate limiter allowing at most `max_calls` starts per trailing `window`.
///
/// Waiters queue on the internal mutex, which hands out slots in FIFO order.
#[derive(Debug)]
pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    starts: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Creates a limiter for `max_calls` operations per `window`.
    ///
    /// # Panics
    ///
    /// Panics if `max_calls` is 0.
    pub fn new(max_calls: usize, window: Duration) -> Self {
        assert!(max_calls > 0, "max_calls must be > 0");

        Self {
            max_calls,
            window,
            starts: Mutex::new(VecDeque::with_capacity(max_calls)),
        }
    }

    /// Waits until an operation may start, then records its start time.
    ///
    /// Returns once fewer than `max_calls` operations have started within the
    /// trailing window. The sleep happens while holding the internal lock so
    /// that waiters are released in arrival order.
    pub async fn acquire(&self) {
        let mut starts = self.starts.lock().await;
        let mut now = Instant::now();

        Self::trim(&mut starts, now, self.window);

        if starts.len() >= self.max_calls {
            // Oldest start must age out of the window before we may proceed.
            let wake_at = starts[0] + self.window;
            tokio::time::sleep_until(wake_at).await;
            now = Instant::now();
            Self::trim(&mut starts, now, self.window);
        }

        starts.push_back(now);
    }

    /// Returns the number of starts currently inside the window.
    pub async fn in_window(&self) -> usize {
        let mut starts = self.starts.lock().await;
        let now = Instant::now();
        Self::trim(&mut starts, now, self.window);
        starts.len()
    }

    /// Returns the configured calls-per-window limit.
    pub fn max_calls(&self) -> usize {
        self.max_calls
    }

    /// Returns the configured window.
    pub fn window(&self) -> Duration {
        self.window
    }

    fn trim(starts: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(oldest) = starts.front() {
            if now.duration_since(*oldest) >= window {
                starts.pop_front();
            } else {
                break;
            }
        }
    }
}
