//! Pipeline configuration.
//!
//! Every threshold that was a tuned constant in earlier incarnations of this
//! tool is a field here. The defaults reproduce the values that worked in
//! production: 10 remote calls per second, a 100-slot result channel, and a
//! skip-ahead after 5 consecutive out-of-order results.

use std::time::Duration;

/// Configuration for the placement pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum remote calls started within `rate_window`.
    pub rate_limit: usize,

    /// Trailing window the rate limit applies to.
    pub rate_window: Duration,

    /// Capacity of the bounded search-result channel.
    pub channel_capacity: usize,

    /// How long the producer waits for channel space before caching a result.
    pub deliver_timeout: Duration,

    /// Total time the main loop waits for one identifier's results before
    /// skipping it.
    pub result_wait: Duration,

    /// Poll granularity while waiting on the result channel.
    pub poll_interval: Duration,

    /// Consecutive out-of-order results tolerated before skipping ahead to a
    /// cached identifier.
    pub skip_ahead_threshold: u32,

    /// Re-attempts after a write's first failure before it is reported as a
    /// permanent failure. A write is invoked at most `1 + max_write_retries`
    /// times.
    pub max_write_retries: u32,

    /// Delay between a failed write and its re-queue.
    pub write_retry_delay: Duration,

    /// Step applied to the working coordinate per directional nudge, in
    /// sheet pixels.
    pub nudge_step: f64,

    /// Initial spacing between a primary placement and its derived
    /// placements, in sheet pixels.
    pub default_spacing: f64,

    /// Increment applied per spacing adjustment.
    pub spacing_step: f64,

    /// Ceiling on the derived-placement spacing; increases clamp here.
    pub max_spacing: f64,

    /// Sampling interval of the throughput monitor.
    pub monitor_interval: Duration,

    /// Maximum time to wait for queued writes to drain at shutdown. The
    /// deadline resets whenever the queue makes progress.
    pub drain_timeout: Duration,

    /// Per-task join timeout during shutdown; joins that exceed it are
    /// abandoned best-effort.
    pub join_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rate_limit: 10,
            rate_window: Duration::from_secs(1),
            channel_capacity: 100,
            deliver_timeout: Duration::from_secs(1),
            result_wait: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
            skip_ahead_threshold: 5,
            max_write_retries: 3,
            write_retry_delay: Duration::from_secs(1),
            nudge_step: 10.0,
            default_spacing: 30.0,
            spacing_step: 10.0,
            max_spacing: 300.0,
            monitor_interval: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(30),
            join_timeout: Duration::from_secs(5),
        }
    }
}

impl PipelineConfig {
    /// Sets the result channel capacity.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Sets the rate limit (calls per `rate_window`).
    pub fn with_rate_limit(mut self, limit: usize) -> Self {
        self.rate_limit = limit;
        self
    }

    /// Sets the skip-ahead threshold.
    pub fn with_skip_ahead_threshold(mut self, threshold: u32) -> Self {
        self.skip_ahead_threshold = threshold;
        self
    }

    /// Sets the per-identifier result wait.
    pub fn with_result_wait(mut self, wait: Duration) -> Self {
        self.result_wait = wait;
        self
    }
}
