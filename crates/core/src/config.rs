//! Configuration types for the campaign delivery engine.

use std::time::Duration;

/// Configuration for the `Engine` and its loops.
///
/// Three independent timeout scales live here and must not be conflated:
/// the lock timeout (job presumed stuck, minutes), the provider call
/// timeout (per send, seconds, owned by the provider implementation), and
/// the retry backoff (per attempt, sub-10s, owned by the retry module).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How often the due-job scan runs.
    pub scan_interval: Duration,
    /// How often the stuck-job reclaim scan runs.
    pub reclaim_interval: Duration,
    /// Lock held past this window marks the job stuck.
    pub lock_timeout: Duration,
    /// Maximum campaigns processed concurrently by this instance.
    pub max_concurrent_jobs: usize,
    /// Due jobs picked up per scan tick.
    pub scan_batch_size: usize,
    /// Progress is flushed every N processed recipients.
    pub flush_every: usize,
    /// Bounded per-recipient results window kept on the job record.
    pub results_cap: usize,
    /// Points charged per message, the refund unit.
    pub points_per_message: u64,
    /// Retries per recipient beyond the first attempt.
    pub max_retries: u32,
    /// Graceful shutdown drain timeout.
    pub shutdown_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(60),
            reclaim_interval: Duration::from_secs(300),
            lock_timeout: Duration::from_secs(30 * 60),
            max_concurrent_jobs: 4,
            scan_batch_size: 20,
            flush_every: 5,
            results_cap: 50,
            points_per_message: 1,
            max_retries: 2,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Builder for EngineConfig.
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the due-job scan interval.
    pub fn scan_interval(mut self, interval: Duration) -> Self {
        self.config.scan_interval = interval;
        self
    }

    /// Set the stuck-job reclaim interval.
    pub fn reclaim_interval(mut self, interval: Duration) -> Self {
        self.config.reclaim_interval = interval;
        self
    }

    /// Set the lock timeout window.
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.config.lock_timeout = timeout;
        self
    }

    /// Set the maximum concurrently processed campaigns.
    pub fn max_concurrent_jobs(mut self, max: usize) -> Self {
        self.config.max_concurrent_jobs = max;
        self
    }

    /// Set the due jobs picked up per scan tick.
    pub fn scan_batch_size(mut self, size: usize) -> Self {
        self.config.scan_batch_size = size;
        self
    }

    /// Set the progress flush batch size.
    pub fn flush_every(mut self, n: usize) -> Self {
        self.config.flush_every = n.max(1);
        self
    }

    /// Set the bounded results window cap.
    pub fn results_cap(mut self, cap: usize) -> Self {
        self.config.results_cap = cap;
        self
    }

    /// Set the points charged per message.
    pub fn points_per_message(mut self, points: u64) -> Self {
        self.config.points_per_message = points;
        self
    }

    /// Set the per-recipient retry cap.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// Set the graceful shutdown timeout.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Build the EngineConfig.
    pub fn build(self) -> EngineConfig {
        self.config
    }
}

impl EngineConfig {
    /// Create a new builder.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }
}
