//! Store abstraction for campaign job persistence.
//!
//! The engine depends on exactly two storage capabilities: atomic
//! conditional update (compare-and-swap on a field) and atomic
//! increment/bounded-append. Every method below is one such operation on a
//! single job record; implementations (in-memory, document store, SQL) live
//! in their own crates.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::job::{DelayMetric, DeliveryOutcome, DeliveryStats, Job, JobId, JobStatus};

/// A batch of per-recipient progress applied in one atomic update.
///
/// Flushed every N recipients and at loop exit, never per recipient, to
/// bound write amplification.
#[derive(Debug, Clone, Default)]
pub struct ProgressBatch {
    pub outcomes: Vec<DeliveryOutcome>,
    pub metrics: Vec<DelayMetric>,
    /// First unprocessed recipient index after this batch.
    pub next_index: usize,
}

impl ProgressBatch {
    /// Successful outcomes in this batch.
    pub fn sent_delta(&self) -> u64 {
        self.outcomes.iter().filter(|o| o.success).count() as u64
    }

    /// Failed outcomes in this batch.
    pub fn failed_delta(&self) -> u64 {
        self.outcomes.iter().filter(|o| !o.success).count() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty() && self.metrics.is_empty()
    }
}

/// Store trait for campaign job records.
///
/// Implementations must be thread-safe (Send + Sync) and must make each
/// method atomic with respect to concurrent callers; the engine performs
/// no read-modify-write of its own.
#[async_trait]
pub trait JobStore: Send + Sync {
    // ========== Record Access ==========

    /// Insert a new job record.
    async fn insert(&self, job: &Job) -> Result<()>;

    /// Fetch a job by id.
    async fn get(&self, id: &JobId) -> Result<Option<Job>>;

    /// Fetch just the status of a job (cooperative-cancellation probe).
    async fn status(&self, id: &JobId) -> Result<Option<JobStatus>>;

    // ========== Lock Operations ==========

    /// Try to acquire the exclusive processing lock on a job.
    ///
    /// A single conditional update: succeeds only if the job is in a
    /// claimable status AND the lock is free or held past `lock_timeout`.
    /// On success sets the lock plus its timestamp and returns the updated
    /// record; returns `None` when another holder won the race or the job
    /// is not claimable. Never retried inline — the next scan retries.
    async fn try_claim(
        &self,
        id: &JobId,
        lock_timeout: Duration,
        worker_id: &str,
        now_ms: i64,
    ) -> Result<Option<Job>>;

    /// Unconditionally clear the processing lock.
    async fn release_lock(&self, id: &JobId) -> Result<()>;

    // ========== Run-State Operations ==========

    /// Transition a claimed job to `processing` and stamp its start time.
    async fn mark_processing(&self, id: &JobId, now_ms: i64) -> Result<()>;

    /// Apply a progress batch: increment `sent`/`failed` by the batch
    /// tally, append outcomes and delay metrics to the bounded windows
    /// (oldest evicted past `results_cap`), and set `current` to
    /// `batch.next_index`.
    async fn flush_progress(
        &self,
        id: &JobId,
        batch: &ProgressBatch,
        results_cap: usize,
    ) -> Result<()>;

    /// Terminal transition: set status, completion timestamp, optional
    /// stats and error, and clear the lock, in one update.
    async fn finalize(
        &self,
        id: &JobId,
        status: JobStatus,
        stats: Option<DeliveryStats>,
        error: Option<String>,
        now_ms: i64,
    ) -> Result<()>;

    /// Put a processing job back to `pending` with its progress intact
    /// (graceful shutdown mid-run), recording a diagnostic reason.
    async fn requeue(&self, id: &JobId, reason: &str) -> Result<()>;

    // ========== Billing ==========

    /// Atomic clamped increment of `points_refunded`: applies
    /// `min(amount, deducted_points - points_refunded)` and returns the
    /// amount actually applied. The clamp is what keeps repeated
    /// reconciliation from over-refunding.
    async fn apply_refund(&self, id: &JobId, amount: u64) -> Result<u64>;

    // ========== Scans ==========

    /// Ids of unlocked jobs due to run at `now_ms`: pending jobs plus
    /// scheduled jobs whose time has come.
    async fn due_jobs(&self, now_ms: i64, limit: usize) -> Result<Vec<JobId>>;

    /// Bulk-recover stuck jobs: every `processing` job whose run started
    /// more than `lock_timeout` ago goes back to `pending` with the lock
    /// cleared, `current` preserved, and `reason` recorded. Returns the
    /// number of jobs reclaimed.
    async fn reclaim_stuck(
        &self,
        lock_timeout: Duration,
        now_ms: i64,
        reason: &str,
    ) -> Result<u64>;
}

/// A type-erased store that can be shared across tasks.
pub type DynStore = Arc<dyn JobStore>;

/// Wrapper around `Arc<dyn JobStore>` for convenience.
#[derive(Clone)]
pub struct SharedStore {
    inner: DynStore,
}

impl SharedStore {
    /// Create a new SharedStore from any JobStore implementation.
    pub fn new<S: JobStore + 'static>(store: S) -> Self {
        Self {
            inner: Arc::new(store),
        }
    }

    /// Get a reference to the inner store.
    pub fn inner(&self) -> &DynStore {
        &self.inner
    }
}

#[async_trait]
impl JobStore for SharedStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        self.inner.insert(job).await
    }

    async fn get(&self, id: &JobId) -> Result<Option<Job>> {
        self.inner.get(id).await
    }

    async fn status(&self, id: &JobId) -> Result<Option<JobStatus>> {
        self.inner.status(id).await
    }

    async fn try_claim(
        &self,
        id: &JobId,
        lock_timeout: Duration,
        worker_id: &str,
        now_ms: i64,
    ) -> Result<Option<Job>> {
        self.inner.try_claim(id, lock_timeout, worker_id, now_ms).await
    }

    async fn release_lock(&self, id: &JobId) -> Result<()> {
        self.inner.release_lock(id).await
    }

    async fn mark_processing(&self, id: &JobId, now_ms: i64) -> Result<()> {
        self.inner.mark_processing(id, now_ms).await
    }

    async fn flush_progress(
        &self,
        id: &JobId,
        batch: &ProgressBatch,
        results_cap: usize,
    ) -> Result<()> {
        self.inner.flush_progress(id, batch, results_cap).await
    }

    async fn finalize(
        &self,
        id: &JobId,
        status: JobStatus,
        stats: Option<DeliveryStats>,
        error: Option<String>,
        now_ms: i64,
    ) -> Result<()> {
        self.inner.finalize(id, status, stats, error, now_ms).await
    }

    async fn requeue(&self, id: &JobId, reason: &str) -> Result<()> {
        self.inner.requeue(id, reason).await
    }

    async fn apply_refund(&self, id: &JobId, amount: u64) -> Result<u64> {
        self.inner.apply_refund(id, amount).await
    }

    async fn due_jobs(&self, now_ms: i64, limit: usize) -> Result<Vec<JobId>> {
        self.inner.due_jobs(now_ms, limit).await
    }

    async fn reclaim_stuck(
        &self,
        lock_timeout: Duration,
        now_ms: i64,
        reason: &str,
    ) -> Result<u64> {
        self.inner.reclaim_stuck(lock_timeout, now_ms, reason).await
    }
}
