//! In-memory job store for the outreach engine.
//!
//! Backs development and integration testing. A process-wide mutex stands
//! in for the document store's conditional-update and atomic-increment
//! primitives: every trait method is one critical section, so the
//! engine-visible semantics match a real store's single-record atomic
//! operations.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use outreach_memory::InMemoryStore;
//! use outreach_core::Engine;
//!
//! # fn main() {
//! let store = InMemoryStore::new();
//! let builder = Engine::builder().store(store.clone());
//! # let _ = builder;
//! # }
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use outreach_core::{
    DeliveryStats, EngineError, Job, JobId, JobStatus, JobStore, ProgressBatch, Result,
};

/// In-memory implementation of `JobStore`.
///
/// Cloning is cheap and shares the underlying map, so a test can keep a
/// handle to the same records it hands the engine.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    jobs: Arc<Mutex<HashMap<JobId, Job>>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of job records held.
    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().unwrap().is_empty()
    }

    /// Direct record mutation, the way an external collaborator (the
    /// dashboard, a retention sweep) would touch a job outside the
    /// engine's primitives. Used by tests to cancel a running campaign.
    pub fn update<F>(&self, id: &JobId, f: F) -> Result<()>
    where
        F: FnOnce(&mut Job),
    {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| EngineError::JobNotFound(id.to_string()))?;
        f(job);
        Ok(())
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        self.jobs
            .lock()
            .unwrap()
            .insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get(&self, id: &JobId) -> Result<Option<Job>> {
        Ok(self.jobs.lock().unwrap().get(id).cloned())
    }

    async fn status(&self, id: &JobId) -> Result<Option<JobStatus>> {
        Ok(self.jobs.lock().unwrap().get(id).map(|j| j.status))
    }

    async fn try_claim(
        &self,
        id: &JobId,
        lock_timeout: Duration,
        _worker_id: &str,
        now_ms: i64,
    ) -> Result<Option<Job>> {
        let mut jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs.get_mut(id) else {
            return Ok(None);
        };

        if !job.status.is_claimable() {
            return Ok(None);
        }

        let stale = job
            .lock_acquired_at
            .map(|at| at < now_ms - lock_timeout.as_millis() as i64)
            .unwrap_or(true);
        if job.processing_lock && !stale {
            return Ok(None);
        }

        job.processing_lock = true;
        job.lock_acquired_at = Some(now_ms);
        Ok(Some(job.clone()))
    }

    async fn release_lock(&self, id: &JobId) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| EngineError::JobNotFound(id.to_string()))?;
        job.processing_lock = false;
        job.lock_acquired_at = None;
        Ok(())
    }

    async fn mark_processing(&self, id: &JobId, now_ms: i64) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| EngineError::JobNotFound(id.to_string()))?;
        job.status = JobStatus::Processing;
        job.processing_started_at = Some(now_ms);
        Ok(())
    }

    async fn flush_progress(
        &self,
        id: &JobId,
        batch: &ProgressBatch,
        results_cap: usize,
    ) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| EngineError::JobNotFound(id.to_string()))?;

        job.sent += batch.sent_delta();
        job.failed += batch.failed_delta();
        job.results.extend(batch.outcomes.iter().cloned());
        job.delay_metrics.extend(batch.metrics.iter().cloned());

        // Bounded windows: oldest entries evicted past the cap.
        let excess = job.results.len().saturating_sub(results_cap);
        job.results.drain(..excess);
        let excess = job.delay_metrics.len().saturating_sub(results_cap);
        job.delay_metrics.drain(..excess);

        job.current = batch.next_index;
        Ok(())
    }

    async fn finalize(
        &self,
        id: &JobId,
        status: JobStatus,
        stats: Option<DeliveryStats>,
        error: Option<String>,
        now_ms: i64,
    ) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| EngineError::JobNotFound(id.to_string()))?;
        job.status = status;
        job.processing_completed_at = Some(now_ms);
        if stats.is_some() {
            job.stats = stats;
        }
        if error.is_some() {
            job.last_error = error;
        }
        job.processing_lock = false;
        job.lock_acquired_at = None;
        Ok(())
    }

    async fn requeue(&self, id: &JobId, reason: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| EngineError::JobNotFound(id.to_string()))?;
        job.status = JobStatus::Pending;
        job.processing_lock = false;
        job.lock_acquired_at = None;
        job.last_error = Some(reason.to_string());
        Ok(())
    }

    async fn apply_refund(&self, id: &JobId, amount: u64) -> Result<u64> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| EngineError::JobNotFound(id.to_string()))?;
        let outstanding = job.deducted_points.saturating_sub(job.points_refunded);
        let applied = amount.min(outstanding);
        job.points_refunded += applied;
        Ok(applied)
    }

    async fn due_jobs(&self, now_ms: i64, limit: usize) -> Result<Vec<JobId>> {
        let jobs = self.jobs.lock().unwrap();
        let mut due: Vec<&Job> = jobs
            .values()
            .filter(|j| j.status.is_claimable() && !j.processing_lock && j.is_due(now_ms))
            .collect();
        due.sort_by_key(|j| j.created_at);
        Ok(due.into_iter().take(limit).map(|j| j.id.clone()).collect())
    }

    async fn reclaim_stuck(
        &self,
        lock_timeout: Duration,
        now_ms: i64,
        reason: &str,
    ) -> Result<u64> {
        let cutoff = now_ms - lock_timeout.as_millis() as i64;
        let mut count = 0;
        let mut jobs = self.jobs.lock().unwrap();
        for job in jobs.values_mut() {
            let stuck = job.status == JobStatus::Processing
                && job.processing_started_at.map(|at| at < cutoff).unwrap_or(false);
            if stuck {
                job.status = JobStatus::Pending;
                job.processing_lock = false;
                job.lock_acquired_at = None;
                job.last_error = Some(reason.to_string());
                count += 1;
            }
        }
        Ok(count)
    }
}
