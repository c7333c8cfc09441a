//! Exclusive processing locks on job records.
//!
//! The persisted `processing_lock` flag plus timestamp is the only mutual
//! exclusion across worker instances; there is no in-memory coordination.
//! The timeout-based reclaim is the deadlock-breaker when a holder crashes
//! without releasing.

use std::time::Duration;

use crate::error::Result;
use crate::job::{now_ms, Job, JobId};
use crate::store::{JobStore, SharedStore};

/// Acquires, releases, and reclaims job processing locks.
#[derive(Clone)]
pub struct LockManager {
    store: SharedStore,
    timeout: Duration,
    worker_id: String,
}

impl LockManager {
    pub fn new(store: SharedStore, timeout: Duration, worker_id: impl Into<String>) -> Self {
        Self {
            store,
            timeout,
            worker_id: worker_id.into(),
        }
    }

    /// Try to acquire the lock on `id`.
    ///
    /// Losing the race is expected and silent: the loser skips the job this
    /// cycle and the next scan retries. Returns the claimed record on
    /// success.
    pub async fn try_acquire(&self, id: &JobId) -> Result<Option<Job>> {
        let claimed = self
            .store
            .try_claim(id, self.timeout, &self.worker_id, now_ms())
            .await?;

        match &claimed {
            Some(_) => {
                tracing::debug!(job_id = %id, worker_id = %self.worker_id, "Lock acquired");
            }
            None => {
                tracing::debug!(job_id = %id, "Lock not acquired, skipping this cycle");
            }
        }

        Ok(claimed)
    }

    /// Unconditionally release the lock on `id`.
    pub async fn release(&self, id: &JobId) -> Result<()> {
        self.store.release_lock(id).await
    }

    /// Recover every job whose run started more than the timeout window
    /// ago: back to pending, lock cleared, progress preserved.
    pub async fn reclaim_stuck(&self) -> Result<u64> {
        let reason = format!(
            "lock held past {}s, reclaimed by {}",
            self.timeout.as_secs(),
            self.worker_id
        );
        self.store
            .reclaim_stuck(self.timeout, now_ms(), &reason)
            .await
    }
}
