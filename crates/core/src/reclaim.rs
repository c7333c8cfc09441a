//! Reclaim loop for stuck campaigns.
//!
//! A worker that crashes mid-run leaves its job locked in `processing`.
//! This loop periodically flips every job whose run started more than the
//! lock timeout ago back to `pending` with progress intact, so another
//! worker can resume it. Stuck jobs are not an error signaled to anyone;
//! recovery is silent and periodic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::error::Result;
use crate::lock::LockManager;

/// Periodically recovers jobs abandoned by crashed workers.
pub(crate) struct Reclaimer {
    lock: LockManager,
    interval: Duration,
    running: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl Reclaimer {
    pub fn new(
        lock: LockManager,
        interval: Duration,
        running: Arc<AtomicBool>,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            lock,
            interval,
            running,
            wake,
        }
    }

    /// Run the reclaim loop.
    pub async fn run(&self) -> Result<()> {
        tracing::debug!("Reclaimer started");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.wake.notified() => {}
            }

            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            match self.lock.reclaim_stuck().await {
                Ok(0) => {}
                Ok(count) => {
                    tracing::info!(count, "Reclaimed stuck campaigns");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to reclaim stuck campaigns");
                }
            }
        }

        tracing::debug!("Reclaimer stopped");
        Ok(())
    }
}
