//! Scheduler loop: periodically scans for due campaigns and hands them to
//! the orchestrator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio::time;

use crate::error::Result;
use crate::job::now_ms;
use crate::orchestrator::Orchestrator;
use crate::store::{JobStore, SharedStore};

/// Scans the store for due jobs and runs each on its own task, bounded by
/// the configured campaign concurrency.
pub(crate) struct Scheduler {
    store: SharedStore,
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
    batch_size: usize,
    max_concurrent: usize,
    running: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: SharedStore,
        orchestrator: Arc<Orchestrator>,
        interval: Duration,
        batch_size: usize,
        max_concurrent: usize,
        running: Arc<AtomicBool>,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            store,
            orchestrator,
            interval,
            batch_size,
            max_concurrent,
            running,
            wake,
        }
    }

    /// Run the scheduler loop.
    ///
    /// Losing a claim race inside a spawned run is silent; the job simply
    /// belongs to another worker this cycle.
    pub async fn run(&self) -> Result<()> {
        tracing::info!("Campaign scheduler started");

        let mut tasks: JoinSet<()> = JoinSet::new();

        while self.running.load(Ordering::SeqCst) {
            // Reap finished campaign tasks before admitting new ones.
            while let Some(result) = tasks.try_join_next() {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Campaign task panicked");
                }
            }

            if let Err(e) = self.tick(&mut tasks).await {
                tracing::error!(error = %e, "Scheduler tick failed");
            }

            tokio::select! {
                _ = time::sleep(self.interval) => {}
                _ = self.wake.notified() => {}
            }
        }

        // Drain: campaigns observe the shutdown flag between recipients
        // and requeue themselves.
        while tasks.join_next().await.is_some() {}

        tracing::info!("Campaign scheduler stopped");
        Ok(())
    }

    /// Process one tick: fetch due jobs and spawn a run per job up to the
    /// concurrency bound.
    async fn tick(&self, tasks: &mut JoinSet<()>) -> Result<()> {
        let due = self.store.due_jobs(now_ms(), self.batch_size).await?;
        if due.is_empty() {
            return Ok(());
        }

        tracing::debug!(count = due.len(), "Due campaigns found");

        for job_id in due {
            if tasks.len() >= self.max_concurrent {
                tracing::debug!("At campaign capacity, deferring remainder to next tick");
                break;
            }

            let orchestrator = self.orchestrator.clone();
            tasks.spawn(async move {
                if let Err(e) = orchestrator.run(&job_id).await {
                    tracing::error!(job_id = %job_id, error = %e, "Campaign run failed");
                }
            });
        }

        Ok(())
    }
}
