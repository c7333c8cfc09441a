//! Campaign orchestration: the per-job state machine.
//!
//! One orchestrator run owns one job record end to end: claim the lock,
//! iterate recipients from the last saved position, dispatch with pacing
//! between sends, flush progress in batches, reconcile billing, finalize,
//! release. Recipient-level errors are absorbed into counters and results;
//! only job-level configuration and infrastructure errors terminate the
//! loop abnormally.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::billing::{BillingReconciler, SharedLedger};
use crate::config::EngineConfig;
use crate::delay::target_delay;
use crate::dispatch::Dispatcher;
use crate::engine::ActiveJobs;
use crate::error::Result;
use crate::job::{now_ms, DelayMetric, DeliveryOutcome, Job, JobId, JobStatus};
use crate::lock::LockManager;
use crate::payload::validate_payload;
use crate::progress::ProgressTracker;
use crate::provider::SharedProvider;
use crate::store::{JobStore, SharedStore};

/// How the recipient loop ended.
enum LoopEnd {
    /// All recipients from the resume point were processed.
    Finished,
    /// Owner cancellation observed between recipients.
    Canceled,
    /// Worker shutdown observed between recipients.
    Interrupted,
}

/// Drives one campaign job at a time through its lifecycle.
pub struct Orchestrator {
    store: SharedStore,
    dispatcher: Dispatcher,
    reconciler: BillingReconciler,
    lock: LockManager,
    config: EngineConfig,
    running: Arc<AtomicBool>,
    wake: Arc<Notify>,
    active: ActiveJobs,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: SharedStore,
        provider: SharedProvider,
        ledger: SharedLedger,
        config: EngineConfig,
        worker_id: String,
        running: Arc<AtomicBool>,
        wake: Arc<Notify>,
        active: ActiveJobs,
    ) -> Self {
        Self {
            dispatcher: Dispatcher::new(provider, config.max_retries),
            reconciler: BillingReconciler::new(store.clone(), ledger, config.points_per_message),
            lock: LockManager::new(store.clone(), config.lock_timeout, worker_id),
            store,
            config,
            running,
            wake,
            active,
        }
    }

    /// Claim and process one job.
    ///
    /// Returns `Ok(())` when the job was skipped (lost claim race, not due
    /// yet) as well as when it ran; errors are infrastructure failures
    /// that could not be recorded on the job itself.
    pub async fn run(&self, job_id: &JobId) -> Result<()> {
        let Some(job) = self.lock.try_acquire(job_id).await? else {
            return Ok(());
        };

        let now = now_ms();
        if !job.is_due(now) {
            // Scheduled-but-not-due jobs must not flip to processing.
            tracing::debug!(job_id = %job.id, "Claimed job is not due yet, releasing");
            self.lock.release(job_id).await?;
            return Ok(());
        }

        if let Err(e) = validate_payload(&job.message) {
            tracing::warn!(job_id = %job.id, error = %e, "Campaign aborted by payload validation");
            self.fail_job(&job, &e.to_string()).await;
            return Ok(());
        }

        self.store.mark_processing(job_id, now).await?;
        self.active.insert(&job);

        tracing::info!(
            job_id = %job.id,
            owner = %job.owner,
            recipients = job.recipients.len(),
            resume_from = job.current,
            "Campaign processing started"
        );

        let started_at = now_ms();
        let mut tracker = ProgressTracker::new(
            self.store.clone(),
            job.id.clone(),
            job.current,
            self.config.flush_every,
            self.config.results_cap,
        );

        let end = self.process(&job, &mut tracker).await;
        self.active.remove(&job.id);

        match end {
            Ok(LoopEnd::Finished) => {
                let total_failed = job.failed + tracker.failed();
                if total_failed > 0 {
                    if let Err(e) = self.reconciler.reconcile(&job, total_failed).await {
                        tracing::error!(
                            job_id = %job.id,
                            error = %e,
                            "Reconciliation failed; needs manual follow-up"
                        );
                    }
                }
                let duration = now_ms().saturating_sub(started_at) as u64;
                let stats = tracker.stats(duration);
                self.store
                    .finalize(&job.id, JobStatus::Completed, Some(stats), None, now_ms())
                    .await?;
                tracing::info!(
                    job_id = %job.id,
                    sent = tracker.sent(),
                    failed = tracker.failed(),
                    "Campaign completed"
                );
            }
            Ok(LoopEnd::Canceled) => {
                // Unprocessed recipients are refunded as failures.
                let unprocessed =
                    job.recipients.len().saturating_sub(tracker.next_index()) as u64;
                let refundable = job.failed + tracker.failed() + unprocessed;
                if refundable > 0 {
                    if let Err(e) = self.reconciler.reconcile(&job, refundable).await {
                        tracing::error!(
                            job_id = %job.id,
                            error = %e,
                            "Reconciliation failed; needs manual follow-up"
                        );
                    }
                }
                self.store
                    .finalize(&job.id, JobStatus::Canceled, None, None, now_ms())
                    .await?;
                tracing::info!(job_id = %job.id, unprocessed, "Campaign canceled by owner");
            }
            Ok(LoopEnd::Interrupted) => {
                // Graceful shutdown: leave the job immediately claimable
                // with its progress intact.
                self.store
                    .requeue(&job.id, "worker shut down before completion")
                    .await?;
                tracing::info!(
                    job_id = %job.id,
                    next_index = tracker.next_index(),
                    "Campaign interrupted by shutdown, requeued"
                );
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Campaign aborted");
                self.fail_job(&job, &e.to_string()).await;
            }
        }

        Ok(())
    }

    /// The recipient loop. Infrastructure errors (store unavailable)
    /// propagate; everything recipient-level is folded into the tracker.
    async fn process(&self, job: &Job, tracker: &mut ProgressTracker) -> Result<LoopEnd> {
        let total = job.recipients.len();
        let mut end = LoopEnd::Finished;

        for index in job.current..total {
            if !self.running.load(Ordering::SeqCst) {
                end = LoopEnd::Interrupted;
                break;
            }
            // Cancellation is cooperative, observed between recipients;
            // in-flight provider calls are never aborted.
            if self.store.status(&job.id).await? == Some(JobStatus::Canceled) {
                end = LoopEnd::Canceled;
                break;
            }

            let recipient = &job.recipients[index];
            let outcome = if recipient.is_valid() {
                self.dispatcher.send(job, recipient).await
            } else {
                tracing::debug!(job_id = %job.id, index, "Counting malformed recipient as failure");
                DeliveryOutcome::failure(&recipient.id, "malformed recipient entry", None, 0, 0)
            };

            let delivered = outcome.success;
            tracker.record_outcome(outcome, index);
            tracker.maybe_flush().await?;
            self.active.update(&job.id, index + 1);

            // Pacing after a successful send, skipped after the final
            // recipient.
            if delivered && index + 1 < total && job.delay.enabled {
                let target = target_delay(&job.delay, index, job.message.has_media());
                if !target.is_zero() {
                    let actual = self.pace(target).await;
                    tracker.record_delay(DelayMetric {
                        message_index: index,
                        recipient_id: recipient.id.clone(),
                        target_ms: target.as_millis() as u64,
                        actual_ms: actual,
                        mode: job.delay.mode,
                        timestamp: now_ms(),
                    });
                }
            }
        }

        tracker.flush().await?;
        Ok(end)
    }

    /// Best-effort failure path: full-balance refund, then a terminal
    /// `failed` record with the error and the lock cleared.
    async fn fail_job(&self, job: &Job, error: &str) {
        if let Err(e) = self.reconciler.reconcile_remaining(job).await {
            tracing::error!(
                job_id = %job.id,
                error = %e,
                "Reconciliation failed; needs manual follow-up"
            );
        }
        if let Err(e) = self
            .store
            .finalize(
                &job.id,
                JobStatus::Failed,
                None,
                Some(error.to_string()),
                now_ms(),
            )
            .await
        {
            // Lock stays held; the reclaim scan will recover the job.
            tracing::error!(job_id = %job.id, error = %e, "Failed to finalize job");
        }
    }

    /// Cancellable pacing sleep: aborts early on shutdown so a pending
    /// delay never blocks process exit. Returns the actual pause in ms.
    async fn pace(&self, target: Duration) -> u64 {
        let start = tokio::time::Instant::now();
        if self.running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = tokio::time::sleep(target) => {}
                _ = self.wake.notified() => {}
            }
        }
        start.elapsed().as_millis() as u64
    }
}
