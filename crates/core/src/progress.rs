//! Batched persistence of per-recipient progress.
//!
//! Outcomes are buffered and written every N recipients (and always at
//! loop exit) so a thousand-recipient campaign does not issue a thousand
//! record updates. After any flush, `current` on the record is the first
//! unprocessed index — the resumability contract.

use crate::error::Result;
use crate::job::{DelayMetric, DeliveryOutcome, DeliveryStats, JobId};
use crate::store::{JobStore, ProgressBatch, SharedStore};

/// Accumulates outcomes for one campaign run and flushes them in batches.
pub struct ProgressTracker {
    store: SharedStore,
    job_id: JobId,
    flush_every: usize,
    results_cap: usize,
    batch: ProgressBatch,
    /// Last index known to be persisted.
    flushed_index: usize,

    // Running totals for this run, kept for the final statistics.
    sent: u64,
    failed: u64,
    response_time_sum: u64,
    delay_sum: u64,
    delay_count: u64,
}

impl ProgressTracker {
    pub fn new(
        store: SharedStore,
        job_id: JobId,
        start_index: usize,
        flush_every: usize,
        results_cap: usize,
    ) -> Self {
        Self {
            store,
            job_id,
            flush_every: flush_every.max(1),
            results_cap,
            batch: ProgressBatch {
                next_index: start_index,
                ..Default::default()
            },
            flushed_index: start_index,
            sent: 0,
            failed: 0,
            response_time_sum: 0,
            delay_sum: 0,
            delay_count: 0,
        }
    }

    /// Record the outcome for the recipient at `index`.
    pub fn record_outcome(&mut self, outcome: DeliveryOutcome, index: usize) {
        if outcome.success {
            self.sent += 1;
        } else {
            self.failed += 1;
        }
        self.response_time_sum += outcome.response_time_ms;
        self.batch.outcomes.push(outcome);
        self.batch.next_index = index + 1;
    }

    /// Record one pacing observation.
    pub fn record_delay(&mut self, metric: DelayMetric) {
        self.delay_sum += metric.actual_ms;
        self.delay_count += 1;
        self.batch.metrics.push(metric);
    }

    /// Flush if the batch has reached the configured size.
    pub async fn maybe_flush(&mut self) -> Result<()> {
        if self.batch.outcomes.len() >= self.flush_every {
            self.flush().await?;
        }
        Ok(())
    }

    /// Unconditionally persist whatever is buffered.
    pub async fn flush(&mut self) -> Result<()> {
        if self.batch.is_empty() && self.batch.next_index == self.flushed_index {
            return Ok(());
        }

        self.store
            .flush_progress(&self.job_id, &self.batch, self.results_cap)
            .await?;

        tracing::trace!(
            job_id = %self.job_id,
            outcomes = self.batch.outcomes.len(),
            next_index = self.batch.next_index,
            "Progress flushed"
        );

        self.flushed_index = self.batch.next_index;
        let next_index = self.batch.next_index;
        self.batch = ProgressBatch {
            next_index,
            ..Default::default()
        };
        Ok(())
    }

    /// Successful sends recorded this run.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Failures recorded this run.
    pub fn failed(&self) -> u64 {
        self.failed
    }

    /// First unprocessed index as of the last record.
    pub fn next_index(&self) -> usize {
        self.batch.next_index
    }

    /// Aggregate statistics for this run.
    pub fn stats(&self, duration_ms: u64) -> DeliveryStats {
        let processed = self.sent + self.failed;
        DeliveryStats {
            avg_response_ms: if processed > 0 {
                self.response_time_sum / processed
            } else {
                0
            },
            avg_delay_ms: if self.delay_count > 0 {
                self.delay_sum / self.delay_count
            } else {
                0
            },
            success_rate: if processed > 0 {
                self.sent as f64 / processed as f64
            } else {
                0.0
            },
            duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::job::{DelayMode, DeliveryStats, Job, JobStatus};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Store stub that records flushed batches into a shared log; every
    /// other operation is out of scope for these tests.
    struct FlushRecorder {
        flushes: Arc<Mutex<Vec<ProgressBatch>>>,
    }

    #[async_trait]
    impl JobStore for FlushRecorder {
        async fn insert(&self, _job: &Job) -> Result<()> {
            unimplemented!()
        }
        async fn get(&self, _id: &JobId) -> Result<Option<Job>> {
            unimplemented!()
        }
        async fn status(&self, _id: &JobId) -> Result<Option<JobStatus>> {
            unimplemented!()
        }
        async fn try_claim(
            &self,
            _id: &JobId,
            _lock_timeout: Duration,
            _worker_id: &str,
            _now_ms: i64,
        ) -> Result<Option<Job>> {
            unimplemented!()
        }
        async fn release_lock(&self, _id: &JobId) -> Result<()> {
            unimplemented!()
        }
        async fn mark_processing(&self, _id: &JobId, _now_ms: i64) -> Result<()> {
            unimplemented!()
        }
        async fn flush_progress(
            &self,
            _id: &JobId,
            batch: &ProgressBatch,
            _results_cap: usize,
        ) -> Result<()> {
            self.flushes.lock().unwrap().push(batch.clone());
            Ok(())
        }
        async fn finalize(
            &self,
            _id: &JobId,
            _status: JobStatus,
            _stats: Option<DeliveryStats>,
            _error: Option<String>,
            _now_ms: i64,
        ) -> Result<()> {
            unimplemented!()
        }
        async fn requeue(&self, _id: &JobId, _reason: &str) -> Result<()> {
            unimplemented!()
        }
        async fn apply_refund(&self, _id: &JobId, _amount: u64) -> Result<u64> {
            unimplemented!()
        }
        async fn due_jobs(&self, _now_ms: i64, _limit: usize) -> Result<Vec<JobId>> {
            unimplemented!()
        }
        async fn reclaim_stuck(
            &self,
            _lock_timeout: Duration,
            _now_ms: i64,
            _reason: &str,
        ) -> Result<u64> {
            unimplemented!()
        }
    }

    fn recording_tracker(flush_every: usize) -> (ProgressTracker, Arc<Mutex<Vec<ProgressBatch>>>) {
        let flushes = Arc::new(Mutex::new(Vec::new()));
        let store = SharedStore::new(FlushRecorder {
            flushes: flushes.clone(),
        });
        let tracker = ProgressTracker::new(store, JobId::new(), 0, flush_every, 50);
        (tracker, flushes)
    }

    #[tokio::test]
    async fn test_flushes_every_n_outcomes() {
        let (mut tracker, flushes) = recording_tracker(2);

        for i in 0..5 {
            tracker.record_outcome(DeliveryOutcome::success(format!("r{}", i), "m", 0, 10), i);
            tracker.maybe_flush().await.unwrap();
        }
        tracker.flush().await.unwrap();

        let flushes = flushes.lock().unwrap();
        // Two full batches of 2, one final batch of 1.
        assert_eq!(flushes.len(), 3);
        assert_eq!(flushes[0].outcomes.len(), 2);
        assert_eq!(flushes[0].next_index, 2);
        assert_eq!(flushes[2].outcomes.len(), 1);
        assert_eq!(flushes[2].next_index, 5);
    }

    #[tokio::test]
    async fn test_final_flush_skipped_when_nothing_new() {
        let (mut tracker, flushes) = recording_tracker(1);

        tracker.record_outcome(DeliveryOutcome::success("r0", "m", 0, 10), 0);
        tracker.maybe_flush().await.unwrap();
        tracker.flush().await.unwrap();

        assert_eq!(flushes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_counters_and_next_index() {
        let (mut tracker, _flushes) = recording_tracker(10);

        tracker.record_outcome(DeliveryOutcome::success("r0", "m", 0, 10), 0);
        tracker.record_outcome(DeliveryOutcome::failure("r1", "x", None, 0, 10), 1);
        tracker.record_outcome(DeliveryOutcome::success("r2", "m", 0, 10), 2);

        assert_eq!(tracker.sent(), 2);
        assert_eq!(tracker.failed(), 1);
        assert_eq!(tracker.next_index(), 3);
    }

    #[tokio::test]
    async fn test_stats() {
        let (mut tracker, _flushes) = recording_tracker(10);

        tracker.record_outcome(DeliveryOutcome::success("r0", "m", 0, 100), 0);
        tracker.record_outcome(DeliveryOutcome::failure("r1", "x", None, 0, 300), 1);
        tracker.record_delay(DelayMetric {
            message_index: 0,
            recipient_id: "r0".to_string(),
            target_ms: 2000,
            actual_ms: 2010,
            mode: DelayMode::Fixed,
            timestamp: 0,
        });

        let stats = tracker.stats(5000);
        assert_eq!(stats.avg_response_ms, 200);
        assert_eq!(stats.avg_delay_ms, 2010);
        assert!((stats.success_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.duration_ms, 5000);
    }

    #[tokio::test]
    async fn test_stats_with_no_outcomes() {
        let (tracker, _flushes) = recording_tracker(10);
        let stats = tracker.stats(0);
        assert_eq!(stats.avg_response_ms, 0);
        assert_eq!(stats.avg_delay_ms, 0);
        assert_eq!(stats.success_rate, 0.0);
    }
}
