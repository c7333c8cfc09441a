//! End-to-end engine tests against the in-memory store.
//!
//! These drive whole campaigns through `Engine::run_job` (and the
//! scheduler loop) with scripted providers, checking the delivery,
//! billing, and resumability contracts.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use outreach_core::{
    now_ms, DelayConfig, Engine, EngineConfig, Job, JobId, JobStatus, JobStore, Ledger,
    MessagePayload, MessagingProvider, OutboundMessage, ProviderError, Recipient, Result,
    SendReceipt,
};
use outreach_memory::InMemoryStore;

/// Provider that succeeds for everyone and records the call order.
#[derive(Clone, Default)]
struct RecordingProvider {
    calls: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl MessagingProvider for RecordingProvider {
    async fn send(
        &self,
        recipient_id: &str,
        _message: &OutboundMessage,
    ) -> std::result::Result<SendReceipt, ProviderError> {
        let mut calls = self.calls.lock().unwrap();
        calls.push(recipient_id.to_string());
        Ok(SendReceipt {
            message_id: format!("m-{}", calls.len()),
        })
    }
}

/// Provider that permanently rejects one recipient.
#[derive(Clone)]
struct RejectingProvider {
    inner: RecordingProvider,
    reject: String,
}

#[async_trait]
impl MessagingProvider for RejectingProvider {
    async fn send(
        &self,
        recipient_id: &str,
        message: &OutboundMessage,
    ) -> std::result::Result<SendReceipt, ProviderError> {
        if recipient_id == self.reject {
            self.inner
                .calls
                .lock()
                .unwrap()
                .push(recipient_id.to_string());
            return Err(ProviderError::api(
                Some("131026".to_string()),
                400,
                "invalid recipient",
            ));
        }
        self.inner.send(recipient_id, message).await
    }
}

/// Provider that throttles the first call to one recipient, then recovers.
#[derive(Clone)]
struct ThrottlingProvider {
    inner: RecordingProvider,
    throttle: String,
    throttled_once: Arc<Mutex<bool>>,
}

#[async_trait]
impl MessagingProvider for ThrottlingProvider {
    async fn send(
        &self,
        recipient_id: &str,
        message: &OutboundMessage,
    ) -> std::result::Result<SendReceipt, ProviderError> {
        if recipient_id == self.throttle {
            let mut done = self.throttled_once.lock().unwrap();
            if !*done {
                *done = true;
                return Err(ProviderError::api(None, 429, "too many requests"));
            }
        }
        self.inner.send(recipient_id, message).await
    }
}

/// Provider that cancels the job (the way the dashboard would) right
/// after its first successful send.
#[derive(Clone)]
struct CancelingProvider {
    inner: RecordingProvider,
    store: InMemoryStore,
    job_id: JobId,
}

#[async_trait]
impl MessagingProvider for CancelingProvider {
    async fn send(
        &self,
        recipient_id: &str,
        message: &OutboundMessage,
    ) -> std::result::Result<SendReceipt, ProviderError> {
        let receipt = self.inner.send(recipient_id, message).await?;
        self.store
            .update(&self.job_id, |job| job.status = JobStatus::Canceled)
            .unwrap();
        Ok(receipt)
    }
}

#[derive(Clone, Default)]
struct RecordingLedger {
    credits: Arc<Mutex<Vec<(String, u64, String)>>>,
}

#[async_trait]
impl Ledger for RecordingLedger {
    async fn credit(&self, owner: &str, amount: u64, reason: &str) -> Result<()> {
        self.credits
            .lock()
            .unwrap()
            .push((owner.to_string(), amount, reason.to_string()));
        Ok(())
    }
}

fn test_config() -> EngineConfig {
    EngineConfig::builder()
        .scan_interval(Duration::from_millis(100))
        .reclaim_interval(Duration::from_secs(60))
        .lock_timeout(Duration::from_secs(1800))
        .flush_every(2)
        .points_per_message(1)
        .build()
}

/// A pending text campaign with one point deducted per recipient.
fn make_job(recipients: usize) -> Job {
    let recipients: Vec<Recipient> = (0..recipients)
        .map(|i| Recipient::new(format!("r{}", i)).named(format!("Name{}", i)))
        .collect();
    let n = recipients.len() as u64;
    Job::new(
        "user-1",
        recipients,
        MessagePayload::Text {
            body: "hello {{name}}".to_string(),
        },
    )
    .with_deducted_points(n)
}

fn engine_with(
    store: &InMemoryStore,
    provider: impl MessagingProvider + 'static,
    ledger: &RecordingLedger,
) -> Engine {
    Engine::builder()
        .config(test_config())
        .store(store.clone())
        .provider(provider)
        .ledger(ledger.clone())
        .worker_id("test-worker")
        .build()
        .unwrap()
}

fn assert_counters_invariant(job: &Job) {
    assert!(
        job.sent + job.failed <= job.current as u64,
        "sent {} + failed {} > current {}",
        job.sent,
        job.failed,
        job.current
    );
    assert!(job.current <= job.recipients.len());
}

#[tokio::test(start_paused = true)]
async fn scenario_a_fixed_delay_all_succeed() {
    let store = InMemoryStore::new();
    let ledger = RecordingLedger::default();
    let provider = RecordingProvider::default();

    let job = make_job(3).with_delay(DelayConfig::fixed(2));
    store.insert(&job).await.unwrap();

    let engine = engine_with(&store, provider.clone(), &ledger);

    let started = tokio::time::Instant::now();
    engine.run_job(&job.id).await.unwrap();
    let elapsed = started.elapsed();

    let done = store.get(&job.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.sent, 3);
    assert_eq!(done.failed, 0);
    assert!(!done.processing_lock);
    assert_counters_invariant(&done);

    // Two pacing pauses of ~2000ms each (none after the final recipient).
    assert!(elapsed >= Duration::from_millis(4000), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(5000), "elapsed {:?}", elapsed);
    assert_eq!(done.delay_metrics.len(), 2);
    assert_eq!(done.delay_metrics[0].target_ms, 2000);

    // No failures, no refunds.
    assert!(ledger.credits.lock().unwrap().is_empty());
    assert_eq!(done.points_refunded, 0);

    let stats = done.stats.expect("completed jobs carry stats");
    assert!((stats.success_rate - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn scenario_b_permanent_failure_refunds_one() {
    let store = InMemoryStore::new();
    let ledger = RecordingLedger::default();
    let provider = RejectingProvider {
        inner: RecordingProvider::default(),
        reject: "r2".to_string(),
    };

    let job = make_job(5);
    store.insert(&job).await.unwrap();
    let engine = engine_with(&store, provider.clone(), &ledger);

    engine.run_job(&job.id).await.unwrap();

    let done = store.get(&job.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.sent, 4);
    assert_eq!(done.failed, 1);
    assert_eq!(done.points_refunded, 1);
    assert_counters_invariant(&done);

    let credits = ledger.credits.lock().unwrap();
    assert_eq!(credits.len(), 1);
    assert_eq!(credits[0].0, "user-1");
    assert_eq!(credits[0].1, 1);
    assert!(credits[0].2.contains(&job.id.to_string()));

    // The rejected recipient's outcome is in the bounded results window.
    let failure = done.results.iter().find(|r| !r.success).unwrap();
    assert_eq!(failure.recipient_id, "r2");
    assert_eq!(failure.error_code.as_deref(), Some("131026"));
    assert_eq!(failure.retries, 0);
}

#[tokio::test]
async fn scenario_d_scheduled_job_not_due_is_not_processed() {
    let store = InMemoryStore::new();
    let ledger = RecordingLedger::default();
    let provider = RecordingProvider::default();

    let job = make_job(3).schedule_at(now_ms() + 3_600_000);
    store.insert(&job).await.unwrap();

    let engine = engine_with(&store, provider.clone(), &ledger);
    engine.run_job(&job.id).await.unwrap();

    let untouched = store.get(&job.id).await.unwrap().unwrap();
    assert_eq!(untouched.status, JobStatus::Scheduled);
    assert!(!untouched.processing_lock);
    assert_eq!(untouched.sent, 0);
    assert!(provider.calls.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn scenario_e_transient_error_then_success() {
    let store = InMemoryStore::new();
    let ledger = RecordingLedger::default();
    let provider = ThrottlingProvider {
        inner: RecordingProvider::default(),
        throttle: "r0".to_string(),
        throttled_once: Arc::new(Mutex::new(false)),
    };

    let job = make_job(2);
    store.insert(&job).await.unwrap();
    let engine = engine_with(&store, provider.clone(), &ledger);

    engine.run_job(&job.id).await.unwrap();

    let done = store.get(&job.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.sent, 2);
    assert_eq!(done.failed, 0);

    let first = done
        .results
        .iter()
        .find(|r| r.recipient_id == "r0")
        .unwrap();
    assert!(first.success);
    assert_eq!(first.retries, 1);
}

#[tokio::test]
async fn resumption_starts_exactly_at_saved_index() {
    let store = InMemoryStore::new();
    let ledger = RecordingLedger::default();
    let provider = RecordingProvider::default();

    // A previous run already processed the first two recipients.
    let mut job = make_job(5);
    job.current = 2;
    job.sent = 2;
    store.insert(&job).await.unwrap();

    let engine = engine_with(&store, provider.clone(), &ledger);
    engine.run_job(&job.id).await.unwrap();

    // Nothing below the saved index is re-dispatched.
    let calls = provider.calls.lock().unwrap().clone();
    assert_eq!(calls, vec!["r2", "r3", "r4"]);

    let done = store.get(&job.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.sent, 5);
    assert_eq!(done.current, 5);
    assert_counters_invariant(&done);
}

#[tokio::test]
async fn concurrent_claims_admit_exactly_one_winner() {
    let store = InMemoryStore::new();
    let job = make_job(1);
    store.insert(&job).await.unwrap();
    let now = now_ms();

    let (a, b) = tokio::join!(
        store.try_claim(&job.id, Duration::from_secs(1800), "w1", now),
        store.try_claim(&job.id, Duration::from_secs(1800), "w2", now),
    );

    let winners = [a.unwrap(), b.unwrap()].into_iter().flatten().count();
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn cancellation_refunds_unprocessed_recipients() {
    let store = InMemoryStore::new();
    let ledger = RecordingLedger::default();

    let job = make_job(3);
    store.insert(&job).await.unwrap();
    let provider = CancelingProvider {
        inner: RecordingProvider::default(),
        store: store.clone(),
        job_id: job.id.clone(),
    };

    let engine = engine_with(&store, provider.clone(), &ledger);
    engine.run_job(&job.id).await.unwrap();

    let done = store.get(&job.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Canceled);
    assert!(!done.processing_lock);
    assert_eq!(done.sent, 1);
    // Two recipients never dispatched; their points come back.
    assert_eq!(done.points_refunded, 2);
    assert_eq!(provider.inner.calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn malformed_recipient_is_counted_and_skipped() {
    let store = InMemoryStore::new();
    let ledger = RecordingLedger::default();
    let provider = RecordingProvider::default();

    let job = Job::new(
        "user-1",
        vec![
            Recipient::new("r0"),
            Recipient::new("  "),
            Recipient::new("r2"),
        ],
        MessagePayload::Text {
            body: "hi".to_string(),
        },
    )
    .with_deducted_points(3);
    store.insert(&job).await.unwrap();

    let engine = engine_with(&store, provider.clone(), &ledger);
    engine.run_job(&job.id).await.unwrap();

    let done = store.get(&job.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.sent, 2);
    assert_eq!(done.failed, 1);
    assert_eq!(done.points_refunded, 1);
    // The malformed entry never reached the provider.
    assert_eq!(provider.calls.lock().unwrap().clone(), vec!["r0", "r2"]);
    assert_counters_invariant(&done);
}

#[tokio::test]
async fn incomplete_payload_fails_with_full_refund_before_any_send() {
    let store = InMemoryStore::new();
    let ledger = RecordingLedger::default();
    let provider = RecordingProvider::default();

    let job = Job::new(
        "user-1",
        vec![Recipient::new("r0"), Recipient::new("r1")],
        MessagePayload::Text {
            body: "   ".to_string(),
        },
    )
    .with_deducted_points(2);
    store.insert(&job).await.unwrap();

    let engine = engine_with(&store, provider.clone(), &ledger);
    engine.run_job(&job.id).await.unwrap();

    let done = store.get(&job.id).await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Failed);
    assert!(!done.processing_lock);
    assert_eq!(done.sent, 0);
    assert_eq!(done.current, 0);
    assert_eq!(done.points_refunded, 2);
    assert!(done.last_error.is_some());
    assert!(provider.calls.lock().unwrap().is_empty());

    let credits = ledger.credits.lock().unwrap();
    assert_eq!(credits.len(), 1);
    assert_eq!(credits[0].1, 2);
}

#[tokio::test]
async fn repeated_refunds_never_exceed_deducted_points() {
    let store = InMemoryStore::new();
    let ledger = RecordingLedger::default();
    let provider = RejectingProvider {
        inner: RecordingProvider::default(),
        reject: "r0".to_string(),
    };

    let job = make_job(2);
    store.insert(&job).await.unwrap();

    let engine = engine_with(&store, provider, &ledger);
    engine.run_job(&job.id).await.unwrap();

    // Extra manual refunds past the first change nothing.
    for _ in 0..3 {
        store.apply_refund(&job.id, 10).await.unwrap();
    }

    let done = store.get(&job.id).await.unwrap().unwrap();
    assert_eq!(done.points_refunded, done.deducted_points);
}

#[tokio::test(start_paused = true)]
async fn scheduler_loop_picks_up_pending_jobs() {
    let store = InMemoryStore::new();
    let ledger = RecordingLedger::default();
    let provider = RecordingProvider::default();

    let job = make_job(2);
    store.insert(&job).await.unwrap();

    let engine = Arc::new(engine_with(&store, provider.clone(), &ledger));
    let shutdown = Arc::new(tokio::sync::Notify::new());

    let runner = {
        let engine = engine.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            engine
                .run_until(async move {
                    shutdown.notified().await;
                })
                .await
        })
    };

    // Wait for the scan to claim and finish the job.
    let mut done = None;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let loaded = store.get(&job.id).await.unwrap().unwrap();
        if loaded.status == JobStatus::Completed {
            done = Some(loaded);
            break;
        }
    }
    let done = done.expect("scheduler never completed the job");
    assert_eq!(done.sent, 2);
    assert!(!done.processing_lock);

    shutdown.notify_waiters();
    runner.await.unwrap().unwrap();
}
