//! Engine supervisor: wires the store, provider, and ledger into the
//! scheduler and reclaim loops, and owns graceful shutdown.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::task::JoinSet;

use crate::billing::{Ledger, SharedLedger};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::job::{now_ms, Job, JobId};
use crate::lock::LockManager;
use crate::orchestrator::Orchestrator;
use crate::provider::{MessagingProvider, SharedProvider};
use crate::reclaim::Reclaimer;
use crate::scheduler::Scheduler;
use crate::store::{JobStore, SharedStore};

/// Snapshot of one campaign currently being worked on by this instance.
#[derive(Debug, Clone)]
pub struct ActiveJob {
    pub job_id: JobId,
    pub owner: String,
    pub total: usize,
    pub current: usize,
    pub started_at: i64,
}

/// Best-effort, process-local view of in-flight campaigns.
///
/// Observability only: the persisted lock is the source of truth for who
/// owns a job, and nothing here survives a restart.
#[derive(Clone, Default)]
pub struct ActiveJobs {
    inner: Arc<Mutex<HashMap<JobId, ActiveJob>>>,
}

impl ActiveJobs {
    pub(crate) fn insert(&self, job: &Job) {
        let entry = ActiveJob {
            job_id: job.id.clone(),
            owner: job.owner.clone(),
            total: job.recipients.len(),
            current: job.current,
            started_at: now_ms(),
        };
        self.inner.lock().unwrap().insert(job.id.clone(), entry);
    }

    pub(crate) fn update(&self, id: &JobId, current: usize) {
        if let Some(entry) = self.inner.lock().unwrap().get_mut(id) {
            entry.current = current;
        }
    }

    pub(crate) fn remove(&self, id: &JobId) {
        self.inner.lock().unwrap().remove(id);
    }

    /// Current in-flight campaigns, in no particular order.
    pub fn snapshot(&self) -> Vec<ActiveJob> {
        self.inner.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

/// Generate a unique worker id for lock and reclaim diagnostics.
pub fn generate_worker_id() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let pid = std::process::id();
    let ts = now_ms();
    format!("{}-{}-{}", host, pid, ts)
}

/// Builder for Engine.
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<SharedStore>,
    provider: Option<SharedProvider>,
    ledger: Option<SharedLedger>,
    worker_id: Option<String>,
}

impl EngineBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            store: None,
            provider: None,
            ledger: None,
            worker_id: None,
        }
    }

    /// Set the engine configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the job store.
    pub fn store(mut self, store: impl JobStore + 'static) -> Self {
        self.store = Some(SharedStore::new(store));
        self
    }

    /// Set the messaging provider.
    pub fn provider(mut self, provider: impl MessagingProvider + 'static) -> Self {
        let provider: SharedProvider = Arc::new(provider);
        self.provider = Some(provider);
        self
    }

    /// Set the billing ledger.
    pub fn ledger(mut self, ledger: impl Ledger + 'static) -> Self {
        let ledger: SharedLedger = Arc::new(ledger);
        self.ledger = Some(ledger);
        self
    }

    /// Override the generated worker id.
    pub fn worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = Some(id.into());
        self
    }

    /// Build the Engine.
    pub fn build(self) -> Result<Engine> {
        let store = self
            .store
            .ok_or_else(|| EngineError::Config("Store is required".to_string()))?;
        let provider = self
            .provider
            .ok_or_else(|| EngineError::Config("Provider is required".to_string()))?;
        let ledger = self
            .ledger
            .ok_or_else(|| EngineError::Config("Ledger is required".to_string()))?;

        let worker_id = self.worker_id.unwrap_or_else(generate_worker_id);
        let running = Arc::new(AtomicBool::new(true));
        let wake = Arc::new(Notify::new());
        let active = ActiveJobs::default();

        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            provider,
            ledger,
            self.config.clone(),
            worker_id.clone(),
            running.clone(),
            wake.clone(),
            active.clone(),
        ));

        Ok(Engine {
            config: self.config,
            store,
            orchestrator,
            worker_id,
            running,
            wake,
            active,
        })
    }
}

/// The campaign delivery engine.
///
/// Many engine instances may run against the same store; correctness
/// rests entirely on the persisted per-job lock, not on anything held in
/// memory here. An engine is single-shot: once shut down it is done.
pub struct Engine {
    config: EngineConfig,
    store: SharedStore,
    orchestrator: Arc<Orchestrator>,
    worker_id: String,
    running: Arc<AtomicBool>,
    wake: Arc<Notify>,
    active: ActiveJobs,
}

impl Engine {
    /// Create a new builder for Engine.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Get the worker id.
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Snapshot of campaigns currently in flight on this instance.
    pub fn active_jobs(&self) -> Vec<ActiveJob> {
        self.active.snapshot()
    }

    /// Run one job immediately, outside the scheduler ("run now").
    pub async fn run_job(&self, job_id: &JobId) -> Result<()> {
        self.orchestrator.run(job_id).await
    }

    /// Run the engine until interrupted (ctrl-c).
    pub async fn run(&self) -> Result<()> {
        self.run_until(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await
    }

    /// Run the engine until the provided shutdown future completes, then
    /// drain gracefully.
    pub async fn run_until<S>(&self, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()> + Send,
    {
        let mut tasks = JoinSet::new();

        let scheduler = Scheduler::new(
            self.store.clone(),
            self.orchestrator.clone(),
            self.config.scan_interval,
            self.config.scan_batch_size,
            self.config.max_concurrent_jobs,
            self.running.clone(),
            self.wake.clone(),
        );
        tasks.spawn(async move { scheduler.run().await });

        let reclaimer = Reclaimer::new(
            LockManager::new(
                self.store.clone(),
                self.config.lock_timeout,
                self.worker_id.clone(),
            ),
            self.config.reclaim_interval,
            self.running.clone(),
            self.wake.clone(),
        );
        tasks.spawn(async move { reclaimer.run().await });

        tracing::info!(worker_id = %self.worker_id, "Delivery engine started");

        shutdown.await;
        tracing::info!("Shutdown requested, draining...");

        self.shutdown().await;

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Task panicked");
            }
        }

        tracing::info!(worker_id = %self.worker_id, "Delivery engine stopped");
        Ok(())
    }

    /// Initiate graceful shutdown: stop the loops, abort pending pacing
    /// sleeps, and wait for in-flight campaigns to flush and requeue.
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.wake.notify_waiters();

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        while !self.active.is_empty() {
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(
                    active = self.active.len(),
                    "Shutdown timeout reached, forcing stop"
                );
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    }
}
