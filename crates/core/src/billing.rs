//! Points reconciliation against delivery outcomes.
//!
//! Points are debited when the owner creates a campaign (outside this
//! engine); the reconciler credits them back in proportion to failures.
//! The store-side clamped increment is applied before the ledger credit
//! and the credit uses the amount actually applied, so reconciliation can
//! run any number of times without ever refunding more than was deducted.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::job::Job;
use crate::store::{JobStore, SharedStore};

/// Billing ledger boundary.
///
/// `credit` must record a transaction with the given reason; the debit
/// side lives with the campaign-creation flow, outside the engine.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Credit `amount` points back to `owner`, recording `reason`.
    async fn credit(&self, owner: &str, amount: u64, reason: &str) -> Result<()>;
}

/// A type-erased ledger that can be shared across campaign tasks.
pub type SharedLedger = Arc<dyn Ledger>;

/// Computes and issues per-job refunds.
#[derive(Clone)]
pub struct BillingReconciler {
    store: SharedStore,
    ledger: SharedLedger,
    points_per_message: u64,
}

impl BillingReconciler {
    pub fn new(store: SharedStore, ledger: SharedLedger, points_per_message: u64) -> Self {
        Self {
            store,
            ledger,
            points_per_message,
        }
    }

    /// Refund `failure_count` failed deliveries. Returns the points
    /// actually refunded after the outstanding-balance clamp.
    pub async fn reconcile(&self, job: &Job, failure_count: u64) -> Result<u64> {
        let requested = failure_count.saturating_mul(self.points_per_message);
        self.refund(job, requested, &format!(
            "refund for {} failed deliveries in campaign {}",
            failure_count, job.id
        ))
        .await
    }

    /// Refund everything still outstanding on the job. Used when a job
    /// fails before or without making progress.
    pub async fn reconcile_remaining(&self, job: &Job) -> Result<u64> {
        self.refund(job, job.deducted_points, &format!(
            "full refund for failed campaign {}",
            job.id
        ))
        .await
    }

    async fn refund(&self, job: &Job, requested: u64, reason: &str) -> Result<u64> {
        if requested == 0 {
            return Ok(0);
        }

        // The clamp happens store-side; `applied` is what may be credited.
        let applied = self.store.apply_refund(&job.id, requested).await?;
        if applied == 0 {
            tracing::debug!(job_id = %job.id, "Nothing outstanding to refund");
            return Ok(0);
        }

        // A failed credit after the increment under-refunds, never
        // over-refunds. Left to operational follow-up, not retried.
        if let Err(e) = self.ledger.credit(&job.owner, applied, reason).await {
            tracing::error!(
                job_id = %job.id,
                owner = %job.owner,
                points = applied,
                error = %e,
                "Ledger credit failed after refund was recorded; needs manual follow-up"
            );
            return Ok(applied);
        }

        tracing::info!(
            job_id = %job.id,
            owner = %job.owner,
            points = applied,
            "Points refunded"
        );
        Ok(applied)
    }
}
