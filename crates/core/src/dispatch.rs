//! Per-recipient dispatch: one message to one recipient, with bounded
//! retries and template fallback.
//!
//! Each dispatch is a small state machine: attempt, classify the error,
//! then retry, fall back to the decomposed template, or fail permanently.
//! All provider and network errors are absorbed into the returned outcome;
//! nothing escapes this boundary.

use std::time::Instant;

use crate::job::{DeliveryOutcome, Job, Recipient};
use crate::payload::{build_plan, SendPlan};
use crate::provider::{ProviderError, SendReceipt, SharedProvider};
use crate::retry::{backoff, is_retryable};

/// Sends one message to one recipient through the provider.
#[derive(Clone)]
pub struct Dispatcher {
    provider: SharedProvider,
    /// Retries beyond the first attempt.
    max_retries: u32,
}

impl Dispatcher {
    pub fn new(provider: SharedProvider, max_retries: u32) -> Self {
        Self {
            provider,
            max_retries,
        }
    }

    /// Deliver the job's message to `recipient`.
    ///
    /// Does not mutate the job record; the only side effect is the
    /// outbound call.
    pub async fn send(&self, job: &Job, recipient: &Recipient) -> DeliveryOutcome {
        let plan = build_plan(&job.message, recipient, job.personalize);
        let start = Instant::now();

        let mut attempt = 0u32;
        loop {
            match self.provider.send(&recipient.id, &plan.primary).await {
                Ok(receipt) => {
                    let elapsed = start.elapsed().as_millis() as u64;
                    tracing::trace!(
                        recipient = %recipient.id,
                        message_id = %receipt.message_id,
                        retries = attempt,
                        "Delivered"
                    );
                    return DeliveryOutcome::success(
                        &recipient.id,
                        receipt.message_id,
                        attempt,
                        elapsed,
                    );
                }
                Err(err) => {
                    if is_retryable(&err) && attempt < self.max_retries {
                        let wait = backoff(attempt);
                        tracing::debug!(
                            recipient = %recipient.id,
                            error = %err,
                            attempt,
                            wait_ms = wait.as_millis() as u64,
                            "Transient send failure, backing off"
                        );
                        tokio::time::sleep(wait).await;
                        attempt += 1;
                        continue;
                    }

                    // Permanent rejection of a composite template: try the
                    // simpler decomposition, one attempt per part.
                    if !is_retryable(&err) && !plan.fallback.is_empty() {
                        tracing::debug!(
                            recipient = %recipient.id,
                            error = %err,
                            "Combined template rejected, trying decomposed fallback"
                        );
                        match self.send_fallback(&recipient.id, &plan).await {
                            Ok(receipt) => {
                                let elapsed = start.elapsed().as_millis() as u64;
                                return DeliveryOutcome::success(
                                    &recipient.id,
                                    receipt.message_id,
                                    attempt,
                                    elapsed,
                                );
                            }
                            Err(fallback_err) => {
                                let elapsed = start.elapsed().as_millis() as u64;
                                return DeliveryOutcome::failure(
                                    &recipient.id,
                                    fallback_err.message.clone(),
                                    fallback_err.code.clone(),
                                    attempt,
                                    elapsed,
                                );
                            }
                        }
                    }

                    let elapsed = start.elapsed().as_millis() as u64;
                    tracing::debug!(
                        recipient = %recipient.id,
                        error = %err,
                        retries = attempt,
                        "Delivery failed"
                    );
                    return DeliveryOutcome::failure(
                        &recipient.id,
                        err.message.clone(),
                        err.code.clone(),
                        attempt,
                        elapsed,
                    );
                }
            }
        }
    }

    /// Send the decomposed fallback parts, one non-retried attempt each.
    /// The receipt of the last part stands for the whole delivery.
    async fn send_fallback(
        &self,
        recipient_id: &str,
        plan: &SendPlan,
    ) -> std::result::Result<SendReceipt, ProviderError> {
        let mut receipt = None;
        for part in &plan.fallback {
            receipt = Some(self.provider.send(recipient_id, part).await?);
        }
        receipt.ok_or_else(|| ProviderError::api(None, 0, "empty fallback plan"))
    }
}
