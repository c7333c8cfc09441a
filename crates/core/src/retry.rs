//! Retry classification and backoff for provider errors.
//!
//! Splits "should we try again" (knowledge of the provider's error
//! taxonomy) from "how long to wait" (exponential backoff with jitter).

use rand::Rng;
use std::time::Duration;

use crate::provider::ProviderError;

/// Provider error codes that signal transient throttling or temporary
/// unavailability.
const RETRYABLE_CODES: &[&str] = &[
    "429",
    "503",
    "rate_limited",
    "too_many_requests",
    "temporarily_unavailable",
    "service_unavailable",
];

/// Message substrings matched as a fallback when the provider omits a code.
const RETRYABLE_FRAGMENTS: &[&str] = &[
    "too many requests",
    "try again later",
    "temporarily unavailable",
    "rate limit",
];

const BACKOFF_BASE_MS: u64 = 1000;
const BACKOFF_CAP_MS: u64 = 10_000;
const BACKOFF_JITTER_MS: i64 = 100;
const BACKOFF_FLOOR_MS: u64 = 500;

/// Whether a provider error is transient and worth another attempt.
///
/// Retryable: connection-level failures (no response received), HTTP 429,
/// and the allow-list above. Everything else (invalid recipient, malformed
/// payload, permission errors) is permanent.
pub fn is_retryable(error: &ProviderError) -> bool {
    if error.connection {
        return true;
    }
    if error.http_status == Some(429) {
        return true;
    }
    if let Some(code) = &error.code {
        if RETRYABLE_CODES.iter().any(|c| code.eq_ignore_ascii_case(c)) {
            return true;
        }
    }
    let message = error.message.to_lowercase();
    RETRYABLE_FRAGMENTS.iter().any(|f| message.contains(f))
}

/// Backoff before retry number `attempt` (0-based): exponential from
/// 1000ms, doubling per attempt, capped at 10s, with ±100ms jitter and a
/// 500ms floor.
pub fn backoff(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.min(16));
    let capped = exp.min(BACKOFF_CAP_MS);
    let jitter = rand::thread_rng().gen_range(-BACKOFF_JITTER_MS..=BACKOFF_JITTER_MS);
    let with_jitter = (capped as i64 + jitter).max(BACKOFF_FLOOR_MS as i64);
    Duration::from_millis(with_jitter as u64)
}
