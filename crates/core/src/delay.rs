//! Inter-recipient pacing calculator.
//!
//! Pure policy: given the job's delay configuration and the message index,
//! compute the target pause before the next send. Decoupled from the send
//! loop so pacing strategies are independently testable and swappable.

use rand::Rng;
use std::time::Duration;

use crate::job::{DelayConfig, DelayMode};

/// Surcharge applied to media sends (images, videos, rich templates).
const MEDIA_SURCHARGE_MS: u64 = 1000;

/// Compute the target pacing delay after the send at `message_index`.
///
/// All modes are deterministic given their inputs except `Random`, which
/// draws uniformly from `[min_delay_secs, max_delay_secs]`. `Incremental`
/// grows without bound; callers wanting a ceiling must apply their own.
/// `Adaptive` behaves as fixed pacing on `adaptive_base_secs`; the
/// persisted delay metrics exist so a richer feedback law can be tuned
/// later.
pub fn target_delay(config: &DelayConfig, message_index: usize, has_media: bool) -> Duration {
    if !config.enabled {
        return Duration::ZERO;
    }

    let base_ms = match config.mode {
        DelayMode::Fixed => config.delay_secs * 1000,
        DelayMode::Random => {
            let min = config.min_delay_secs;
            let max = config.max_delay_secs.max(min);
            rand::thread_rng().gen_range(min..=max) * 1000
        }
        DelayMode::Incremental => {
            (config.incremental_start_secs + message_index as u64 * config.incremental_step_secs)
                * 1000
        }
        DelayMode::Adaptive => config.adaptive_base_secs * 1000,
    };

    let surcharge = if has_media { MEDIA_SURCHARGE_MS } else { 0 };
    Duration::from_millis(base_ms + surcharge)
}
