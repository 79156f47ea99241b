//! Exponential backoff for the downloader (section 4.7 point 2: initial 2s,
//! factor 2, capped at 30s, 5 attempts).
//!
//! A separate copy from the agent's webhook backoff: the two crates don't
//! share a private module, and this one carries the downloader's own
//! defaults rather than the webhook dispatcher's fixed 1s retry.

use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self { base_delay: Duration::from_secs(2), max_delay: Duration::from_secs(30), max_attempts: 5 }
    }
}

/// `base_delay * 2^(attempt-1)`, capped at `max_delay`. `attempt` is 1-based.
pub fn delay_for_attempt(config: &BackoffConfig, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(20);
    let scaled = config.base_delay.saturating_mul(1u32.checked_shl(exp).unwrap_or(u32::MAX));
    scaled.min(config.max_delay)
}
