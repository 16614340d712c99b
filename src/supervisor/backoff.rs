//! Readiness polling backoff.

use std::time::Duration;

/// First delay between readiness pings.
pub const READY_BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Longest delay between readiness pings.
pub const READY_BACKOFF_MAX: Duration = Duration::from_secs(2);

/// Exponential backoff: `min(base * 2^attempt + jitter, max)`, with a fixed
/// jitter of half the base (at most 500ms).
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponential = base.saturating_mul(2u32.saturating_pow(attempt));
    let jitter_ms = (base.as_millis() as u64).min(1000);
    let jitter = Duration::from_millis(jitter_ms / 2);
    exponential.saturating_add(jitter).min(max)
}
