//! Exponential backoff.
//!
//! Delays are always recomputed from the attempt counter rather than
//! accumulated, so the same `retry_count` yields the same delay no matter
//! how the caller got there.

use core::time::Duration;

/// Multiplier applied per reconnect attempt.
pub const RECONNECT_MULTIPLIER: u32 = 2;

/// Reconnect delay for the given attempt: `min(initial * 2^retry_count, max)`.
///
/// Saturates instead of overflowing for large counts, so the result is
/// monotonically non-decreasing in `retry_count`.
pub fn backoff(retry_count: u32, initial: Duration, max: Duration) -> Duration {
    let factor = RECONNECT_MULTIPLIER.checked_pow(retry_count).unwrap_or(u32::MAX);
    initial.saturating_mul(factor).min(max)
}

/// Next delay in a retry ladder with an arbitrary multiplier.
///
/// Used by the retrying transport, whose policy carries a configurable
/// (fractional) multiplier.
pub fn next_delay(current: Duration, multiplier: f32, max: Duration) -> Duration {
    if !multiplier.is_finite() || multiplier <= 0.0 {
        return current.min(max);
    }
    let scaled = current.as_secs_f64() * f64::from(multiplier);
    if scaled >= max.as_secs_f64() {
        max
    } else {
        Duration::from_secs_f64(scaled)
    }
}

// ── Tests ────────────────────────────────────────────────────
