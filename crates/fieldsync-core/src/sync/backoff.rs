//! Exponential retry delays

use std::time::Duration;

/// Delay before retry number `retry_count + 1`: `base * 2^retry_count`, capped at `max`.
pub fn retry_delay(base: Duration, max: Duration, retry_count: u32) -> Duration {
    let factor = 2_u32.checked_pow(retry_count).unwrap_or(u32::MAX);
    base.checked_mul(factor).map_or(max, |delay| delay.min(max))
}

/// Unix ms timestamp of the next permitted attempt.
pub fn next_attempt_at(now: i64, delay: Duration) -> i64 {
    let millis = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
    now.saturating_add(millis)
}
