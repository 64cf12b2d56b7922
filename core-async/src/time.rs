//! Time-related abstractions.
//!
//! `sleep`, `interval` and `timeout` come from Tokio's timer wheel, which
//! means tests can drive them deterministically with a paused clock
//! (`#[tokio::test(start_paused = true)]`).

pub use tokio::time::{interval, sleep, sleep_until, timeout, Interval, MissedTickBehavior, Sleep};

pub use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Error returned by [`timeout`] when the deadline elapses.
pub use tokio::time::error::Elapsed as TimeoutError;

/// Returns the current time as milliseconds since UNIX_EPOCH.
///
/// # Examples
///
/// ```rust
/// use core_async::time::now_millis;
///
/// assert!(now_millis() > 0);
/// ```
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Converts a duration to whole milliseconds, saturating at `u64::MAX`.
pub fn as_millis_u64(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
