//! Deadline wrapper for a single unit of async work
//!
//! The deadline only stops the caller from waiting. The wrapped future is
//! dropped on expiry, but work it already handed to other tasks keeps running.

use crate::error::TimedOut;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Run `future` with a deadline of `limit`.
///
/// Settles exactly as `future` does when it finishes first. Otherwise fails
/// with [`TimedOut`] at the boundary. The timer belongs to the returned
/// future, so it is released on every exit path.
///
/// # Errors
/// - `TimedOut` if `limit` elapses before `future` completes
pub async fn with_timeout<F>(future: F, limit: Duration) -> Result<F::Output, TimedOut>
where
    F: Future,
{
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| TimedOut { limit })
}

/// Run `future` and report how long it took to settle
pub async fn timed<F>(future: F) -> (F::Output, Duration)
where
    F: Future,
{
    let start = Instant::now();
    let output = future.await;
    (output, start.elapsed())
}

/// Saturating conversion used when durations are stored as milliseconds
#[inline]
#[must_use]
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
