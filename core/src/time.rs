// ABOUTME: Clock and timer primitives: monotonic "now", cancellable sleep.
// ABOUTME: Resolution is one second, matching the lease/watchdog TTL granularity.
use chrono::{Local, TimeZone, Utc};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

/// Current time as a Unix timestamp in whole seconds.
///
/// # Examples
///
/// ```
/// use jobslib_core::time::now_unix;
/// let now = now_unix();
/// assert!(now > 1_700_000_000);
/// ```
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Render a Unix timestamp as `%Y-%m-%d %H:%M:%S` UTC.
pub fn to_utc(seconds: i64) -> String {
    Utc.timestamp_opt(seconds, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

/// Render a Unix timestamp as `%Y-%m-%d %H:%M:%S` in the local timezone.
pub fn to_local(seconds: i64) -> String {
    Local
        .timestamp_opt(seconds, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

/// Sleep for `duration`, returning early if `token` is cancelled.
///
/// Returns `true` if the full duration elapsed, `false` if cancelled early.
/// This is the run loop's only cancellable suspension point outside of
/// collaborator I/O (spec §5, suspension point (c)).
pub async fn sleep_cancellable(duration: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = token.cancelled() => false,
    }
}

/// A monotonic duration measurer, used to time run-loop iterations.
pub struct MonotonicTimer {
    start: Instant,
}

impl MonotonicTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn reset(&mut self) {
        self.start = Instant::now();
    }
}

impl Default for MonotonicTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_now_unix_reasonable() {
        assert!(now_unix() > 1_577_836_800); // 2020-01-01
    }

    #[test]
    fn test_to_utc() {
        assert_eq!(to_utc(1_609_459_200), "2021-01-01 00:00:00");
    }

    #[test]
    fn test_monotonic_timer() {
        let timer = MonotonicTimer::new();
        thread::sleep(Duration::from_millis(1));
        assert!(timer.elapsed() >= Duration::from_millis(1));
    }

    #[test]
    fn test_monotonic_timer_reset() {
        let mut timer = MonotonicTimer::new();
        thread::sleep(Duration::from_millis(5));
        let first = timer.elapsed();
        timer.reset();
        assert!(timer.elapsed() < first);
    }

    #[tokio::test]
    async fn test_sleep_cancellable_completes() {
        let token = CancellationToken::new();
        let completed = sleep_cancellable(Duration::from_millis(5), &token).await;
        assert!(completed);
    }

    #[tokio::test]
    async fn test_sleep_cancellable_cancelled() {
        let token = CancellationToken::new();
        let token2 = token.clone();
        tokio::spawn(async move {
            token2.cancel();
        });
        let completed = sleep_cancellable(Duration::from_secs(30), &token).await;
        assert!(!completed);
    }
}
