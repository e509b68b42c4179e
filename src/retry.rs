//! Fixed-interval retry bounded by an overall deadline.

use std::fmt::Display;
use std::future::Future;

use log::{debug, warn};
use tokio::time::{sleep, Instant};

use crate::types::RetryPolicy;

/// Runs `operation` until it succeeds or `policy.deadline` has elapsed since
/// the first attempt.
///
/// The first attempt starts immediately and attempts are spaced by
/// `policy.interval`.  On exhaustion the error of the most recent attempt is
/// returned as-is.  Operations may be invoked any number of times, so they
/// must tolerate repetition.
pub async fn retry_until_success<T, E, F, Fut>(policy: RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("Succeeded after {} attempts", attempt);
                }
                return Ok(value);
            }
            Err(e) => {
                let elapsed = started.elapsed();
                if elapsed >= policy.deadline {
                    warn!(
                        "Giving up after {} attempts in {:?}: {}",
                        attempt, elapsed, e
                    );
                    return Err(e);
                }
                debug!(
                    "Attempt {} failed: {}. Retrying in {:?}...",
                    attempt, e, policy.interval
                );
            }
        }
        sleep(policy.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::time::Duration;

    fn policy(interval_ms: u64, deadline_ms: u64) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(interval_ms),
            Duration::from_millis(deadline_ms),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn returns_first_success_after_failures() {
        let calls = Cell::new(0);
        let result = retry_until_success(policy(100, 1_000), || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move {
                if n <= 3 {
                    Err(format!("attempt {n}"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(4));
        assert_eq!(calls.get(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn first_attempt_is_immediate() {
        let started = Instant::now();
        let result: Result<_, String> = retry_until_success(policy(500, 5_000), || async { Ok(7) }).await;
        assert_eq!(result, Ok(7));
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_returns_last_error_within_bounds() {
        let calls = Cell::new(0);
        let deadline = Duration::from_millis(1_000);
        let interval = Duration::from_millis(300);
        let started = Instant::now();
        let result: Result<(), String> =
            retry_until_success(RetryPolicy::new(interval, deadline), || {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move { Err(format!("attempt {n}")) }
            })
            .await;
        let elapsed = started.elapsed();

        assert_eq!(result, Err(format!("attempt {}", calls.get())));
        assert!(elapsed >= deadline, "{elapsed:?}");
        assert!(elapsed < deadline + interval, "{elapsed:?}");
        // attempts at 0, 300, 600, 900, 1200 ms
        assert_eq!(calls.get(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_deadline_makes_a_single_attempt() {
        let calls = Cell::new(0);
        let result: Result<(), &str> = retry_until_success(policy(100, 0), || {
            calls.set(calls.get() + 1);
            async { Err("nope") }
        })
        .await;
        assert_eq!(result, Err("nope"));
        assert_eq!(calls.get(), 1);
    }
}
