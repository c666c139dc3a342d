//! Retrying an async operation with exponential backoff.
//!
//! The first retry waits `initial_delay_ms`, each following one twice as
//! long, capped at `max_delay_ms`, plus up to `jitter_ms` of jitter. Waits are
//! timer sleeps on the caller's task, so other tasks keep running.
use crate::lmt_warn;
use std::fmt;
use std::future::Future;
use std::time::{Duration, SystemTime};

/// Backoff settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts in total, the first one included. Zero is treated as one.
    pub max_attempts: usize,
    /// Wait before the first retry.
    pub initial_delay_ms: u64,
    /// Upper bound of any single wait.
    pub max_delay_ms: u64,
    /// Maximum random extra wait.
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            jitter_ms: 0,
        }
    }
}

impl RetryPolicy {
    /// Wait after the failed attempt number `attempt` (1-based), without
    /// jitter.
    pub fn backoff(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as u32;
        let delay = self
            .initial_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

// A random jitter value up to max_jitter.
fn generate_jitter(max_jitter: u64) -> u64 {
    if max_jitter == 0 {
        return 0;
    }
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    u64::from(nanos) % (max_jitter + 1)
}

/// Run `operation` until it succeeds or `policy.max_attempts` attempts have
/// failed, returning the last error in that case.
///
/// `operation` receives the 1-based attempt number.
pub async fn retry_with_exponential_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(usize) -> Fut,
    E: fmt::Display,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation(attempt).await {
            Ok(result) => return Ok(result),
            Err(err) if attempt < max_attempts => {
                let jitter = generate_jitter(policy.jitter_ms);
                let delay = policy.backoff(attempt) + Duration::from_millis(jitter);
                lmt_warn!(
                    name: "Delivery.Retry",
                    operation = operation_name,
                    attempt = attempt as u64,
                    delay_ms = delay.as_millis() as u64,
                    error = format!("{}", err)
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    fn policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_delay_ms: 5_000,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(4), Duration::from_secs(5));
        assert_eq!(policy.backoff(200), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_in_range() {
        assert!(generate_jitter(100) <= 100);
        assert_eq!(generate_jitter(0), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_first_attempt_without_waiting() {
        let start = Instant::now();
        let result =
            retry_with_exponential_backoff(&policy(3), "test", |_| async { Ok::<_, String>(5) })
                .await;
        assert_eq!(result, Ok(5));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_with_growing_waits_then_succeeds() {
        let attempts = AtomicUsize::new(0);
        let start = Instant::now();
        let result = retry_with_exponential_backoff(&policy(3), "test", |_| {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err("unavailable".to_string())
                } else {
                    Ok("sent")
                }
            }
        })
        .await;

        assert_eq!(result, Ok("sent"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let attempts = AtomicUsize::new(0);
        let result = retry_with_exponential_backoff(&policy(3), "test", |attempt| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move { Err::<(), _>(format!("failure {}", attempt)) }
        })
        .await;

        assert_eq!(result, Err("failure 3".to_string()));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
