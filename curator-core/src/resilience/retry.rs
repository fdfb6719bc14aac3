use std::time::Duration;

use tracing::warn;

use crate::error::{CuratorError, Result};

/// Exponential backoff schedule for [`retry_with_backoff`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub exponential_base: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            exponential_base: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Run `op` up to `1 + max_retries` times, sleeping between attempts.
///
/// Only errors accepted by `should_retry` are intercepted; anything else is
/// returned immediately. The delay starts at `initial_delay`, multiplies by
/// `exponential_base` per attempt and is clamped at `max_delay`. The last
/// error is surfaced when all attempts fail.
pub async fn retry_with_backoff<T, F, Fut, P>(
    policy: &RetryPolicy,
    should_retry: P,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&CuratorError) -> bool,
{
    let mut delay = policy.initial_delay;

    for attempt in 0..=policy.max_retries {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_retries && should_retry(&err) => {
                let current = delay.min(policy.max_delay);
                warn!(
                    attempt = attempt + 1,
                    delay_secs = current.as_secs_f64(),
                    error = %err,
                    "retrying after backoff"
                );
                tokio::time::sleep(current).await;
                delay = delay.mul_f64(policy.exponential_base);
            }
            Err(err) => return Err(err),
        }
    }

    unreachable!("retry loop returns on the final attempt")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> CuratorError {
        CuratorError::RateLimited("slow down".into())
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            exponential_base: 2.0,
            max_delay: Duration::from_millis(5),
        };

        let value = retry_with_backoff(&policy, CuratorError::is_transient, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(transient())
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn surfaces_last_error_when_exhausted() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            exponential_base: 2.0,
            max_delay: Duration::from_millis(5),
        };

        let result: Result<()> = retry_with_backoff(&policy, |_| true, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(transient()) }
        })
        .await;

        assert!(matches!(result, Err(CuratorError::RateLimited(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_pass_through() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_millis(1));

        let result: Result<()> =
            retry_with_backoff(&policy, CuratorError::is_transient, || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(CuratorError::Unauthorized("bad key".into())) }
            })
            .await;

        assert!(matches!(result, Err(CuratorError::Unauthorized(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
