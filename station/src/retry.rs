use crate::errors::{is_retryable, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

const MAX_ATTEMPTS: u32 = 3;
const MIN_DELAY_MS: u64 = 1000;
const MAX_DELAY_MS: u64 = 2000;

/// Attempt cap and the bounds of the uniformly random wait between attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            min_delay: Duration::from_millis(MIN_DELAY_MS),
            max_delay: Duration::from_millis(MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    #[cfg(test)]
    pub fn new(max_attempts: u32, min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            min_delay,
            max_delay: max_delay.max(min_delay),
        }
    }

    fn next_delay(&self) -> Duration {
        if self.max_delay <= self.min_delay {
            return self.min_delay;
        }
        let span = self.max_delay - self.min_delay;
        self.min_delay + span.mul_f64(rand::thread_rng().gen_range(0.0..=1.0))
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// attempt cap is hit. The last error is returned unchanged.
pub async fn retry<T, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    info!("{} succeeded on attempt {}", label, attempt);
                }
                return Ok(value);
            }
            Err(e) => {
                if attempt >= policy.max_attempts {
                    return Err(e);
                }

                if !is_retryable(&e) {
                    warn!("{}: non-retryable error: {}", label, e);
                    return Err(e);
                }

                let delay = policy.next_delay();
                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {}ms...",
                    label,
                    attempt,
                    policy.max_attempts,
                    e,
                    delay.as_millis()
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2))
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.min_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(2));
    }

    #[test]
    fn test_delay_stays_in_range() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let delay = policy.next_delay();
            assert!(delay >= policy.min_delay && delay <= policy.max_delay);
        }
    }

    #[tokio::test]
    async fn test_transient_failures_are_hidden() {
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result = retry(quick(), "flaky", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::Emit("not yet".to_string()))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_last_error_surfaces_after_cap() {
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result: Result<()> = retry(quick(), "broken", move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::MeasurementSubmission {
                status: 500 + n as u16,
                body: String::new(),
            })
        })
        .await;

        match result {
            Err(Error::MeasurementSubmission { status, .. }) => assert_eq!(status, 502),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_non_retryable_stops_early() {
        tokio_test::block_on(async {
            let counter = AtomicU32::new(0);
            let calls = &counter;

            let result: Result<()> = retry(quick(), "login", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::InvalidCredentials)
            })
            .await;

            assert!(matches!(result, Err(Error::InvalidCredentials)));
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        });
    }
}
