//! Retry policy shared by metadata and package downloads.
//!
//! Only transient failures are retried: timeouts, dropped connections and
//! server-side statuses (5xx, 408, 429). TLS failures and other client
//! errors fail on the first attempt.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Classifies an error as worth retrying.
pub trait Transience {
    /// Whether another attempt might succeed.
    fn is_transient(&self) -> bool;
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1.
    ///
    /// Doubles each time up to `max_delay`, with up to 25% jitter added.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1 << exp).min(self.max_delay);
        let jitter = delay.mul_f64(rand::random::<f64>() * 0.25);
        (delay + jitter).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails persistently, or attempts run out.
    ///
    /// # Errors
    ///
    /// Returns the last error produced by `op`.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transience + Display,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        "{what}: attempt {attempt}/{} failed ({e}), retrying in {}ms",
                        self.max_attempts,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Flaky(bool);

    impl Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky(transient={})", self.0)
        }
    }

    impl Transience for Flaky {
        fn is_transient(&self) -> bool {
            self.0
        }
    }

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::default();
        assert!(policy.backoff(1) >= Duration::from_millis(200));
        assert!(policy.backoff(1) <= Duration::from_millis(250));
        assert_eq!(policy.backoff(30), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried_until_exhausted() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Flaky> = fast()
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Flaky(true)) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_persistent_errors_fail_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Flaky> = fast()
            .run("test", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Flaky(false)) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let result = fast()
            .run("test", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n == 0 { Err(Flaky(true)) } else { Ok(n) } }
            })
            .await;
        assert_eq!(result.unwrap(), 1);
    }
}
