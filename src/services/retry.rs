use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Exponential backoff policy for calls across an external boundary.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Backoff before the second attempt.
    pub initial_backoff: Duration,
    /// Ceiling applied after multiplication.
    pub max_backoff: Duration,
    /// Backoff multiplier between attempts.
    pub multiplier: f64,
    /// Jitter factor in [0.0, 1.0]; 0.0 disables jitter.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.3,
        }
    }
}

impl RetryPolicy {
    /// Policy for the external scanner boundary: 1s base, doubling, capped
    /// at 30s, five attempts.
    pub fn scanner() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.3,
        }
    }

    /// Policy for result persistence, independent of the scanner budget.
    pub fn persistence() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_factor: 0.3,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }

    /// Backoff duration after the given (1-based) failed attempt.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base = self.initial_backoff.as_millis() as f64
            * self.multiplier.powi((attempt - 1) as i32);
        let capped = base.min(self.max_backoff.as_millis() as f64);

        let with_jitter = if self.jitter_factor > 0.0 {
            let range = capped * self.jitter_factor;
            let jitter = rand::rng().random_range(-range..range);
            (capped + jitter).max(0.0)
        } else {
            capped
        };

        Duration::from_millis(with_jitter as u64)
    }
}

/// Retry an operation with exponential backoff, retrying only errors the
/// predicate classifies as transient. The last error is returned once the
/// attempt budget is exhausted.
pub async fn retry_with_backoff<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
    is_transient: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        attempt,
                        operation = operation_name,
                        "operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) => {
                if !is_transient(&err) {
                    debug!(
                        operation = operation_name,
                        error = %err,
                        "error is not transient, aborting"
                    );
                    return Err(err);
                }

                if attempt >= policy.max_attempts {
                    warn!(
                        operation = operation_name,
                        attempts = attempt,
                        error = %err,
                        "retry budget exhausted"
                    );
                    return Err(err);
                }

                let backoff = policy.backoff_for(attempt);
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    operation = operation_name,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "transient failure, backing off"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, thiserror::Error)]
    enum TestError {
        #[error("transient")]
        Transient,
        #[error("fatal")]
        Fatal,
    }

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(8),
            multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn backoff_doubles_until_the_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.0,
        };

        assert_eq!(policy.backoff_for(0), Duration::ZERO);
        assert_eq!(policy.backoff_for(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(4));
        assert_eq!(policy.backoff_for(5), Duration::from_secs(16));
        assert_eq!(policy.backoff_for(6), Duration::from_secs(30));
        assert_eq!(policy.backoff_for(9), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_the_configured_band() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.5,
        };

        for _ in 0..50 {
            let backoff = policy.backoff_for(1).as_millis() as i64;
            assert!((500..=1500).contains(&backoff), "got {backoff}ms");
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result = retry_with_backoff(
            &quick_policy(5),
            "test_op",
            || {
                let calls = Arc::clone(&calls_clone);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(TestError::Transient)
                    } else {
                        Ok("done")
                    }
                }
            },
            |e| matches!(e, TestError::Transient),
        )
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_the_attempt_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<(), TestError> = retry_with_backoff(
            &quick_policy(3),
            "test_op",
            || {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Transient)
                }
            },
            |e| matches!(e, TestError::Transient),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_terminal_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<(), TestError> = retry_with_backoff(
            &quick_policy(5),
            "test_op",
            || {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Fatal)
                }
            },
            |e| matches!(e, TestError::Transient),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
