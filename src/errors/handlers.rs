use std::future::Future;
use std::time::Duration;

use tracing::{error, info, warn};

use super::ProvisionError;

/// Bounded retry for backend steps the provisioner is allowed to repeat.
///
/// The backend client never retries on its own; the provisioner wraps
/// `describe` + `resolve` in one of these. `attempts == 1` means no retry.
/// Only errors accepted by the `retryable` predicate are retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    pub fn single() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub async fn run<T, F, Fut, R>(&self, operation: &str, retryable: R, mut op: F) -> Result<T, ProvisionError>
    where
        R: Fn(&ProvisionError) -> bool,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProvisionError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(result) => {
                    if attempt > 1 {
                        info!(operation, retries = attempt - 1, "Operation succeeded after retries");
                    }
                    return Ok(result);
                }
                Err(e) if attempt < self.attempts && retryable(&e) => {
                    warn!(
                        operation,
                        error = %e,
                        retry_count = attempt,
                        max_attempts = self.attempts,
                        "Operation failed, retrying"
                    );
                    attempt += 1;
                    if !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                }
                Err(e) => {
                    if attempt > 1 {
                        error!(operation, error = %e, "Maximum attempts reached, operation failed");
                    }
                    return Err(e);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::single()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn not_found() -> ProvisionError {
        ProvisionError::AddressNotFound {
            instance_id: "3".into(),
        }
    }

    #[tokio::test]
    async fn test_single_attempt_does_not_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::single()
            .run("describe", |_| true, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(not_found()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = RetryPolicy::new(3, Duration::ZERO)
            .run("describe", |_| true, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(not_found())
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_returns_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::new(5, Duration::ZERO)
            .run(
                "describe",
                |e| matches!(e, ProvisionError::AddressNotFound { .. }),
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async {
                        Err(ProvisionError::DescribeFailed {
                            instance_id: "3".into(),
                            message: "no such VM".into(),
                        })
                    }
                },
            )
            .await;

        assert!(matches!(result, Err(ProvisionError::DescribeFailed { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_zero_attempts_clamped() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).attempts(), 1);
    }
}
