//! Retry and backoff logic for appstate transports
//!
//! Transports that touch slow or flaky media (files on network mounts, remote
//! stores) wrap their writes in [`with_backoff`] so a transient failure does not
//! immediately cost the user their saved layout.

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use futures::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Attempts made by [`with_backoff`] before giving up.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Common retry error types
#[derive(Error, Debug)]
pub enum RetryError {
    #[error("Operation '{operation}' exceeded maximum retry attempts ({attempts}): {source}")]
    MaxRetriesExceeded {
        operation: &'static str,
        attempts: usize,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Transient error in '{operation}': {source}")]
    Transient {
        operation: &'static str,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Permanent error in '{operation}': {source}")]
    Permanent {
        operation: &'static str,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Result type for retry operations
pub type RetryResult<T> = std::result::Result<T, RetryError>;

/// Boxed future for retry operations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = RetryResult<T>> + Send + 'a>>;

/// Execute an operation with the default exponential backoff policy
pub async fn with_backoff<F, T>(op_name: &'static str, f: F) -> RetryResult<T>
where
    F: FnMut(usize) -> BoxFuture<'static, T>,
{
    with_custom_backoff(op_name, default_backoff_policy(), DEFAULT_MAX_ATTEMPTS, f).await
}

/// Execute an operation with a custom backoff policy and attempt limit
///
/// The closure receives the 1-based attempt number. `Transient` errors are
/// retried until either `max_attempts` is reached or the policy's elapsed-time
/// budget runs out; `Permanent` errors are returned immediately.
pub async fn with_custom_backoff<F, T>(
    op_name: &'static str,
    mut policy: ExponentialBackoff,
    max_attempts: usize,
    mut f: F,
) -> RetryResult<T>
where
    F: FnMut(usize) -> BoxFuture<'static, T>,
{
    let max_attempts = max_attempts.max(1);
    policy.reset();
    let mut attempt = 1;

    loop {
        debug!("Attempting operation '{}' (attempt {})", op_name, attempt);

        match f(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        "Operation '{}' succeeded after {} attempts",
                        op_name, attempt
                    );
                }
                return Ok(result);
            }
            Err(err @ RetryError::Permanent { .. }) => {
                warn!(
                    "Operation '{}' failed permanently on attempt {}: {}",
                    op_name, attempt, err
                );
                return Err(err);
            }
            Err(err) => {
                warn!(
                    "Operation '{}' failed on attempt {}: {}",
                    op_name, attempt, err
                );

                let delay = match policy.next_backoff() {
                    Some(delay) if attempt < max_attempts => delay,
                    _ => {
                        return Err(RetryError::MaxRetriesExceeded {
                            operation: op_name,
                            attempts: attempt,
                            source: Box::new(err),
                        })
                    }
                };

                attempt += 1;

                #[cfg(feature = "async-rt")]
                tokio::time::sleep(delay).await;

                #[cfg(not(feature = "async-rt"))]
                std::thread::sleep(delay);
            }
        }
    }
}

/// Default backoff policy for general operations
pub fn default_backoff_policy() -> ExponentialBackoff {
    backoff_policy(
        Duration::from_millis(100),
        Duration::from_secs(5),
        Some(Duration::from_secs(30)),
    )
}

/// Backoff policy for local file operations (shorter timeouts)
pub fn local_storage_backoff_policy() -> ExponentialBackoff {
    backoff_policy(
        Duration::from_millis(50),
        Duration::from_secs(1),
        Some(Duration::from_secs(10)),
    )
}

/// Build an exponential policy with a fixed multiplier of 2
pub fn backoff_policy(
    initial: Duration,
    max: Duration,
    max_elapsed: Option<Duration>,
) -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(initial)
        .with_max_interval(max)
        .with_max_elapsed_time(max_elapsed)
        .with_multiplier(2.0)
        .build()
}

/// Trait for categorizing errors as transient or permanent
pub trait RetryableError {
    /// Returns true if the error is transient and the operation should be retried
    fn is_transient(&self) -> bool;

    /// Returns true if the error is permanent and retries should stop
    fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

impl RetryableError for std::io::Error {
    fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            std::io::ErrorKind::Interrupted
                | std::io::ErrorKind::WouldBlock
                | std::io::ErrorKind::TimedOut
        )
    }
}

/// Wrap an error as transient or permanent according to its classification
pub fn classify<E>(operation: &'static str, err: E) -> RetryError
where
    E: RetryableError + std::error::Error + Send + Sync + 'static,
{
    if err.is_transient() {
        RetryError::Transient {
            operation,
            source: Box::new(err),
        }
    } else {
        RetryError::Permanent {
            operation,
            source: Box::new(err),
        }
    }
}

/// Helper macro for creating transient errors
#[macro_export]
macro_rules! transient_error {
    ($op:expr, $err:expr) => {
        $crate::RetryError::Transient {
            operation: $op,
            source: Box::new($err),
        }
    };
}

/// Helper macro for creating permanent errors
#[macro_export]
macro_rules! permanent_error {
    ($op:expr, $err:expr) => {
        $crate::RetryError::Permanent {
            operation: $op,
            source: Box::new($err),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_successful_operation() {
        let result = with_backoff("test_op", |_attempt| Box::pin(async { Ok("success") })).await;

        assert!(result.is_ok());
        assert_eq!(result.unwrap(), "success");
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_then_success() {
        let attempt_count = Arc::new(AtomicUsize::new(0));
        let attempt_count_clone = Arc::clone(&attempt_count);

        let result = with_backoff("test_op", move |_attempt| {
            let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if count < 2 {
                    Err(transient_error!(
                        "test_op",
                        std::io::Error::new(std::io::ErrorKind::Interrupted, "interrupted")
                    ))
                } else {
                    Ok("success")
                }
            })
        })
        .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let attempt_count = Arc::new(AtomicUsize::new(0));
        let attempt_count_clone = Arc::clone(&attempt_count);

        let result: RetryResult<()> = with_backoff("test_op", move |_attempt| {
            attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {
                Err(transient_error!(
                    "test_op",
                    std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out")
                ))
            })
        })
        .await;

        assert!(matches!(
            result,
            Err(RetryError::MaxRetriesExceeded { attempts: 3, .. })
        ));
        assert_eq!(attempt_count.load(Ordering::SeqCst), DEFAULT_MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let attempt_count = Arc::new(AtomicUsize::new(0));
        let attempt_count_clone = Arc::clone(&attempt_count);

        let result: RetryResult<&str> = with_backoff("test_op", move |_attempt| {
            attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {
                Err(permanent_error!(
                    "test_op",
                    std::io::Error::new(std::io::ErrorKind::PermissionDenied, "permission denied")
                ))
            })
        })
        .await;

        assert!(matches!(result, Err(RetryError::Permanent { .. })));
        assert_eq!(attempt_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_io_error_classification() {
        let busy = std::io::Error::new(std::io::ErrorKind::Interrupted, "again");
        assert!(busy.is_transient());
        assert!(matches!(
            classify("write", busy),
            RetryError::Transient { .. }
        ));

        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no");
        assert!(denied.is_permanent());
        assert!(matches!(
            classify("write", denied),
            RetryError::Permanent { .. }
        ));
    }
}
