//! Retry logic for BLE operations.
//!
//! Frame sends and device resolution both retry on transient failures, each
//! with its own preset.
//!
//! # Example
//!
//! ```
//! use aquable_core::{RetryConfig, with_retry, Error};
//!
//! # async fn example() -> Result<(), Error> {
//! let config = RetryConfig::for_frame();
//!
//! let result = with_retry(&config, "send_frame", || async {
//!     Ok::<_, Error>(42)
//! }).await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (0 means no retries).
    pub max_retries: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries (for exponential backoff).
    pub max_delay: Duration,
    /// Backoff multiplier (1.0 = constant delay, 2.0 = double each time).
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Sending one command frame: three attempts, 250 ms apart.
    pub fn for_frame() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_millis(250),
            backoff_multiplier: 1.0,
        }
    }

    /// Resolving an address to a device: three attempts, waiting 0.5 s then 1 s.
    pub fn for_resolve() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
            backoff_multiplier: 2.0,
        }
    }

    /// Total number of attempts, including the first.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Calculate delay for a given attempt number.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(base_delay.min(self.max_delay.as_secs_f64()))
    }
}

/// Execute an async operation, retrying errors that look transient.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    operation: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    with_retry_if(config, operation_name, is_retryable, operation).await
}

/// Execute an async operation, retrying errors accepted by `should_retry`.
pub async fn with_retry_if<F, Fut, T, P>(
    config: &RetryConfig,
    operation_name: &str,
    should_retry: P,
    operation: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&Error) -> bool,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!("{} succeeded after {} retries", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(e) if attempt < config.max_retries && should_retry(&e) => {
                let delay = config.delay_for_attempt(attempt);
                warn!(
                    error = %e,
                    "{} failed (attempt {}/{}), retrying in {:?}",
                    operation_name,
                    attempt + 1,
                    config.attempts(),
                    delay
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Check if an error is worth retrying at the transport level.
pub fn is_retryable(error: &Error) -> bool {
    match error {
        Error::Timeout { .. }
        | Error::Bluetooth(_)
        | Error::ConnectionFailed { .. }
        | Error::NotConnected
        | Error::WriteFailed { .. }
        | Error::Io(_) => true,
        Error::DeviceNotFound(_)
        | Error::WrongType { .. }
        | Error::CharacteristicNotFound { .. }
        | Error::Validation(_)
        | Error::Parse(_)
        | Error::Storage(_)
        | Error::Cancelled
        | Error::Internal(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_frame_preset_is_constant() {
        let config = RetryConfig::for_frame();
        assert_eq!(config.attempts(), 3);
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(250));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(250));
    }

    #[test]
    fn test_resolve_preset_backs_off() {
        let config = RetryConfig::for_resolve();
        assert_eq!(config.attempts(), 3);
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
    }

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable(&Error::timeout("x", Duration::from_secs(1))));
        assert!(is_retryable(&Error::NotConnected));
        assert!(!is_retryable(&Error::device_not_found("AA")));
        assert!(!is_retryable(&Error::validation("bad")));
        assert!(!is_retryable(&Error::characteristic_not_found("x", 1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_eventual_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result = with_retry(&RetryConfig::for_frame(), "test", || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::NotConnected)
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_gives_up() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<()> = with_retry(&RetryConfig::for_frame(), "test", || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::NotConnected)
            }
        })
        .await;

        assert!(matches!(result, Err(Error::NotConnected)));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<()> = with_retry(&RetryConfig::for_frame(), "test", || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::validation("bad"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_if_custom_predicate() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<()> = with_retry_if(
            &RetryConfig::for_resolve(),
            "resolve",
            |e| matches!(e, Error::DeviceNotFound(_)),
            || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(Error::device_not_found("AA"))
                }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
