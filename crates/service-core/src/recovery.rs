//! Retry and backoff for operations the call service depends on
//!
//! Establishing the client connection and fetching call state can fail
//! transiently while the device changes networks. These helpers retry such
//! operations with capped exponential backoff.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::config::duration_ms;
use crate::errors::Result;

/// Configuration for retry behavior
///
/// # Examples
///
/// ```rust
/// # use ringline_service_core::recovery::RetryConfig;
/// # use std::time::Duration;
/// let config = RetryConfig::default();
/// assert_eq!(config.max_attempts, 3);
/// assert_eq!(config.initial_delay, Duration::from_millis(250));
/// assert!(config.use_jitter);
///
/// let quick = RetryConfig::quick();
/// assert!(quick.initial_delay < config.initial_delay);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,
    /// Delay before the first retry
    #[serde(with = "duration_ms")]
    pub initial_delay: Duration,
    /// Cap on the delay between retries
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Whether to add +-10% jitter to delays
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Short delays for operations expected to recover fast
    pub fn quick() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 1.5,
            use_jitter: true,
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// Capped exponential backoff with an attempt counter.
///
/// The counter resets on an explicit success signal, or when the session it
/// guards disappears, so the next failure starts again from the initial delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: RetryConfig) -> Self {
        Self { config, attempt: 0 }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether another attempt is allowed
    pub fn can_retry(&self) -> bool {
        self.attempt < self.config.max_attempts
    }

    /// Delay to wait before the current attempt, without jitter
    pub fn current_delay(&self) -> Duration {
        if self.attempt == 0 {
            return Duration::ZERO;
        }
        let factor = self.config.backoff_multiplier.powi(self.attempt.saturating_sub(1) as i32);
        let millis = self.config.initial_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.config.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Advance the counter and return the delay to wait before retrying
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let delay = self.current_delay();
        if self.config.use_jitter {
            let jitter = (rand::random::<f64>() - 0.5) * 0.2;
            let millis = delay.as_millis() as f64;
            Duration::from_millis((millis * (1.0 + jitter)) as u64)
        } else {
            delay
        }
    }

    pub fn reset(&mut self) {
        if self.attempt > 0 {
            debug!("Resetting attempt counter (attempts: {})", self.attempt);
        }
        self.attempt = 0;
    }
}

/// Run an operation, retrying recoverable errors with backoff.
///
/// Errors for which [`ServiceError::is_recoverable`](crate::errors::ServiceError::is_recoverable)
/// is false are returned immediately.
pub async fn retry_with_backoff<T, F, Fut>(operation_name: &str, config: RetryConfig, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = Backoff::new(config.clone());

    loop {
        let attempt = backoff.attempt() + 1;
        debug!(
            "Attempting operation (operation: {}, attempt: {}, max_attempts: {})",
            operation_name,
            attempt,
            config.max_attempts,
        );

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        "Operation succeeded after retries (operation: {}, attempt: {})",
                        operation_name,
                        attempt,
                    );
                }
                return Ok(result);
            }
            Err(e) if e.is_recoverable() && attempt < config.max_attempts => {
                let delay = backoff.next_delay();
                warn!(
                    "Recoverable error, will retry (operation: {}, attempt: {}, error: {}, next_delay_ms: {})",
                    operation_name,
                    attempt,
                    e,
                    delay.as_millis() as u64,
                );
                sleep(delay).await;
            }
            Err(e) => {
                if e.is_recoverable() {
                    error!(
                        "Operation failed after all retry attempts (operation: {}, attempts: {}, error: {})",
                        operation_name,
                        attempt,
                        e,
                    );
                } else {
                    error!(
                        "Non-recoverable error, not retrying (operation: {}, error: {})",
                        operation_name,
                        e,
                    );
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ServiceError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    fn no_jitter() -> RetryConfig {
        RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            backoff_multiplier: 2.0,
            use_jitter: false,
        }
    }

    #[test]
    fn backoff_is_capped_and_resets() {
        let mut backoff = Backoff::new(no_jitter());
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_recoverable_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = retry_with_backoff("connect", no_jitter(), move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ServiceError::call("socket closed"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(assert_ok!(result), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_recoverable_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<()> = retry_with_backoff("lookup", no_jitter(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(ServiceError::ConfigNotFound { call_type: "x".into() }) }
        })
        .await;
        assert_err!(result);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let config = RetryConfig {
            max_attempts: 2,
            ..no_jitter()
        };
        let result: Result<()> = retry_with_backoff("connect", config, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(ServiceError::platform("offline")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
