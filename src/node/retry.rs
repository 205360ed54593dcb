//! Retry with exponential backoff for node requests

use crate::config::NodeConfig;
use crate::error::Result;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff policy for transient node failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&NodeConfig::default())
    }
}

impl RetryPolicy {
    /// Create a new retry policy with custom parameters
    pub fn new(max_attempts: usize, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &NodeConfig) -> Self {
        Self::new(config.max_retries, config.retry_delay, config.max_retry_delay)
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or the attempts run out
    pub async fn execute<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut delay = self.base_delay;
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}", operation_name, attempt);
                    }
                    return Ok(result);
                }
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let jitter = delay.as_millis() as f64 * 0.1 * rand::rng().random::<f64>();
                    let sleep_for = delay + Duration::from_millis(jitter as u64);
                    warn!(
                        "{} failed on attempt {}: {}. Retrying in {:?}",
                        operation_name, attempt, e, sleep_for
                    );
                    tokio::time::sleep(sleep_for).await;
                    delay = std::cmp::min(delay * 2, self.max_delay);
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!("{} failed after {} attempts: {}", operation_name, attempt, e);
                    } else {
                        debug!("{} failed with non-retryable error: {}", operation_name, e);
                    }
                    return Err(e);
                }
            }
        }
    }
}
