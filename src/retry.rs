//! Bounded retry with exponential backoff.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;

/// How many times a fallible call is attempted and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first try).
    pub max_attempts: u32,

    /// Delay before the second attempt, in milliseconds.
    pub initial_delay_ms: u64,

    /// Upper bound for any single delay, in milliseconds.
    pub max_delay_ms: u64,

    /// Delay multiplier applied after each retry.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            initial_delay_ms,
            ..Default::default()
        }
    }

    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self::new(1, 0)
    }

    /// Delay after the given failed attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::from_millis(self.initial_delay_ms.min(self.max_delay_ms));
        }

        let delay =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);
        let capped = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. The last error is returned.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && self.should_retry(attempt) => {
                    let delay = e
                        .retry_after()
                        .unwrap_or_else(|| self.delay_for_attempt(attempt));
                    warn!(
                        "{} attempt {}/{} failed, retrying in {:?}: {}",
                        label, attempt, self.max_attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    debug!("{} giving up after {} attempt(s): {}", label, attempt, e);
                    return Err(e);
                }
            }
        }
    }
}
