//! Exponential-backoff retry driven by the error taxonomy.
//!
//! The wrapper knows nothing about what it retries. It asks the failure for
//! its [`ErrorCategory`](crate::ErrorCategory) and either sleeps
//! `base_delay * 2^attempt` or hands the original error straight back.

use std::{fmt::Display, future::Future, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::Classify;

/// Retry settings for a whole operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Delay slept after the failed attempt with zero-based index `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        backoff_delay(self.base_delay, attempt)
    }

    pub async fn run<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + Display,
    {
        retry_with_backoff(operation, self.max_retries, self.base_delay).await
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_secs(1))
    }
}

fn backoff_delay(base_delay: Duration, attempt: u32) -> Duration {
    base_delay.saturating_mul(2u32.saturating_pow(attempt))
}

/// Run `operation` until it succeeds, fails with a non-retryable category, or
/// `max_retries` retries have been spent.
///
/// The closure receives the zero-based attempt index. The returned error is
/// always the last failure, unchanged.
pub async fn retry_with_backoff<T, E, F, Fut>(
    mut operation: F,
    max_retries: u32,
    base_delay: Duration,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + Display,
{
    let mut attempt = 0u32;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let category = err.category();
                if !category.is_retryable() {
                    tracing::debug!(
                        category = %category,
                        "[RETRY] Non-retryable failure, giving up: {}",
                        err
                    );
                    return Err(err);
                }
                if attempt >= max_retries {
                    tracing::warn!(
                        attempts = attempt + 1,
                        category = %category,
                        "[RETRY] Retries exhausted: {}",
                        err
                    );
                    return Err(err);
                }

                let delay = backoff_delay(base_delay, attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    max_retries,
                    category = %category,
                    delay_ms = delay.as_millis() as u64,
                    "[RETRY] Retryable failure, backing off: {}",
                    err
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
