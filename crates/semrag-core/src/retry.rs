//! Bounded retry with randomized exponential backoff
//!
//! Wraps calls to hosted endpoints. Only transient failures (see
//! [`SemragError::is_transient`]) are retried; everything else propagates on
//! the first attempt. After `max_attempts` the last error is surfaced inside
//! [`SemragError::RetriesExhausted`].

use crate::{Result, SemragError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Retry policy: attempt cap plus a randomized exponential wait
///
/// The wait before attempt `n + 1` is drawn uniformly from
/// `[initial_delay, min(max_delay, initial_delay * 2^(n-1))]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first call
    pub max_attempts: u32,

    /// Lower bound and growth unit of the wait, in milliseconds
    pub initial_delay_ms: u64,

    /// Upper bound of the wait, in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 20_000,
        }
    }
}

impl RetryPolicy {
    /// Create a policy
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: initial_delay.as_millis() as u64,
            max_delay_ms: max_delay.as_millis() as u64,
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self::immediate(1)
    }

    /// Retries without waiting between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Upper bound of the wait after `attempt` failed attempts (1-based)
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let grown = self.initial_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(grown.min(self.max_delay_ms))
    }

    /// Randomized wait after `attempt` failed attempts
    pub fn backoff<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let high = self.backoff_ceiling(attempt).as_millis() as u64;
        let low = self.initial_delay_ms.min(high);
        if low == high {
            return Duration::from_millis(high);
        }
        Duration::from_millis(rng.gen_range(low..=high))
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => e,
            };

            if attempt >= max_attempts {
                tracing::error!(
                    "{} failed after {} attempts: {}",
                    operation,
                    attempt,
                    err
                );
                return Err(SemragError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            let delay = self.backoff(attempt, &mut rand::thread_rng());
            tracing::warn!(
                "{} attempt {}/{} failed ({}), retrying in {:?}",
                operation,
                attempt,
                max_attempts,
                err,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}
