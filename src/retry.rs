//! Exponential backoff for retryable transport failures. The policy wraps
//! every HTTP call the transport makes; classification lives on
//! [`GitError::is_retryable`] so protocol and parse errors surface on the
//! first attempt.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::errors::GitError;

/// Backoff configuration: attempts, initial delay, growth factor, jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first (minimum 1).
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt.
    pub multiplier: f64,
    /// Add up to 50% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries; useful in tests and one-shot probes.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Run `op`, retrying while it returns a retryable error and attempts
    /// remain. The error from the final attempt is returned unchanged, so
    /// the original cause chain is preserved.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, GitError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GitError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut delay = self.initial_delay;

        for attempt in 1..=attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < attempts => {
                    let sleep_for = self.with_jitter(delay);
                    tracing::warn!(
                        attempt,
                        max_attempts = attempts,
                        delay_ms = sleep_for.as_millis() as u64,
                        error = %err,
                        "retrying after transient failure"
                    );
                    tokio::time::sleep(sleep_for).await;
                    delay = delay.mul_f64(self.multiplier);
                }
                Err(err) => return Err(err),
            }
        }
        unreachable!("loop always returns on the final attempt")
    }

    fn with_jitter(&self, delay: Duration) -> Duration {
        if !self.jitter {
            return delay;
        }
        let factor: f64 = rand::rng().random_range(1.0..1.5);
        delay.mul_f64(factor)
    }
}
