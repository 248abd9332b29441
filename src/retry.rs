//! Bounded retry with exponential backoff and jitter
//!
//! Used for every read against the cluster API. All errors are treated as
//! retriable; cancellation aborts both the in-flight attempt and any pending
//! backoff sleep.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Error)]
pub enum RetryError<E: std::error::Error + 'static> {
    #[error("failed after {attempts} attempts, last error: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: E,
    },

    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

/// Backoff schedule: `initial_delay * factor^n`, each delay stretched by up to
/// `jitter` of itself
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_delay: Duration,
    pub factor: f64,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_delay: Duration::from_secs(1),
            factor: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        self.initial_delay.mul_f64(self.factor.powi(exponent))
    }

    fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let stretch = rand::rng().random_range(0.0..=self.jitter);
        base + base.mul_f64(stretch)
    }

    /// Run `op` until it succeeds, attempts run out, or `cancel` fires
    pub async fn run<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        E: std::error::Error + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let outcome = tokio::select! {
                outcome = op() => outcome,
                _ = cancel.cancelled() => {
                    return Err(RetryError::Cancelled { attempts: attempt });
                }
            };

            let error = match outcome {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if attempt >= attempts {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            let delay = self.jittered_delay(attempt);
            warn!(
                attempt,
                max_attempts = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Operation failed, retrying"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    return Err(RetryError::Cancelled { attempts: attempt });
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "retry_test.rs"]
mod tests;
