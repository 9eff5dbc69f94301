//! Bounded retry with exponential backoff and jitter.
//!
//! Only idempotent reads go through here. Errors are retried when
//! `AppError::is_retryable()` says so; every attempt is individually bounded
//! by a timeout so a hung call cannot stall the caller.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::{AppError, Result};

impl RetryPolicy {
    /// No retries, no sleeps. Useful for callers that manage their own loop.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Un-jittered delay before attempt `attempt + 1` (attempt is 1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let spread = self.jitter.min(1.0);
        let factor = rand::thread_rng().gen_range(1.0 - spread..=1.0 + spread);
        delay.mul_f64(factor).min(self.max_delay)
    }

    /// Runs `f` until it succeeds, returns a non-retryable error, or the
    /// attempt budget is spent.
    pub async fn run<T, F, Fut>(&self, operation: &str, call_timeout: Duration, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;
            let outcome = match timeout(call_timeout, f()).await {
                Ok(res) => res,
                Err(_) => Err(AppError::Timeout {
                    operation: operation.to_string(),
                    after_ms: call_timeout.as_millis() as u64,
                }),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    if attempt >= self.max_attempts {
                        warn!(operation, attempts = attempt, "[Retry] {operation} failed after {attempt} attempts: {err}");
                        return Err(err);
                    }

                    let delay = self.jittered(self.backoff(attempt));
                    debug!(
                        "[Retry] {operation} attempt {attempt}/{} failed ({err}), retrying in {}ms",
                        self.max_attempts,
                        delay.as_millis()
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}
