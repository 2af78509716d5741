//! Bounded retry with exponential backoff for store-transient failures

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use super::error::{FundingError, FundingResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// No waiting between attempts; for tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    /// Backoff before retry number `retry` (1-based), capped at `max_delay`
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or the attempt budget is spent.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt_fn: F) -> FundingResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = FundingResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match attempt_fn().await {
                Err(err) if err.is_retryable() => {
                    if attempt >= self.max_attempts {
                        tracing::error!(
                            operation,
                            attempts = attempt,
                            error = %err,
                            "Giving up after repeated store failures"
                        );
                        return Err(FundingError::StoreUnavailable(format!(
                            "{} failed after {} attempts: {}",
                            operation,
                            attempt,
                            err.message()
                        )));
                    }

                    let delay = jittered(self.backoff(attempt));
                    tracing::warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient store failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

/// Up to +50% random spread so racing callers do not retry in lockstep
fn jittered(delay: Duration) -> Duration {
    if delay.is_zero() {
        return delay;
    }
    let spread = rand::thread_rng().gen_range(0.0..0.5);
    delay.mul_f64(1.0 + spread)
}
