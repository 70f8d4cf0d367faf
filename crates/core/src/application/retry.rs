// Retry logic for startup-critical broker operations
use crate::error::{AppError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the given delay
    Retry(Duration),
    /// Do not retry, the operation has failed permanently
    GiveUp,
}

/// Bounded exponential backoff
///
/// delay = base_delay * (factor ^ attempt) * jitter, capped at `max_delay`,
/// for at most `max_attempts` retries after the first try.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base_delay_ms: u64,
    factor: f64,
    max_delay_ms: u64,
    max_attempts: u32,
}

impl BackoffPolicy {
    /// Create a new backoff policy
    ///
    /// # Arguments
    /// * `base_delay_ms` - Delay before the first retry
    /// * `max_attempts` - Retries after the initial attempt (0 = fail fast)
    pub fn new(base_delay_ms: u64, max_attempts: u32) -> Self {
        Self {
            base_delay_ms,
            factor: 2.0,
            max_delay_ms: 30_000,
            max_attempts,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay_ms = max_delay.as_millis() as u64;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide what to do after `attempt` failures (0-based).
    ///
    /// Jitter is ±10% and derived from `seed` so it is deterministic per
    /// operation while still spreading concurrent reconnects apart.
    pub fn decide(&self, attempt: u32, seed: &str) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }

        let raw = self.base_delay_ms as f64 * self.factor.powi(attempt as i32);
        let jitter_seed = seed.bytes().map(u32::from).sum::<u32>().wrapping_add(attempt);
        let jitter_factor = 0.9 + ((jitter_seed % 21) as f64 / 100.0); // 0.9 to 1.1

        let delay_ms = ((raw * jitter_factor) as u64).min(self.max_delay_ms);
        RetryDecision::Retry(Duration::from_millis(delay_ms))
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out.
    ///
    /// Only transient errors (see [`AppError::is_transient`]) are retried.
    pub async fn retry<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(operation, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => match self.decide(attempt, operation) {
                    RetryDecision::Retry(delay) => {
                        warn!(
                            operation,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Operation failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    RetryDecision::GiveUp => {
                        warn!(operation, attempts = attempt + 1, error = %e, "Giving up");
                        return Err(e);
                    }
                },
            }
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(
            crate::application::worker::constants::DEFAULT_RETRY_BASE_DELAY_MS,
            crate::application::worker::constants::DEFAULT_CONNECT_RETRIES,
        )
    }
}
