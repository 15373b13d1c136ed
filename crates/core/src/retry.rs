use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::context::CallContext;
use crate::error::IngestError;

/// Bounded exponential backoff with optional jitter.
///
/// `max_attempts` counts every attempt including the first one. The delay
/// after attempt `n` is `base_delay * 2^(n-1)`, capped at `max_delay`; with
/// jitter enabled the actual wait is drawn uniformly from `[delay/2, delay]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }

    /// A single attempt, nothing retried.
    pub fn none() -> Self {
        Self::new(1)
    }

    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Wait before attempt `attempt + 1`, where `attempt` is 1-based.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let delay = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max_delay);

        if !self.jitter || delay.is_zero() {
            return delay;
        }

        let max_ms = delay.as_millis().min(u128::from(u64::MAX)) as u64;
        let jittered = rand::thread_rng().gen_range(max_ms / 2..=max_ms);
        Duration::from_millis(jittered)
    }

    /// Drive `op` until it succeeds, fails permanently, or the budget runs
    /// out. Cancellation is checked before every attempt and during every
    /// backoff wait. The closure receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(
        &self,
        ctx: &CallContext,
        operation: &'static str,
        mut op: F,
    ) -> Result<T, IngestError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, IngestError>>,
    {
        let mut attempt = 1;
        loop {
            ctx.check()?;

            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !err.is_retryable() {
                debug!(operation, attempt, error = %err, "Permanent failure, not retrying");
                return Err(err);
            }

            if attempt >= self.max_attempts {
                warn!(operation, attempts = attempt, error = %err, "Retry budget exhausted");
                return Err(IngestError::RetriesExhausted {
                    operation,
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.backoff_delay(attempt);
            warn!(
                operation,
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient failure, backing off"
            );
            ctx.sleep(delay).await?;
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}
