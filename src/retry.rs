//! Bounded retry loop with exponential backoff and jitter.
//!
//! [`run_with_retries`] is the single place that decides retry versus
//! abort. Each failure goes through [`classify`]: fatal errors stop the
//! loop at once, retryable ones sleep and try again until the attempt
//! budget is spent.
//!
//! The delay after failed attempt `n` (1-based) is
//! `2^n * base_delay + uniform(0, max_jitter)`.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{classify, Classification, IngestError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_jitter: Duration::from_millis(config.max_jitter_ms),
        }
    }

    /// Deterministic part of the delay after failed attempt `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let multiplier = 2_u32.saturating_pow(attempt.min(20));
        self.base_delay.saturating_mul(multiplier)
    }

    /// Backoff plus uniform jitter in `[0, max_jitter]`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.backoff(attempt) + Duration::from_millis(jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Why the loop gave up.
#[derive(Debug, Clone)]
pub struct RetryFailure {
    pub error: IngestError,
    /// Attempts consumed, including the one that failed.
    pub attempts: u32,
    pub classification: Classification,
}

/// Drive `op` until it succeeds, fails fatally, or runs out of attempts.
///
/// `op` receives the 1-based attempt number. On success returns the value
/// and the number of attempts used.
pub async fn run_with_retries<T, F, Fut>(
    policy: &RetryPolicy,
    mut op: F,
) -> Result<(T, u32), RetryFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, IngestError>>,
{
    let max = policy.max_retries.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let err = match op(attempt).await {
            Ok(value) => return Ok((value, attempt)),
            Err(err) => err,
        };

        let classification = classify(&err);
        if !classification.is_retryable() {
            tracing::warn!(
                attempt,
                kind = err.kind.as_str(),
                error = %err,
                "fatal error, not retrying"
            );
            return Err(RetryFailure {
                error: err,
                attempts: attempt,
                classification,
            });
        }

        if attempt >= max {
            tracing::warn!(
                attempt,
                kind = err.kind.as_str(),
                error = %err,
                "retries exhausted"
            );
            return Err(RetryFailure {
                error: err,
                attempts: max,
                classification,
            });
        }

        let delay = policy.delay_for(attempt);
        tracing::info!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "attempt failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
