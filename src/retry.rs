//! Bounded exponential-backoff retry for external service calls.
//!
//! Both the LLM providers and the retrieval client wrap their single-shot
//! request functions in [`RetryPolicy::run`]. Only errors classified as
//! transient by the caller are retried; everything else is returned on the
//! first attempt.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Default number of attempts (first try included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay for exponential backoff in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// Retry policy for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one. Always at least 1.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for every further attempt.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given attempt count and base delay.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Backoff delay before attempt `attempt` (0-based). Attempt 0 has no delay.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        // 1x, 2x, 4x, ... capped to avoid shift overflow
        let factor = 1u32 << (attempt - 1).min(16);
        self.base_delay.saturating_mul(factor)
    }

    /// Longest a call under this policy can take when every attempt runs
    /// into `attempt_timeout`: all attempts plus the backoff between them.
    pub fn worst_case_duration(&self, attempt_timeout: Duration) -> Duration {
        let attempts = self.max_attempts.max(1);
        (1..attempts).fold(attempt_timeout.saturating_mul(attempts), |total, attempt| {
            total.saturating_add(self.delay_for(attempt))
        })
    }

    /// Runs `op` until it succeeds, fails with a non-transient error, or the
    /// attempt budget is exhausted. The last error is returned on exhaustion.
    pub async fn run<T, E, F, Fut, P>(&self, label: &str, is_transient: P, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            let delay = self.delay_for(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
                tracing::debug!(
                    call = label,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after transient failure"
                );
            }

            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !is_transient(&err) || attempt + 1 >= max_attempts {
                        return Err(err);
                    }
                    tracing::warn!(
                        call = label,
                        attempt = attempt + 1,
                        max_attempts = max_attempts,
                        error = %err,
                        "Transient error, will retry"
                    );
                    attempt += 1;
                }
            }
        }
    }
}
