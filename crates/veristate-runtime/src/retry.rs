//! Bounded retry with exponential backoff
//!
//! External calls fail transiently: throttling, timeouts, flaky networks.
//! The executor re-runs an operation up to a bounded attempt count, backing
//! off exponentially with random jitter so synchronized callers do not
//! hammer a recovering dependency in lockstep. Errors the caller classifies
//! as terminal stop the loop immediately.

use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How an error should steer the retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth another attempt
    Retryable,
    /// Retrying cannot help
    Terminal,
}

/// Backoff schedule for a retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each retry
    pub base_delay: Duration,
    /// Upper bound of the uniform jitter added to each delay
    pub jitter_bound: Duration,
}

impl RetryPolicy {
    /// Backoff delay after the `failed_attempts`-th failure, jitter included
    ///
    /// The deterministic part doubles per failure: `base * 2^(n-1)`.
    #[must_use]
    pub fn delay_after(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(16);
        let backoff = self.base_delay.saturating_mul(1u32 << exponent);
        let jitter_ms = self.jitter_bound.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        };
        backoff.saturating_add(jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            jitter_bound: Duration::from_millis(100),
        }
    }
}

/// Why a retried operation ultimately failed
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Cancelled before an attempt could complete
    #[error("cancelled before completion")]
    Cancelled,

    /// The operation returned an error classified as terminal
    #[error("terminal failure on attempt {attempts}: {source}")]
    Terminal {
        /// Attempts made, including the failing one
        attempts: u32,
        /// The terminal error
        source: E,
    },

    /// Every attempt failed with a retryable error
    #[error("retries exhausted after {attempts} attempt(s): {source}")]
    Exhausted {
        /// Attempts made
        attempts: u32,
        /// The last error observed
        source: E,
    },
}

impl<E> RetryError<E> {
    /// The underlying operation error, if any
    #[must_use]
    pub fn into_source(self) -> Option<E> {
        match self {
            Self::Cancelled => None,
            Self::Terminal { source, .. } | Self::Exhausted { source, .. } => Some(source),
        }
    }
}

/// Runs operations under a [`RetryPolicy`]
#[derive(Debug, Clone, Copy)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// Create an executor with the given policy
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// The executor's policy
    #[inline]
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, fails terminally, exhausts the attempt
    /// budget, or the token is cancelled
    ///
    /// `op` receives the 1-based attempt number. The token is checked before
    /// every attempt and raced against each backoff sleep, so a cancelled
    /// invocation stops without starting another attempt.
    ///
    /// # Errors
    /// See [`RetryError`].
    pub async fn run<T, E, F, Fut, C>(
        &self,
        token: &CancellationToken,
        classify: C,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        C: Fn(&E) -> ErrorClass,
        E: std::fmt::Display,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            if token.is_cancelled() {
                return Err(RetryError::Cancelled);
            }
            attempt += 1;
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(source) => {
                    if classify(&source) == ErrorClass::Terminal {
                        tracing::warn!(attempt, error = %source, "terminal failure, not retrying");
                        return Err(RetryError::Terminal {
                            attempts: attempt,
                            source,
                        });
                    }
                    if attempt >= max_attempts {
                        tracing::warn!(attempt, error = %source, "retry budget exhausted");
                        return Err(RetryError::Exhausted {
                            attempts: attempt,
                            source,
                        });
                    }
                    let delay = self.policy.delay_after(attempt);
                    tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %source,
                        "retrying after backoff");
                    tokio::select! {
                        () = token.cancelled() => return Err(RetryError::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}
