//! Bounded retry loops shared by the fetcher and the batch loader.
//!
//! Attempts are counted from 1. The delay slept after failed attempt `n` is
//! given by [`RetryPolicy::delay_after`]; no delay follows the final attempt.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// How the pause between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `base * 2^(n-1)` after failed attempt `n`.
    Exponential { base: Duration },
    /// The same pause after every failed attempt.
    Fixed(Duration),
}

/// Attempt bound plus backoff shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Exponential backoff starting at one second.
    pub fn exponential(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential {
                base: Duration::from_secs(1),
            },
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed(delay),
        }
    }

    /// Pause to sleep after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Exponential { base } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                base.saturating_mul(factor)
            }
            Backoff::Fixed(delay) => delay,
        }
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// A successful value and the attempt that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

/// The last error after the loop gave up.
#[derive(Debug, Clone, PartialEq)]
pub struct Exhausted<E> {
    pub error: E,
    pub attempts: u32,
}

/// Run `operation` until it succeeds, a non-retryable error occurs, or the
/// policy's attempt bound is reached.
///
/// `operation` receives the 1-based attempt number. Failures are logged with
/// `label` so per-entity and per-batch retries can be told apart.
pub async fn with_retry<F, Fut, T, E, R>(
    policy: &RetryPolicy,
    label: &str,
    is_retryable: R,
    mut operation: F,
) -> Result<Retried<T>, Exhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    R: Fn(&E) -> bool,
{
    let max = policy.attempts();
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => {
                return Ok(Retried {
                    value,
                    attempts: attempt,
                });
            }
            Err(error) => {
                if attempt >= max || !is_retryable(&error) {
                    tracing::warn!(
                        target_label = label,
                        attempt,
                        max,
                        error = %error,
                        "Giving up"
                    );
                    return Err(Exhausted {
                        error,
                        attempts: attempt,
                    });
                }
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    target_label = label,
                    attempt,
                    max,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
