//! Retry-with-backoff combinators and call timeouts.
//!
//! Operations report a tagged [`Attempt`] instead of throwing: `Transient` outcomes are
//! retried after the policy's delay, `Fatal` ones end the loop immediately.

use std::future::Future;
use std::time::Duration;

use crate::error::{DispatchError, DispatchResult};

/// Outcome of a single attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Attempt<T, E> {
    Success(T),
    Transient(E),
    Fatal(E),
}

impl<T> Attempt<T, DispatchError> {
    /// Tag a result using [`DispatchError::is_transient`].
    pub fn classify(result: DispatchResult<T>) -> Self {
        match result {
            Ok(value) => Attempt::Success(value),
            Err(err) if err.is_transient() => Attempt::Transient(err),
            Err(err) => Attempt::Fatal(err),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Same delay between every attempt.
    Fixed,
    /// Delay doubles after each attempt, capped at `cap`.
    Exponential { cap: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub strategy: BackoffStrategy,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            strategy: BackoffStrategy::Fixed,
        }
    }

    pub fn exponential(max_attempts: u32, backoff: Duration, cap: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            strategy: BackoffStrategy::Exponential { cap },
        }
    }

    /// Delay to wait after the failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.strategy {
            BackoffStrategy::Fixed => self.backoff,
            BackoffStrategy::Exponential { cap } => {
                let exponent = attempt.saturating_sub(1).min(16);
                self.backoff.saturating_mul(1u32 << exponent).min(cap)
            }
        }
    }
}

impl Default for RetryPolicy {
    /// Three attempts, one second apart.
    fn default() -> Self {
        Self::fixed(3, Duration::from_secs(1))
    }
}

/// Why a retried operation gave up.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryError<E> {
    /// Every attempt failed transiently; holds the last error.
    Exhausted { attempts: u32, last: E },
    /// An attempt failed in a way retrying cannot fix.
    Fatal { attempts: u32, error: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Fatal { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Fatal { error, .. } => error,
        }
    }
}

/// Run `op` until it succeeds, fails fatally, or `policy.max_attempts` is reached.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Attempt::Success(value) => return Ok(value),
            Attempt::Fatal(error) => {
                tracing::warn!(
                    operation = label,
                    attempt,
                    error = %error,
                    "giving up on fatal error"
                );
                return Err(RetryError::Fatal {
                    attempts: attempt,
                    error,
                });
            }
            Attempt::Transient(error) => {
                if attempt >= policy.max_attempts {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: error,
                    });
                }
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    operation = label,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Bound `future` by `timeout`; elapsing turns into a transient [`DispatchError::Timeout`].
pub async fn with_timeout<T, Fut>(
    operation: &'static str,
    timeout: Duration,
    future: Fut,
) -> DispatchResult<T>
where
    Fut: Future<Output = DispatchResult<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(DispatchError::Timeout { operation, timeout }),
    }
}
