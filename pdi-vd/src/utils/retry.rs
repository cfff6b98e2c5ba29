//! Retry policy for external collaborator calls
//!
//! Exponential backoff with a per-attempt timeout. Only the synthesis call
//! suspends on external I/O, so this is the single place retries happen.
//!
//! **Backoff Strategy:**
//! - Initial delay: `initial_backoff_ms` (default 200ms)
//! - Max delay: `max_backoff_ms` (default 2000ms)
//! - Multiplier: `multiplier` (default 2.0)

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};

/// Reusable retry policy object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    /// Timeout applied to each individual attempt
    pub call_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 2000,
            multiplier: 2.0,
            call_timeout_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry.max_attempts must be >= 1".to_string());
        }
        if !(self.multiplier >= 1.0) {
            return Err("retry.multiplier must be >= 1.0".to_string());
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err("retry.initial_backoff_ms must not exceed retry.max_backoff_ms".to_string());
        }
        if self.call_timeout_ms == 0 {
            return Err("retry.call_timeout_ms must be >= 1".to_string());
        }
        Ok(())
    }

    /// Backoff before attempt `attempt + 1` (attempt is 1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let ms = (self.initial_backoff_ms as f64) * self.multiplier.powi(exp);
        Duration::from_millis(ms.min(self.max_backoff_ms as f64) as u64)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Errors that know whether another attempt could succeed
pub trait Retryable: Sized {
    fn is_retryable(&self) -> bool;

    /// Error representing an attempt that exceeded the call timeout
    fn timed_out(after: Duration) -> Self;
}

/// Final failure after the policy gave up
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub attempts: u32,
    pub error: E,
}

/// Run `operation` under `policy`, retrying retryable failures with backoff
///
/// Each attempt is bounded by the policy's call timeout. Non-retryable
/// errors return immediately.
pub async fn retry_with_backoff<F, Fut, T, E>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, RetryFailure<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let start_time = Instant::now();
    let call_timeout = policy.call_timeout();
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        if attempt > 1 {
            tracing::debug!(operation = operation_name, attempt, "Retrying external call");
        }

        let outcome = match tokio::time::timeout(call_timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(E::timed_out(call_timeout)),
        };

        match outcome {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "External call succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) => {
                if !err.is_retryable() {
                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        error = %err,
                        "External call failed with non-retryable error"
                    );
                    return Err(RetryFailure { attempts: attempt, error: err });
                }

                if attempt >= policy.max_attempts {
                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        error = %err,
                        "External call failed: retry attempts exhausted"
                    );
                    return Err(RetryFailure { attempts: attempt, error: err });
                }

                let backoff = policy.backoff_for(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "External call failed, will retry after backoff"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}
