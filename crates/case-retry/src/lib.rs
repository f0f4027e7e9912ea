// SPDX-License-Identifier: MIT OR Apache-2.0
//! case-retry
//!
//! Exponential backoff with an optional `Retry-After` override, shared by
//! the submitter's transient-failure handling and the retry-queue sweep.
#![deny(unsafe_code)]

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff policy: `base * 2^(attempt-1)`, capped, with a bounded attempt
/// count.
///
/// Defaults match the enumerated environment variables `RETRY_BASE_MS`
/// (1000), `RETRY_CAP_MS` (16000), and `RETRY_MAX_ATTEMPTS` (5).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Base delay before the second attempt, in milliseconds.
    pub base_ms: u64,
    /// Maximum delay between attempts, in milliseconds.
    pub cap_ms: u64,
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_ms: 1000,
            cap_ms: 16_000,
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Builds a policy, consuming and returning `self` for each setter.
    pub fn new(base_ms: u64, cap_ms: u64, max_attempts: u32) -> Self {
        Self { base_ms, cap_ms, max_attempts }
    }

    /// The backoff delay before retrying after `attempt` (1-based: the
    /// delay returned here precedes attempt `attempt + 1`).
    pub fn compute_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let scaled = self.base_ms.saturating_mul(1u64.checked_shl(exponent).unwrap_or(u64::MAX));
        Duration::from_millis(scaled.min(self.cap_ms))
    }

    /// The delay to actually sleep before the next attempt: the computed
    /// backoff, unless the server's `Retry-After` is greater, in which
    /// case the server's value wins (honored verbatim).
    pub fn delay_honoring_retry_after(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let computed = self.compute_delay(attempt);
        match retry_after {
            Some(retry_after) if retry_after > computed => retry_after,
            _ => computed,
        }
    }

    /// `true` once `attempt` has reached `max_attempts`.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

/// The outcome of a retried async operation.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    /// The operation succeeded, possibly after one or more retries.
    Succeeded {
        /// The successful result.
        value: T,
        /// Total attempts made, including the successful one.
        attempts: u32,
    },
    /// The operation's error was classified non-retryable; it failed on
    /// the first attempt that returned it.
    NonRetryable {
        /// The terminal error.
        error: E,
        /// The attempt number it failed on.
        attempts: u32,
    },
    /// Retries were exhausted without success.
    Exhausted {
        /// The last error observed.
        error: E,
        /// Total attempts made.
        attempts: u32,
    },
}

/// Retries `attempt_fn` under `policy`, classifying each error with
/// `is_retryable` and extracting any server-supplied `Retry-After` with
/// `retry_after`.
///
/// Sleeps between attempts using `tokio::time::sleep`, so this must run on
/// a Tokio runtime.
pub async fn retry_async<T, E, F, Fut>(
    policy: &RetryPolicy,
    is_retryable: impl Fn(&E) -> bool,
    retry_after: impl Fn(&E) -> Option<Duration>,
    mut attempt_fn: F,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match attempt_fn(attempt).await {
            Ok(value) => return RetryOutcome::Succeeded { value, attempts: attempt },
            Err(error) => {
                if !is_retryable(&error) {
                    return RetryOutcome::NonRetryable { error, attempts: attempt };
                }
                if policy.is_exhausted(attempt) {
                    return RetryOutcome::Exhausted { error, attempts: attempt };
                }
                let delay = policy.delay_honoring_retry_after(attempt, retry_after(&error));
                tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, "retrying after transient failure");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

impl<T: std::fmt::Debug, E: std::fmt::Debug> std::fmt::Display for RetryOutcome<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
