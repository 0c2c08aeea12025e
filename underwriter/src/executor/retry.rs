//! Bounded retry with exponential backoff and jitter.
//!
//! Only retryable stage errors (timeouts, throttling, transient transport)
//! go through here; validation and definition errors propagate immediately.
//! The reference system left its retry behavior to platform defaults, so the
//! curve is a configurable parameter rather than a fixed constant.

use crate::errors::StageError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Retry policy for retryable stage failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the initial call.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Base delay in milliseconds; doubles per attempt.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Delay cap in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Whether to apply full jitter to each delay.
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_max_attempts() -> usize {
    3
}

fn default_base_delay_ms() -> u64 {
    250
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_jitter() -> bool {
    true
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the total attempt count.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, ms: u64) -> Self {
        self.base_delay_ms = ms;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub fn with_max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }

    /// Disables jitter, making delays deterministic.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// The delay before retrying after the given zero-indexed attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(u32::try_from(attempt).unwrap_or(u32::MAX)));
        let capped = exp.min(self.max_delay_ms);

        let millis = if self.jitter && capped > 0 {
            rand::thread_rng().gen_range(0..=capped)
        } else {
            capped
        };

        Duration::from_millis(millis)
    }
}

/// Runs an operation, retrying retryable errors with backoff until the
/// policy's attempts are exhausted. The final error propagates unchanged.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    stage: &str,
    mut operation: F,
) -> Result<T, StageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StageError>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::debug!(
                    stage,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying stage after transient failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
