//! Exponential backoff policy for retryable model failures.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adapters::ModelError;

/// Retry policy for refinement calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay after the first failed attempt in milliseconds
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Upper bound for any single delay in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}
fn default_base_delay() -> u64 {
    2000
}
fn default_max_delay() -> u64 {
    60000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

impl RetryPolicy {
    /// Attempt budget, never below one
    pub fn effective_max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay after the given failed attempt (1-indexed): base × 2^(attempt-1), capped
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// Delay before retrying after `error`; honours a server-provided
    /// Retry-After when it asks for longer than the backoff.
    pub fn delay_for_error(&self, attempt: u32, error: &ModelError) -> Duration {
        let backoff = self.delay_after_attempt(attempt);
        match error.retry_after() {
            Some(hint) => backoff.max(hint).min(Duration::from_millis(self.max_delay_ms)),
            None => backoff,
        }
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.effective_max_attempts()
    }
}
