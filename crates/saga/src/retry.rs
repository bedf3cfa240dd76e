//! Retry policy for step execution.

use std::time::Duration;

/// Bounded exponential backoff applied to each step independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per step before the transaction is marked FAILED.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: u32,
    /// Deadline for a single executor call; exceeding it is retryable.
    pub step_timeout: Duration,
}

impl RetryPolicy {
    /// Delay before the next attempt, given how many attempts have failed.
    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1);
        let factor = self.multiplier.saturating_pow(exponent);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Returns true once `failed_attempts` has used up the budget.
    pub fn is_exhausted(&self, failed_attempts: u32) -> bool {
        failed_attempts >= self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            multiplier: 2,
            step_timeout: Duration::from_secs(5),
        }
    }
}
