//! Retry policies and backoff delays
//!
//! Delays are deterministic functions of the 0-based attempt index:
//!
//! ```text
//! linear:      min(max_delay, base_delay * (n + 1))
//! exponential: min(max_delay, base_delay * 2^n)
//! ```
//!
//! Both saturate instead of overflowing, so they are non-decreasing in `n`
//! and never exceed `max_delay`.

use crate::core::types::duration_ms;
use crate::core::PolicyError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the delay grows between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    Linear,
    Exponential,
}

/// Retry budget and backoff for one error code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (at least 1)
    pub max_attempts: u32,
    pub backoff_strategy: BackoffStrategy,
    /// Delay before the first retry
    #[serde(rename = "base_delay_ms", with = "duration_ms")]
    pub base_delay: Duration,
    /// Upper bound for any single delay
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_strategy: BackoffStrategy::Exponential,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
        }
    }
}

impl RetryPolicy {
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff_strategy: BackoffStrategy::Exponential,
            base_delay,
            max_delay,
        }
    }

    pub fn linear(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff_strategy: BackoffStrategy::Linear,
            base_delay,
            max_delay,
        }
    }

    /// Short delays and few attempts (for tests and interactive actions)
    pub fn aggressive() -> Self {
        Self::exponential(5, Duration::from_millis(10), Duration::from_secs(1))
    }

    /// Long delays for background refreshes against a struggling service
    pub fn conservative() -> Self {
        Self::exponential(5, Duration::from_secs(2), Duration::from_secs(60))
    }

    /// Check the policy invariants
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.max_attempts == 0 {
            return Err(PolicyError::ZeroAttempts);
        }
        if self.base_delay.is_zero() {
            return Err(PolicyError::ZeroBaseDelay);
        }
        if self.max_delay < self.base_delay {
            return Err(PolicyError::MaxBelowBase {
                base: self.base_delay,
                max: self.max_delay,
            });
        }
        Ok(())
    }

    /// Delay before the retry with 0-based index `attempt`
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let raw = match self.backoff_strategy {
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt.saturating_add(1)),
            BackoffStrategy::Exponential => 2u32
                .checked_pow(attempt)
                .and_then(|factor| self.base_delay.checked_mul(factor))
                .unwrap_or(Duration::MAX),
        };
        raw.min(self.max_delay)
    }

    /// Whether `attempts_so_far` still leaves room for another retry
    pub fn permits(&self, attempts_so_far: u32) -> bool {
        attempts_so_far < self.max_attempts
    }

    /// Full delay schedule for every permitted attempt
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_attempts).map(move |n| self.next_delay(n))
    }
}
