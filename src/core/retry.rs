//! Retry policy evaluation for step invocations.
//!
//! A policy only answers two questions for a given attempt number: should the
//! step be tried again, and how long to wait first. It never touches a clock,
//! so the same attempt always produces the same decision on replay.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::OptionsError;

/// Retry policy for failed step attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Upper bound for any single delay in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    100_000
} // 100 * initial
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

/// Outcome of evaluating a policy after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    /// Whether another attempt should be made
    pub retry: bool,

    /// How long to wait before that attempt
    pub delay: Duration,
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Check the policy invariants
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.max_attempts < 1 {
            return Err(OptionsError::ZeroAttempts);
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(OptionsError::Backoff(self.backoff_multiplier));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(OptionsError::DelayBounds {
                initial_ms: self.initial_delay_ms,
                max_ms: self.max_delay_ms,
            });
        }
        Ok(())
    }

    /// Calculate delay after a failed attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);

        // NaN and infinity both collapse to the cap
        let capped = if delay.is_finite() {
            delay.max(0.0).min(self.max_delay_ms as f64)
        } else {
            self.max_delay_ms as f64
        };
        Duration::from_millis(capped as u64)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Decide what to do after attempt `attempt` failed transiently
    pub fn next_decision(&self, attempt: u32) -> RetryDecision {
        RetryDecision {
            retry: self.should_retry(attempt),
            delay: self.delay_for_attempt(attempt),
        }
    }
}
