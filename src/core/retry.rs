//! Retry policy configuration for tasks.
//!
//! Retries use exponential backoff with a fixed multiplier: the delay after
//! the failure of attempt `n` (0-indexed) is `backoff_base * 2^n`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Multiplier applied to the backoff delay after every failed attempt.
pub const BACKOFF_MULTIPLIER: u32 = 2;

/// Retry policy for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries, not including the initial attempt.
    /// `max_retries = 2` allows up to 3 attempts in total.
    pub max_retries: u32,

    /// Delay before the first retry. Later retries double it.
    #[serde(with = "serde_duration_ms")]
    pub backoff_base: Duration,
}

impl RetryPolicy {
    /// Create a policy with no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff_base: Duration::ZERO,
        }
    }

    /// Create an exponential backoff policy.
    ///
    /// # Arguments
    /// * `max_retries` - Maximum retries (not including the initial attempt)
    /// * `backoff_base` - Delay before the first retry
    pub fn exponential(max_retries: u32, backoff_base: Duration) -> Self {
        Self {
            max_retries,
            backoff_base,
        }
    }

    /// Check if retries are enabled.
    pub fn is_enabled(&self) -> bool {
        self.max_retries > 0
    }

    /// Total number of attempts this policy allows, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether a failure of attempt `attempt` (0-indexed) should be retried.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Delay to sleep after attempt `attempt` (0-indexed) failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = BACKOFF_MULTIPLIER.saturating_pow(attempt);
        self.backoff_base.saturating_mul(factor)
    }

    /// Sum of every backoff delay the policy can insert.
    pub fn total_backoff(&self) -> Duration {
        (0..self.max_retries)
            .map(|attempt| self.delay_for(attempt))
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

impl Default for RetryPolicy {
    /// Default policy: no retries.
    fn default() -> Self {
        Self::none()
    }
}

/// Serializes Duration as whole milliseconds.
mod serde_duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
