//! Retry policy: decides backoff delays and the dead-letter threshold.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::config::ConfigError;

/// Retry policy for failed dispatches.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failure.
    pub base_delay: Duration,

    /// Backoff multiplier. Must be > 1.0 so delays strictly increase.
    pub multiplier: f64,

    /// Failures allowed before the envelope is dead-lettered.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_retry_attempts", "must be at least 1"));
        }
        if self.base_delay.is_zero() {
            return Err(ConfigError::invalid("backoff_base", "must be greater than zero"));
        }
        if !self.multiplier.is_finite() || self.multiplier <= 1.0 {
            return Err(ConfigError::invalid(
                "backoff_multiplier",
                "must be a finite number greater than 1.0",
            ));
        }
        Ok(())
    }

    /// Delay before the next attempt, given the number of failures so far
    /// (1-indexed): `base_delay * multiplier^(failures - 1)`.
    ///
    /// Example with base_delay=2s, multiplier=2.0:
    /// - failure 1: 2s
    /// - failure 2: 4s
    /// - failure 3: 8s
    pub fn next_delay(&self, failures: u32) -> Duration {
        let exponent = i32::try_from(failures.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(delay_secs).unwrap_or(Duration::MAX)
    }

    /// `now + next_delay(failures)`, saturating at the representable maximum.
    pub fn next_retry_at(&self, now: DateTime<Utc>, failures: u32) -> DateTime<Utc> {
        let delay = TimeDelta::from_std(self.next_delay(failures)).unwrap_or(TimeDelta::MAX);
        now.checked_add_signed(delay)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// この失敗で dead-letter に移すべきか
    pub fn is_exhausted(&self, failures: u32) -> bool {
        failures >= self.max_attempts
    }
}
