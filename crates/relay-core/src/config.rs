//! Relay configuration (defaults, validation, environment overrides).

use std::time::Duration;

use chrono::TimeDelta;

use crate::domain::RetryPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("{var}={value:?} is not a valid value: {reason}")]
    Malformed {
        var: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Outbox dispatch loop settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub retry: RetryPolicy,
    /// Upper bound for one envelope's dispatch (all handlers). `None` disables it.
    pub dispatch_timeout: Option<Duration>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 10,
            retry: RetryPolicy::default(),
            dispatch_timeout: Some(Duration::from_secs(30)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MilestoneExpiryConfig {
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub emit_events: bool,
}

impl Default for MilestoneExpiryConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60 * 60),
            batch_size: 100,
            emit_events: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuotaActivationConfig {
    pub poll_interval: Duration,
    pub batch_size: usize,
    /// Length of the usage window opened by an activation.
    pub period_length: TimeDelta,
    /// Re-reads allowed when another pass changed the org's active quota first.
    pub max_conflict_retries: u32,
    pub emit_events: bool,
}

impl Default for QuotaActivationConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15 * 60),
            batch_size: 50,
            period_length: TimeDelta::days(30),
            max_conflict_retries: 3,
            emit_events: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecisionExpiryConfig {
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub deadline: TimeDelta,
    pub emit_events: bool,
}

impl Default for DecisionExpiryConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30 * 60),
            batch_size: 100,
            deadline: TimeDelta::hours(48),
            emit_events: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelayConfig {
    pub dispatch: DispatchConfig,
    pub milestone_expiry: MilestoneExpiryConfig,
    pub quota_activation: QuotaActivationConfig,
    pub decision_expiry: DecisionExpiryConfig,
}

impl RelayConfig {
    /// Defaults overridden by `RELAY_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`RelayConfig::from_env`] with an injectable lookup (tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };
        let mut config = Self::default();

        let dispatch = &mut config.dispatch;
        env.secs("RELAY_DISPATCH_POLL_INTERVAL_SECS", &mut dispatch.poll_interval)?;
        env.parse("RELAY_DISPATCH_BATCH_SIZE", &mut dispatch.batch_size)?;
        env.parse("RELAY_MAX_RETRY_ATTEMPTS", &mut dispatch.retry.max_attempts)?;
        env.millis("RELAY_BACKOFF_BASE_MS", &mut dispatch.retry.base_delay)?;
        env.parse("RELAY_BACKOFF_MULTIPLIER", &mut dispatch.retry.multiplier)?;
        if let Some(secs) = env.get::<u64>("RELAY_DISPATCH_TIMEOUT_SECS")? {
            // 0 は timeout 無効
            dispatch.dispatch_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        let milestone = &mut config.milestone_expiry;
        env.secs("RELAY_MILESTONE_POLL_INTERVAL_SECS", &mut milestone.poll_interval)?;
        env.parse("RELAY_MILESTONE_BATCH_SIZE", &mut milestone.batch_size)?;

        let quota = &mut config.quota_activation;
        env.secs("RELAY_QUOTA_POLL_INTERVAL_SECS", &mut quota.poll_interval)?;
        env.parse("RELAY_QUOTA_BATCH_SIZE", &mut quota.batch_size)?;
        if let Some(days) = env.get::<i64>("RELAY_QUOTA_PERIOD_DAYS")? {
            quota.period_length = TimeDelta::try_days(days).ok_or_else(|| {
                ConfigError::invalid("quota_period_days", "out of range")
            })?;
        }

        let decision = &mut config.decision_expiry;
        env.secs("RELAY_DECISION_POLL_INTERVAL_SECS", &mut decision.poll_interval)?;
        env.parse("RELAY_DECISION_BATCH_SIZE", &mut decision.batch_size)?;
        if let Some(hours) = env.get::<i64>("RELAY_DECISION_DEADLINE_HOURS")? {
            decision.deadline = TimeDelta::try_hours(hours).ok_or_else(|| {
                ConfigError::invalid("decision_deadline_hours", "out of range")
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.dispatch.retry.validate()?;
        if let Some(timeout) = self.dispatch.dispatch_timeout
            && timeout.is_zero()
        {
            return Err(ConfigError::invalid("dispatch_timeout", "must be greater than zero"));
        }

        let loops = [
            ("dispatch", self.dispatch.poll_interval, self.dispatch.batch_size),
            (
                "milestone_expiry",
                self.milestone_expiry.poll_interval,
                self.milestone_expiry.batch_size,
            ),
            (
                "quota_activation",
                self.quota_activation.poll_interval,
                self.quota_activation.batch_size,
            ),
            (
                "decision_expiry",
                self.decision_expiry.poll_interval,
                self.decision_expiry.batch_size,
            ),
        ];
        for (key, interval, batch_size) in loops {
            if interval.is_zero() {
                return Err(ConfigError::invalid(key, "poll interval must be greater than zero"));
            }
            if batch_size == 0 {
                return Err(ConfigError::invalid(key, "batch size must be at least 1"));
            }
        }

        if self.quota_activation.period_length <= TimeDelta::zero() {
            return Err(ConfigError::invalid("quota_period", "must be positive"));
        }
        if self.decision_expiry.deadline <= TimeDelta::zero() {
            return Err(ConfigError::invalid("decision_deadline", "must be positive"));
        }
        Ok(())
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn get<T>(&self, var: &str) -> Result<Option<T>, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        let Some(raw) = (self.lookup)(var) else {
            return Ok(None);
        };
        raw.trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Malformed {
                var: var.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            })
    }

    fn parse<T>(&self, var: &str, slot: &mut T) -> Result<(), ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(value) = self.get(var)? {
            *slot = value;
        }
        Ok(())
    }

    fn secs(&self, var: &str, slot: &mut Duration) -> Result<(), ConfigError> {
        if let Some(secs) = self.get::<u64>(var)? {
            *slot = Duration::from_secs(secs);
        }
        Ok(())
    }

    fn millis(&self, var: &str, slot: &mut Duration) -> Result<(), ConfigError> {
        if let Some(ms) = self.get::<u64>(var)? {
            *slot = Duration::from_millis(ms);
        }
        Ok(())
    }
}
