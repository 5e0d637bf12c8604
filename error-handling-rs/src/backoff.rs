//! # Backoff Policy
//!
//! Computes how long to wait before retrying a classified error. Delays grow
//! exponentially with the attempt number, carry a small random jitter and are
//! capped. Provider hints (a rate-limit reset time or an estimated recovery
//! time) take precedence over the exponential schedule.

use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::types::ClassifiedError;

/// Configuration for a backoff policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Growth factor between consecutive retries
    pub multiplier: f64,
    /// Cap on the exponential delay
    pub max_delay: Duration,
    /// Lower bound of the jitter fraction added to each delay
    pub min_jitter: f64,
    /// Upper bound of the jitter fraction added to each delay
    pub max_jitter: f64,
    /// Cap on a delay derived from a rate-limit reset time
    pub rate_limit_cap: Duration,
    /// Cap on a delay derived from an estimated recovery time
    pub recovery_cap: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            min_jitter: 0.1,
            max_jitter: 0.2,
            rate_limit_cap: Duration::from_secs(60),
            recovery_cap: Duration::from_secs(300),
        }
    }
}

impl BackoffConfig {
    /// Checks the invariants the delay computation relies on.
    ///
    /// `multiplier >= 1 + max_jitter` keeps delays monotonic in the attempt
    /// number even with the maximum jitter applied to the earlier attempt.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_delay.is_zero() {
            return Err("base_delay must be greater than zero".to_string());
        }
        if self.max_delay < self.base_delay {
            return Err("max_delay must not be smaller than base_delay".to_string());
        }
        if !(0.0..=1.0).contains(&self.min_jitter) || !(0.0..=1.0).contains(&self.max_jitter) {
            return Err("jitter fractions must be between 0.0 and 1.0".to_string());
        }
        if self.min_jitter > self.max_jitter {
            return Err("min_jitter must not exceed max_jitter".to_string());
        }
        if self.multiplier < 1.0 + self.max_jitter {
            return Err(format!(
                "multiplier must be at least {:.2} (1 + max_jitter)",
                1.0 + self.max_jitter
            ));
        }
        if self.recovery_cap < self.rate_limit_cap {
            return Err("recovery_cap must not be smaller than rate_limit_cap".to_string());
        }
        Ok(())
    }
}

/// Computes retry delays per error and attempt
#[derive(Debug, Clone, Default)]
pub struct BackoffPolicy {
    config: BackoffConfig,
}

impl BackoffPolicy {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// A policy with jitter disabled, for deterministic schedules
    pub fn without_jitter(mut config: BackoffConfig) -> Self {
        config.min_jitter = 0.0;
        config.max_jitter = 0.0;
        Self { config }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Delay before retrying `error` after failed attempt number `attempt` (1-based).
    ///
    /// Non-retryable errors always get zero.
    pub fn delay(&self, error: &ClassifiedError, attempt: u32) -> Duration {
        if !error.is_retryable() {
            return Duration::ZERO;
        }

        if let Some(reset) = error.reset_time() {
            return hint_delay(reset, self.config.rate_limit_cap);
        }

        if let Some(recovery) = error.estimated_recovery() {
            return hint_delay(recovery, self.config.recovery_cap);
        }

        self.exponential(attempt)
    }

    /// `base * multiplier^(attempt-1)` plus jitter, capped at `max_delay`
    pub fn exponential(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        let base_ms = self.config.base_delay.as_millis() as f64;
        let max_ms = self.config.max_delay.as_millis() as f64;

        let raw = base_ms * self.config.multiplier.powi(exponent.min(i32::MAX as u32) as i32);

        let jitter = if self.config.max_jitter > 0.0 {
            if self.config.max_jitter > self.config.min_jitter {
                rand::thread_rng().gen_range(self.config.min_jitter..self.config.max_jitter)
            } else {
                self.config.max_jitter
            }
        } else {
            0.0
        };

        // Jitter before the cap keeps the schedule monotonic once capped.
        let delay_ms = (raw * (1.0 + jitter)).min(max_ms).max(0.0);
        Duration::from_millis(delay_ms as u64)
    }
}

/// `min(hint - now, cap)`, never negative
fn hint_delay(hint: chrono::DateTime<Utc>, cap: Duration) -> Duration {
    let remaining = (hint - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    remaining.min(cap)
}

/// Whether `error` should be retried after failed attempt `attempt` out of
/// `max_attempts` total attempts.
pub fn should_retry(error: &ClassifiedError, attempt: u32, max_attempts: u32) -> bool {
    error.is_retryable() && attempt < max_attempts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ErrorDetails, ErrorKind};
    use chrono::Duration as ChronoDuration;

    fn config() -> BackoffConfig {
        BackoffConfig {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(1000),
            ..Default::default()
        }
    }

    #[test]
    fn test_backoff_calculation() {
        let policy = BackoffPolicy::without_jitter(config());
        let error = ClassifiedError::network("reset");

        assert_eq!(policy.delay(&error, 1), Duration::from_millis(10));
        assert_eq!(policy.delay(&error, 2), Duration::from_millis(20));
        assert_eq!(policy.delay(&error, 3), Duration::from_millis(40));
        assert_eq!(policy.delay(&error, 20), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = BackoffPolicy::new(config());
        let error = ClassifiedError::network("reset");

        for _ in 0..100 {
            let delay = policy.delay(&error, 1).as_millis();
            assert!((11..=12).contains(&delay), "delay {} out of range", delay);
        }
    }

    #[test]
    fn test_backoff_is_monotonic() {
        let policy = BackoffPolicy::new(config());

        for kind in ErrorKind::ALL {
            let error = ClassifiedError::new(
                match kind {
                    ErrorKind::Network => ErrorDetails::Network,
                    ErrorKind::Timeout => ErrorDetails::Timeout { timeout_ms: None },
                    _ => ErrorDetails::Unknown,
                },
                "transient",
            );
            for _ in 0..20 {
                let mut previous = Duration::ZERO;
                for attempt in 1..=12 {
                    let delay = policy.delay(&error, attempt);
                    assert!(delay >= previous, "attempt {} went backwards", attempt);
                    previous = delay;
                }
            }
        }
    }

    #[test]
    fn test_non_retryable_is_zero() {
        let policy = BackoffPolicy::new(config());
        let error = ClassifiedError::authentication("401 Unauthorized");

        for attempt in 1..5 {
            assert_eq!(policy.delay(&error, attempt), Duration::ZERO);
            assert!(!should_retry(&error, attempt, 10));
        }
    }

    #[test]
    fn test_should_retry_respects_max_attempts() {
        let error = ClassifiedError::network("reset");
        assert!(should_retry(&error, 1, 3));
        assert!(should_retry(&error, 2, 3));
        assert!(!should_retry(&error, 3, 3));
    }

    #[test]
    fn test_rate_limit_reset_hint() {
        let policy = BackoffPolicy::new(config());

        let soon = ClassifiedError::rate_limited(Some(Utc::now() + ChronoDuration::seconds(5)), "429");
        let delay = policy.delay(&soon, 1);
        assert!(delay <= Duration::from_secs(5));
        assert!(delay >= Duration::from_secs(4));

        let late = ClassifiedError::rate_limited(Some(Utc::now() + ChronoDuration::hours(1)), "429");
        assert_eq!(policy.delay(&late, 1), config().rate_limit_cap);

        let past = ClassifiedError::rate_limited(Some(Utc::now() - ChronoDuration::seconds(5)), "429");
        assert_eq!(policy.delay(&past, 1), Duration::ZERO);
    }

    #[test]
    fn test_recovery_hint_uses_larger_cap() {
        let policy = BackoffPolicy::new(config());
        let error = ClassifiedError::service_unavailable(
            Some(Utc::now() + ChronoDuration::hours(2)),
            "maintenance",
        );
        assert_eq!(policy.delay(&error, 1), config().recovery_cap);
    }

    #[test]
    fn test_config_validation() {
        assert!(BackoffConfig::default().validate().is_ok());

        let bad = BackoffConfig {
            multiplier: 1.1,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad = BackoffConfig {
            min_jitter: 0.3,
            max_jitter: 0.2,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
