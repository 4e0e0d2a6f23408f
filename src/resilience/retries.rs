//! Retry policy.
//!
//! # Responsibilities
//! - Describe how many attempts a call gets and how long to wait between them
//! - Validate policy values coming from configuration
//!
//! # Design Decisions
//! - Only transient failures and timeouts consume retry budget
//! - Permanent failures end the call on the attempt that produced them
//! - Jittered backoff prevents synchronized retry storms

use std::time::Duration;

use crate::config::schema::RetryConfig;

/// Retry behaviour for a single logical call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one (>= 1).
    pub max_attempts: u32,
    /// Delay before the second attempt, before jitter.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays (> 1).
    pub multiplier: f64,
    /// Fraction of the raw delay used as +/- jitter (0..=1).
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter_ratio: 0.2,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter_ratio(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = jitter_ratio;
        self
    }

    /// Check the policy's value ranges, returning a description of each problem.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.max_attempts == 0 {
            problems.push("max_attempts must be at least 1".to_string());
        }
        if !self.multiplier.is_finite() || self.multiplier <= 1.0 {
            problems.push(format!("multiplier must be a finite value > 1 (got {})", self.multiplier));
        }
        if !(0.0..=1.0).contains(&self.jitter_ratio) {
            problems.push(format!("jitter_ratio must be within 0..=1 (got {})", self.jitter_ratio));
        }
        if self.base_delay > self.max_delay {
            problems.push(format!(
                "base_delay ({:?}) must not exceed max_delay ({:?})",
                self.base_delay, self.max_delay
            ));
        }
        problems
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
            jitter_ratio: config.jitter_ratio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_valid() {
        assert!(RetryPolicy::default().problems().is_empty());
        assert!(RetryPolicy::no_retry().problems().is_empty());
    }

    #[test]
    fn test_invalid_values_reported_together() {
        let policy = RetryPolicy {
            max_attempts: 0,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(1),
            multiplier: 1.0,
            jitter_ratio: 1.5,
        };
        assert_eq!(policy.problems().len(), 4);
    }

    #[test]
    fn test_nan_multiplier_rejected() {
        let policy = RetryPolicy {
            multiplier: f64::NAN,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.problems().len(), 1);
    }

    #[test]
    fn test_from_config_defaults_match() {
        let policy = RetryPolicy::from(&RetryConfig::default());
        assert_eq!(policy, RetryPolicy::default());
    }
}
