//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds >= 1, jitter within 0..=1)
//! - Validate bind addresses
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Pure function: GuardConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{BreakerSettings, GuardConfig, RetryConfig};
use crate::resilience::circuit_breaker::BreakerConfig;
use crate::resilience::retries::RetryPolicy;

/// A single semantic problem, located by its dotted field path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_breaker("breaker", &config.breaker, &mut errors);
    check_retries("retries", &config.retries, &mut errors);
    if config.timeouts.call_ms == 0 {
        errors.push(ValidationError::new("timeouts.call_ms", "must be greater than 0"));
    }

    for (key, dependency) in &config.dependencies {
        if key.trim().is_empty() {
            errors.push(ValidationError::new("dependencies", "dependency name must not be empty"));
        }
        let prefix = format!("dependencies.{key}");
        if let Some(breaker) = &dependency.breaker {
            check_breaker(&format!("{prefix}.breaker"), breaker, &mut errors);
        }
        if let Some(retries) = &dependency.retries {
            check_retries(&format!("{prefix}.retries"), retries, &mut errors);
        }
        if dependency.timeout_ms == Some(0) {
            errors.push(ValidationError::new(format!("{prefix}.timeout_ms"), "must be greater than 0"));
        }
    }

    if config.observability.metrics_enabled {
        check_address(
            "observability.metrics_address",
            &config.observability.metrics_address,
            &mut errors,
        );
    }
    if config.health.enabled {
        check_address("health.bind_address", &config.health.bind_address, &mut errors);
    }
    if config.health.api_key.as_deref().is_some_and(|k| k.trim().is_empty()) {
        errors.push(ValidationError::new("health.api_key", "must not be blank when set"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_breaker(prefix: &str, settings: &BreakerSettings, errors: &mut Vec<ValidationError>) {
    for problem in BreakerConfig::from(settings).problems() {
        errors.push(ValidationError::new(prefix, problem));
    }
}

fn check_retries(prefix: &str, config: &RetryConfig, errors: &mut Vec<ValidationError>) {
    for problem in RetryPolicy::from(config).problems() {
        errors.push(ValidationError::new(prefix, problem));
    }
}

fn check_address(field: &str, address: &str, errors: &mut Vec<ValidationError>) {
    if address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(field, format!("invalid socket address '{address}'")));
    }
}
