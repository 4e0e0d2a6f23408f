//! Breaker registry.
//!
//! # Responsibilities
//! - Own one circuit breaker per dependency key
//! - Create breakers lazily on first use
//! - Hold per-key configuration overrides
//!
//! # Design Decisions
//! - Sharded map: lookups for unrelated keys never contend
//! - Explicitly constructed and shared via Arc, never a global

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::schema::GuardConfig;
use crate::resilience::circuit_breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker};

/// Maps dependency keys to their breakers.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    defaults: BreakerConfig,
    overrides: DashMap<String, BreakerConfig>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    /// Create a registry whose unconfigured keys use `defaults`.
    pub fn new(defaults: BreakerConfig) -> Self {
        Self {
            defaults,
            overrides: DashMap::new(),
            breakers: DashMap::new(),
        }
    }

    /// Build a registry from configuration, pre-registering every listed dependency.
    pub fn from_config(config: &GuardConfig) -> Self {
        let registry = Self::new(BreakerConfig::from(&config.breaker));
        for (key, dependency) in &config.dependencies {
            let breaker = dependency
                .breaker
                .as_ref()
                .map(BreakerConfig::from)
                .unwrap_or_else(|| registry.defaults.clone());
            registry.configure(key, breaker);
            registry.get(key);
        }
        registry
    }

    /// Set or override the configuration for `key`.
    ///
    /// Idempotent. If a breaker with a different configuration already
    /// exists it is replaced by a fresh, closed one.
    pub fn configure(&self, key: &str, config: BreakerConfig) {
        if self.overrides.get(key).is_some_and(|existing| *existing == config) {
            return;
        }
        self.overrides.insert(key.to_string(), config.clone());

        if let Some(mut existing) = self.breakers.get_mut(key) {
            if *existing.config() != config {
                tracing::info!(
                    dependency = %key,
                    failure_threshold = config.failure_threshold,
                    recovery_timeout = ?config.recovery_timeout,
                    "Replacing circuit breaker with new configuration"
                );
                *existing = Arc::new(CircuitBreaker::new(key, config));
            }
        }
    }

    /// Get the breaker for `key`, creating it on first use.
    pub fn get(&self, key: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(key) {
            return breaker.clone();
        }
        self.breakers
            .entry(key.to_string())
            .or_insert_with(|| {
                tracing::debug!(dependency = %key, "Creating circuit breaker");
                Arc::new(CircuitBreaker::new(key, self.config_for(key)))
            })
            .clone()
    }

    /// Get the breaker for `key` only if it already exists.
    pub fn find(&self, key: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(key).map(|b| b.clone())
    }

    /// Configuration a new breaker for `key` would use.
    pub fn config_for(&self, key: &str) -> BreakerConfig {
        self.overrides
            .get(key)
            .map(|c| c.clone())
            .unwrap_or_else(|| self.defaults.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.breakers.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn snapshot_all(&self) -> BTreeMap<String, BreakerSnapshot> {
        self.breakers
            .iter()
            .map(|e| (e.key().clone(), e.value().snapshot()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}
