//! Dependency health report.
//!
//! Joins breaker state with recorded call metrics into the shape the
//! health endpoint serves:
//!
//! ```text
//! {key: {state, consecutive_failures, total_calls, total_failures,
//!        circuit_rejections, avg_latency_ms}}
//! ```

use std::collections::BTreeMap;

use serde::Serialize;

use crate::observability::recorder::{KeyMetrics, MetricsRecorder};
use crate::resilience::circuit_breaker::{BreakerSnapshot, CircuitState};
use crate::resilience::registry::BreakerRegistry;

/// Health of one dependency.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DependencyHealth {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub circuit_rejections: u64,
    pub avg_latency_ms: f64,
}

impl DependencyHealth {
    fn from_parts(breaker: Option<&BreakerSnapshot>, metrics: Option<&KeyMetrics>) -> Self {
        let metrics = metrics.cloned().unwrap_or_default();
        Self {
            state: breaker.map(|b| b.state).unwrap_or(CircuitState::Closed),
            consecutive_failures: breaker.map(|b| b.consecutive_failures).unwrap_or(0),
            total_calls: metrics.total_calls,
            total_failures: metrics.total_failures(),
            circuit_rejections: metrics.circuit_rejections,
            avg_latency_ms: metrics.avg_latency_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    /// Every breaker is closed.
    Ok,
    /// At least one breaker is open or half-open.
    Degraded,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HealthReport {
    pub status: OverallStatus,
    pub dependencies: BTreeMap<String, DependencyHealth>,
}

impl HealthReport {
    pub fn unhealthy(&self) -> Vec<&str> {
        self.dependencies
            .iter()
            .filter(|(_, h)| h.state != CircuitState::Closed)
            .map(|(k, _)| k.as_str())
            .collect()
    }
}

/// Build a report covering every key known to the registry or the recorder.
pub fn build_report(registry: &BreakerRegistry, recorder: &MetricsRecorder) -> HealthReport {
    let breakers = registry.snapshot_all();
    let metrics = recorder.snapshot_all();

    let mut dependencies = BTreeMap::new();
    for key in breakers.keys().chain(metrics.keys()) {
        if dependencies.contains_key(key) {
            continue;
        }
        dependencies.insert(
            key.clone(),
            DependencyHealth::from_parts(breakers.get(key), metrics.get(key)),
        );
    }

    let degraded = dependencies.values().any(|h| h.state != CircuitState::Closed);
    HealthReport {
        status: if degraded { OverallStatus::Degraded } else { OverallStatus::Ok },
        dependencies,
    }
}
