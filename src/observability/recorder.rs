//! Per-dependency call metrics.
//!
//! # Responsibilities
//! - Count outcomes per dependency key
//! - Aggregate attempt latency (sum, count, max)
//! - Hand out point-in-time copies for the health report
//!
//! # Design Decisions
//! - One sharded map entry per key; writers to different keys never contend
//! - Snapshots are clones, never live references
//! - Every record is mirrored to the Prometheus facade

use std::collections::BTreeMap;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

use crate::observability::metrics;

/// Outcome of one attempt, or of a call that never got to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    TransientFailure,
    PermanentFailure,
    Timeout,
    CircuitRejected,
    Cancelled,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Success => "success",
            OutcomeKind::TransientFailure => "transient_failure",
            OutcomeKind::PermanentFailure => "permanent_failure",
            OutcomeKind::Timeout => "timeout",
            OutcomeKind::CircuitRejected => "circuit_rejected",
            OutcomeKind::Cancelled => "cancelled",
        }
    }

    /// Whether the dependency was actually called and answered (or hung).
    pub fn executed(&self) -> bool {
        !matches!(self, OutcomeKind::CircuitRejected | OutcomeKind::Cancelled)
    }
}

/// Failure counters broken down by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FailureCounts {
    pub transient: u64,
    pub permanent: u64,
    pub timeout: u64,
}

impl FailureCounts {
    pub fn total(&self) -> u64 {
        self.transient + self.permanent + self.timeout
    }
}

/// Aggregated metrics for one dependency.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyMetrics {
    /// Every recorded outcome, rejections and cancellations included.
    pub total_calls: u64,
    pub total_successes: u64,
    pub failures: FailureCounts,
    pub circuit_rejections: u64,
    pub cancellations: u64,
    pub latency_sum: Duration,
    pub latency_count: u64,
    pub latency_max: Duration,
}

impl KeyMetrics {
    pub fn total_failures(&self) -> u64 {
        self.failures.total()
    }

    pub fn avg_latency(&self) -> Option<Duration> {
        if self.latency_count == 0 {
            return None;
        }
        let nanos = self.latency_sum.as_nanos() / u128::from(self.latency_count);
        Some(Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)))
    }

    pub fn avg_latency_ms(&self) -> f64 {
        self.avg_latency().map(|d| d.as_nanos() as f64 / 1_000_000.0).unwrap_or(0.0)
    }

    fn apply(&mut self, kind: OutcomeKind, latency: Duration) {
        self.total_calls += 1;
        match kind {
            OutcomeKind::Success => self.total_successes += 1,
            OutcomeKind::TransientFailure => self.failures.transient += 1,
            OutcomeKind::PermanentFailure => self.failures.permanent += 1,
            OutcomeKind::Timeout => self.failures.timeout += 1,
            OutcomeKind::CircuitRejected => self.circuit_rejections += 1,
            OutcomeKind::Cancelled => self.cancellations += 1,
        }
        if kind.executed() {
            self.latency_sum += latency;
            self.latency_count += 1;
            self.latency_max = self.latency_max.max(latency);
        }
    }
}

/// Thread-safe per-key metrics store.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    inner: DashMap<String, KeyMetrics>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one outcome for `key`.
    ///
    /// `latency` is ignored for rejections and cancellations.
    pub fn record(&self, key: &str, kind: OutcomeKind, latency: Duration) {
        if let Some(mut entry) = self.inner.get_mut(key) {
            entry.apply(kind, latency);
        } else {
            self.inner.entry(key.to_string()).or_default().apply(kind, latency);
        }
        metrics::record_outcome(key, kind, kind.executed().then_some(latency));
    }

    /// Copy of the metrics for `key`, if anything was recorded for it.
    pub fn snapshot(&self, key: &str) -> Option<KeyMetrics> {
        self.inner.get(key).map(|m| m.clone())
    }

    pub fn snapshot_all(&self) -> BTreeMap<String, KeyMetrics> {
        self.inner
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Drop everything recorded for `key`.
    pub fn clear(&self, key: &str) {
        self.inner.remove(key);
    }
}
