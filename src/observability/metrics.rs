//! Metrics collection and exposition.
//!
//! # Metrics
//! - `upstream_calls_total` (counter): outcomes by dependency, outcome
//! - `upstream_call_duration_seconds` (histogram): attempt latency by dependency
//! - `upstream_retries_total` (counter): backoff waits by dependency
//! - `upstream_breaker_state` (gauge): 0=closed, 1=open, 2=half_open
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; it is a no-op until an
//!   exporter is installed
//! - Prometheus exporter serves its own scrape endpoint

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::observability::recorder::OutcomeKind;
use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus exporter listening on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    ::metrics::describe_counter!("upstream_calls_total", "Call outcomes per dependency");
    ::metrics::describe_histogram!(
        "upstream_call_duration_seconds",
        ::metrics::Unit::Seconds,
        "Attempt latency per dependency"
    );
    ::metrics::describe_counter!("upstream_retries_total", "Retry backoff waits per dependency");
    ::metrics::describe_gauge!(
        "upstream_breaker_state",
        "Circuit breaker state (0=closed, 1=open, 2=half_open)"
    );

    tracing::info!(address = %addr, "Prometheus exporter listening");
    Ok(())
}

pub fn record_outcome(dependency: &str, outcome: OutcomeKind, latency: Option<Duration>) {
    ::metrics::counter!(
        "upstream_calls_total",
        "dependency" => dependency.to_string(),
        "outcome" => outcome.as_str(),
    )
    .increment(1);

    if let Some(latency) = latency {
        ::metrics::histogram!(
            "upstream_call_duration_seconds",
            "dependency" => dependency.to_string(),
        )
        .record(latency.as_secs_f64());
    }
}

pub fn record_retry(dependency: &str) {
    ::metrics::counter!("upstream_retries_total", "dependency" => dependency.to_string()).increment(1);
}

pub fn record_breaker_state(dependency: &str, state: CircuitState) {
    ::metrics::gauge!("upstream_breaker_state", "dependency" => dependency.to_string())
        .set(f64::from(state as u8));
}
