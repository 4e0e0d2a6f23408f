//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Resilient caller and breakers produce:
//!     → logging.rs (structured log events)
//!     → recorder.rs (per-dependency counters, read by the health report)
//!     → metrics.rs (Prometheus counters, gauges, histograms)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - The dependency key is a field on every event and a label on every metric
//! - Metrics are cheap (sharded map updates, facade no-op without exporter)

pub mod logging;
pub mod metrics;
pub mod recorder;

pub use recorder::{FailureCounts, KeyMetrics, MetricsRecorder, OutcomeKind};
