//! Resilience layer for calls to downstream dependencies.
//!
//! Wraps any unit of work (one network call) with a per-dependency circuit
//! breaker, per-attempt timeouts and bounded retry with jittered backoff.

pub mod config;
pub mod health;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::GuardConfig;
pub use lifecycle::Shutdown;
pub use observability::{KeyMetrics, MetricsRecorder};
pub use resilience::{
    BreakerConfig, BreakerRegistry, CallError, Classifier, FailureKind, ResilientCaller,
    RetryPolicy,
};
