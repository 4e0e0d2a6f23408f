//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! ResilientCaller::call(key, work, timeout, policy, classifier):
//!     → registry.rs (breaker for key, created lazily)
//!     → circuit_breaker.rs (admit, or fail fast with CircuitOpen)
//!     → timeouts.rs (run the attempt with a deadline and cancellation)
//!     → classify.rs (transient or permanent)
//!     → circuit_breaker.rs + observability recorder (report outcome)
//!     → On transient failure: backoff.rs (jittered delay), next attempt
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every attempt has a deadline
//! - Only transient failures and timeouts are retried
//! - Circuit breaker prevents cascading failures
//! - Consumers inject the work unit and the classifier; the core knows no APIs

pub mod backoff;
pub mod caller;
pub mod circuit_breaker;
pub mod classify;
pub mod error;
pub mod registry;
pub mod retries;
pub mod timeouts;

pub use caller::{CallProfile, ResilientCaller};
pub use circuit_breaker::{
    BreakerConfig, BreakerSnapshot, CallPermit, CircuitBreaker, CircuitOpenError, CircuitState,
    Decision,
};
pub use classify::{AlwaysTransient, Classifier, FailureKind, HttpClassifier};
pub use error::{AttemptError, CallError, CallErrorKind};
pub use registry::BreakerRegistry;
pub use retries::RetryPolicy;
