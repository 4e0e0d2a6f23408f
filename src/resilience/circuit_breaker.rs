//! Circuit breaker for dependency protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency presumed unhealthy, calls fail fast
//! - Half-Open: probing recovery with a bounded number of trial calls
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures >= failure_threshold
//! Open → Half-Open: first allow() after recovery_timeout
//! Half-Open → Closed: half_open_successes_to_close trial successes
//! Half-Open → Open: any trial failure
//! ```
//!
//! # Design Decisions
//! - One breaker per dependency key, shared by every caller of that key
//! - All transitions happen under a single mutex
//! - A single failed probe reopens immediately
//! - Trial permits are tied to the half-open episode that issued them

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use crate::config::schema::BreakerSettings;
use crate::observability::metrics;

/// Breaker state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answer to "may I call the dependency now?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Breaker is closed.
    Proceed,
    /// Breaker is half-open and this call is one of the probes.
    ProceedAsTrial,
    /// Breaker is open, or half-open with every trial slot taken.
    Reject,
}

/// Breaker configuration. Immutable once the breaker is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time spent open before probing.
    pub recovery_timeout: Duration,
    /// Probe calls allowed in flight while half-open.
    pub half_open_max_concurrent_trials: u32,
    /// Successful probes needed to close again.
    pub half_open_successes_to_close: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_concurrent_trials: 1,
            half_open_successes_to_close: 1,
        }
    }
}

impl BreakerConfig {
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.failure_threshold == 0 {
            problems.push("failure_threshold must be at least 1".to_string());
        }
        if self.half_open_max_concurrent_trials == 0 {
            problems.push("half_open_max_concurrent_trials must be at least 1".to_string());
        }
        if self.half_open_successes_to_close == 0 {
            problems.push("half_open_successes_to_close must be at least 1".to_string());
        }
        problems
    }
}

impl From<&BreakerSettings> for BreakerConfig {
    fn from(settings: &BreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold,
            recovery_timeout: Duration::from_millis(settings.recovery_timeout_ms),
            half_open_max_concurrent_trials: settings.half_open_max_concurrent_trials,
            half_open_successes_to_close: settings.half_open_successes_to_close,
        }
    }
}

/// Returned when the breaker refuses a call.
#[derive(Debug, Clone, Error)]
#[error("circuit breaker for '{key}' is {state} ({consecutive_failures} consecutive failures)")]
pub struct CircuitOpenError {
    pub key: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Time left before the breaker will admit a probe, when open.
    pub retry_after: Option<Duration>,
}

/// Point-in-time copy of a breaker.
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    pub key: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub half_open_in_flight: u32,
    pub open_for: Option<Duration>,
    pub since_last_failure: Option<Duration>,
    pub config: BreakerConfig,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    opened_at: Option<Instant>,
    half_open_in_flight: u32,
    half_open_successes: u32,
    /// Bumped on every Open → Half-Open transition.
    episode: u64,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            opened_at: None,
            half_open_in_flight: 0,
            half_open_successes: 0,
            episode: 0,
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.half_open_in_flight = 0;
        self.half_open_successes = 0;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.half_open_in_flight = 0;
        self.half_open_successes = 0;
    }
}

type Transition = Option<(CircuitState, CircuitState)>;

/// Circuit breaker guarding one dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    key: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(key: impl Into<String>, config: BreakerConfig) -> Self {
        let key = key.into();
        metrics::record_breaker_state(&key, CircuitState::Closed);
        Self {
            key,
            config,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Ask whether a call may proceed.
    ///
    /// A `ProceedAsTrial` answer occupies a trial slot until the caller
    /// reports the outcome through [`on_success`](Self::on_success) or
    /// [`on_failure`](Self::on_failure) with `trial = true`.
    pub fn allow(&self) -> Decision {
        self.admit().0
    }

    /// Like [`allow`](Self::allow) but returns a permit that settles or
    /// releases its slot.
    pub fn acquire(self: &Arc<Self>) -> Result<CallPermit, CircuitOpenError> {
        match self.admit() {
            (Decision::Proceed, _) => Ok(CallPermit {
                breaker: self.clone(),
                trial_episode: None,
                settled: false,
            }),
            (Decision::ProceedAsTrial, episode) => Ok(CallPermit {
                breaker: self.clone(),
                trial_episode: Some(episode),
                settled: false,
            }),
            (Decision::Reject, _) => Err(self.rejection()),
        }
    }

    /// Report a successful call.
    pub fn on_success(&self, trial: bool) {
        let episode = trial.then(|| self.lock().episode);
        self.settle(true, episode);
    }

    /// Report a failed call.
    pub fn on_failure(&self, trial: bool) {
        let episode = trial.then(|| self.lock().episode);
        self.settle(false, episode);
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            key: self.key.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            half_open_in_flight: inner.half_open_in_flight,
            open_for: inner.opened_at.map(|t| t.elapsed()),
            since_last_failure: inner.last_failure_at.map(|t| t.elapsed()),
            config: self.config.clone(),
        }
    }

    /// Force the breaker closed.
    pub fn reset(&self) {
        let from = {
            let mut inner = self.lock();
            let from = inner.state;
            inner.close();
            inner.last_failure_at = None;
            from
        };
        tracing::info!(dependency = %self.key, from = %from, "Circuit breaker manually reset");
        if from != CircuitState::Closed {
            metrics::record_breaker_state(&self.key, CircuitState::Closed);
        }
    }

    fn admit(&self) -> (Decision, u64) {
        let (decision, episode, transition) = {
            let mut inner = self.lock();
            let mut transition: Transition = None;

            if inner.state == CircuitState::Open {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or(Duration::MAX);
                if elapsed < self.config.recovery_timeout {
                    return (Decision::Reject, inner.episode);
                }
                inner.state = CircuitState::HalfOpen;
                inner.episode += 1;
                inner.half_open_in_flight = 0;
                inner.half_open_successes = 0;
                transition = Some((CircuitState::Open, CircuitState::HalfOpen));
            }

            let decision = match inner.state {
                CircuitState::Closed => Decision::Proceed,
                CircuitState::HalfOpen
                    if inner.half_open_in_flight < self.config.half_open_max_concurrent_trials =>
                {
                    inner.half_open_in_flight += 1;
                    Decision::ProceedAsTrial
                }
                _ => Decision::Reject,
            };
            (decision, inner.episode, transition)
        };

        self.log_transition(transition);
        (decision, episode)
    }

    fn settle(&self, success: bool, trial_episode: Option<u64>) {
        let transition = {
            let mut inner = self.lock();
            let now = Instant::now();
            let current_trial = inner.state == CircuitState::HalfOpen
                && trial_episode == Some(inner.episode);

            if !success {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                inner.last_failure_at = Some(now);
            }

            match (inner.state, current_trial, success) {
                (CircuitState::HalfOpen, true, true) => {
                    inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                    inner.half_open_successes += 1;
                    if inner.half_open_successes >= self.config.half_open_successes_to_close {
                        inner.close();
                        Some((CircuitState::HalfOpen, CircuitState::Closed))
                    } else {
                        None
                    }
                }
                (CircuitState::HalfOpen, true, false) => {
                    // The Open invariant needs the count at threshold or above
                    inner.consecutive_failures =
                        inner.consecutive_failures.max(self.config.failure_threshold);
                    inner.open(now);
                    Some((CircuitState::HalfOpen, CircuitState::Open))
                }
                (CircuitState::Closed, _, true) => {
                    inner.consecutive_failures = 0;
                    None
                }
                (CircuitState::Closed, _, false)
                    if inner.consecutive_failures >= self.config.failure_threshold =>
                {
                    inner.open(now);
                    Some((CircuitState::Closed, CircuitState::Open))
                }
                // Late reports from calls admitted under an earlier state
                _ => None,
            }
        };

        self.log_transition(transition);
    }

    fn release_trial(&self, episode: u64) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen && inner.episode == episode {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }

    fn rejection(&self) -> CircuitOpenError {
        let inner = self.lock();
        let retry_after = match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened_at)) => {
                Some(self.config.recovery_timeout.saturating_sub(opened_at.elapsed()))
            }
            _ => None,
        };
        CircuitOpenError {
            key: self.key.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            retry_after,
        }
    }

    fn log_transition(&self, transition: Transition) {
        let Some((from, to)) = transition else {
            return;
        };
        match to {
            CircuitState::Open => tracing::warn!(
                dependency = %self.key,
                from = %from,
                to = %to,
                recovery_timeout = ?self.config.recovery_timeout,
                "Circuit breaker opened"
            ),
            _ => tracing::info!(
                dependency = %self.key,
                from = %from,
                to = %to,
                "Circuit breaker state changed"
            ),
        }
        metrics::record_breaker_state(&self.key, to);
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Admission ticket for one attempt.
///
/// Settle it with [`record_success`](Self::record_success) or
/// [`record_failure`](Self::record_failure). Dropping an unsettled trial
/// permit frees its half-open slot without counting a failure.
#[derive(Debug)]
pub struct CallPermit {
    breaker: Arc<CircuitBreaker>,
    trial_episode: Option<u64>,
    settled: bool,
}

impl CallPermit {
    pub fn is_trial(&self) -> bool {
        self.trial_episode.is_some()
    }

    pub fn record_success(mut self) {
        self.settled = true;
        self.breaker.settle(true, self.trial_episode);
    }

    pub fn record_failure(mut self) {
        self.settled = true;
        self.breaker.settle(false, self.trial_episode);
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(episode) = self.trial_episode {
            self.breaker.release_trial(episode);
        }
    }
}
