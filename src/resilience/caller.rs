//! Resilient caller.
//!
//! # Responsibilities
//! - Gate each attempt through the dependency's circuit breaker
//! - Bound each attempt with a timeout and the caller's cancellation token
//! - Classify failures and retry transient ones with jittered backoff
//! - Report every attempt to the breaker and the metrics recorder
//!
//! # Design Decisions
//! - Runs on the consumer's task; no internal pool
//! - A rejected call consumes no attempt and does not touch breaker state
//! - Cancellation is never retried and never counts as a breaker failure

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::schema::GuardConfig;
use crate::observability::metrics;
use crate::observability::recorder::{MetricsRecorder, OutcomeKind};
use crate::resilience::backoff::calculate_backoff_with_rng;
use crate::resilience::classify::{Classifier, FailureKind};
use crate::resilience::error::{AttemptError, CallError};
use crate::resilience::registry::BreakerRegistry;
use crate::resilience::retries::RetryPolicy;
use crate::resilience::timeouts::{run_bounded, sleep_cancellable, Bounded};

/// Timeout and retry policy for one dependency.
#[derive(Debug, Clone, PartialEq)]
pub struct CallProfile {
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for CallProfile {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

/// Executes work units against dependencies with breaker, timeout and retry.
#[derive(Debug)]
pub struct ResilientCaller {
    registry: Arc<BreakerRegistry>,
    recorder: Arc<MetricsRecorder>,
    defaults: CallProfile,
    profiles: DashMap<String, CallProfile>,
    rng: Mutex<StdRng>,
}

impl ResilientCaller {
    pub fn new(registry: Arc<BreakerRegistry>, recorder: Arc<MetricsRecorder>) -> Self {
        Self {
            registry,
            recorder,
            defaults: CallProfile::default(),
            profiles: DashMap::new(),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Build a caller, its registry and its recorder from configuration.
    pub fn from_config(config: &GuardConfig) -> Self {
        let registry = Arc::new(BreakerRegistry::from_config(config));
        let recorder = Arc::new(MetricsRecorder::new());
        let defaults = CallProfile {
            timeout: Duration::from_millis(config.timeouts.call_ms),
            retry: RetryPolicy::from(&config.retries),
        };

        let caller = Self::new(registry, recorder).with_defaults(defaults.clone());
        for (key, dependency) in &config.dependencies {
            caller.set_profile(
                key,
                CallProfile {
                    timeout: dependency
                        .timeout_ms
                        .map(Duration::from_millis)
                        .unwrap_or(defaults.timeout),
                    retry: dependency
                        .retries
                        .as_ref()
                        .map(RetryPolicy::from)
                        .unwrap_or_else(|| defaults.retry.clone()),
                },
            );
        }
        caller
    }

    pub fn with_defaults(mut self, defaults: CallProfile) -> Self {
        self.defaults = defaults;
        self
    }

    /// Seed the jitter generator, making retry timing reproducible.
    pub fn with_rng_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    pub fn set_profile(&self, key: &str, profile: CallProfile) {
        self.profiles.insert(key.to_string(), profile);
    }

    /// Profile used by [`call_profiled`](Self::call_profiled) for `key`.
    pub fn profile(&self, key: &str) -> CallProfile {
        self.profiles
            .get(key)
            .map(|p| p.clone())
            .unwrap_or_else(|| self.defaults.clone())
    }

    pub fn registry(&self) -> &Arc<BreakerRegistry> {
        &self.registry
    }

    pub fn recorder(&self) -> &Arc<MetricsRecorder> {
        &self.recorder
    }

    /// Call `key` using its configured profile.
    pub async fn call_profiled<T, E, F, Fut, C>(
        &self,
        key: &str,
        work: F,
        classifier: &C,
    ) -> Result<T, CallError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Classifier<E> + ?Sized,
        E: std::fmt::Display,
    {
        let profile = self.profile(key);
        self.call(key, work, profile.timeout, &profile.retry, classifier).await
    }

    /// Call `key` with an explicit timeout and retry policy.
    pub async fn call<T, E, F, Fut, C>(
        &self,
        key: &str,
        work: F,
        timeout: Duration,
        policy: &RetryPolicy,
        classifier: &C,
    ) -> Result<T, CallError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Classifier<E> + ?Sized,
        E: std::fmt::Display,
    {
        let never = CancellationToken::new();
        self.call_with_cancellation(key, work, timeout, policy, classifier, &never)
            .await
    }

    /// Like [`call`](Self::call), aborting when `cancel` fires.
    pub async fn call_with_cancellation<T, E, F, Fut, C>(
        &self,
        key: &str,
        mut work: F,
        timeout: Duration,
        policy: &RetryPolicy,
        classifier: &C,
        cancel: &CancellationToken,
    ) -> Result<T, CallError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Classifier<E> + ?Sized,
        E: std::fmt::Display,
    {
        let breaker = self.registry.get(key);
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(self.cancelled(key, attempt));
            }

            let permit = match breaker.acquire() {
                Ok(permit) => permit,
                Err(rejection) => {
                    self.recorder.record(key, OutcomeKind::CircuitRejected, Duration::ZERO);
                    tracing::debug!(
                        dependency = %key,
                        state = %rejection.state,
                        retry_after = ?rejection.retry_after,
                        "Call rejected by circuit breaker"
                    );
                    return Err(CallError::CircuitOpen(rejection));
                }
            };

            attempt += 1;
            let trial = permit.is_trial();
            let started = Instant::now();
            let outcome = run_bounded(timeout, cancel, work()).await;
            let elapsed = started.elapsed();

            let failure = match outcome {
                Bounded::Completed(Ok(value)) => {
                    permit.record_success();
                    self.recorder.record(key, OutcomeKind::Success, elapsed);
                    if attempt > 1 || trial {
                        tracing::debug!(dependency = %key, attempt, trial, "Call succeeded");
                    }
                    return Ok(value);
                }
                Bounded::Completed(Err(error)) => match classifier.classify(&error) {
                    FailureKind::Permanent => {
                        permit.record_failure();
                        self.recorder.record(key, OutcomeKind::PermanentFailure, elapsed);
                        tracing::warn!(
                            dependency = %key,
                            attempt,
                            error = %error,
                            "Permanent failure, not retrying"
                        );
                        return Err(CallError::Permanent {
                            key: key.to_string(),
                            attempt,
                            source: error,
                        });
                    }
                    FailureKind::Transient => {
                        permit.record_failure();
                        self.recorder.record(key, OutcomeKind::TransientFailure, elapsed);
                        AttemptError::Failed(error)
                    }
                },
                Bounded::TimedOut => {
                    permit.record_failure();
                    self.recorder.record(key, OutcomeKind::Timeout, elapsed);
                    AttemptError::TimedOut(timeout)
                }
                Bounded::Cancelled => {
                    // frees a trial slot without reporting a failure
                    drop(permit);
                    return Err(self.cancelled(key, attempt));
                }
            };

            if attempt >= max_attempts {
                tracing::warn!(
                    dependency = %key,
                    attempts = attempt,
                    error = %failure,
                    "Retries exhausted"
                );
                return Err(CallError::RetriesExhausted {
                    key: key.to_string(),
                    attempts: attempt,
                    last: failure,
                });
            }

            let delay = self.next_delay(attempt, policy);
            tracing::info!(
                dependency = %key,
                attempt,
                delay = ?delay,
                error = %failure,
                "Retrying call"
            );
            metrics::record_retry(key);

            if !sleep_cancellable(delay, cancel).await {
                return Err(self.cancelled(key, attempt));
            }
        }
    }

    fn next_delay(&self, attempt: u32, policy: &RetryPolicy) -> Duration {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        calculate_backoff_with_rng(attempt, policy, &mut *rng)
    }

    fn cancelled<E>(&self, key: &str, attempts: u32) -> CallError<E> {
        self.recorder.record(key, OutcomeKind::Cancelled, Duration::ZERO);
        tracing::debug!(dependency = %key, attempts, "Call cancelled");
        CallError::Cancelled {
            key: key.to_string(),
            attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::{BreakerConfig, CircuitState};
    use crate::resilience::classify::AlwaysTransient;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    enum Upstream {
        Unavailable,
        BadRequest,
    }

    impl std::fmt::Display for Upstream {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Upstream::Unavailable => f.write_str("503 service unavailable"),
                Upstream::BadRequest => f.write_str("400 bad request"),
            }
        }
    }

    fn classify(e: &Upstream) -> FailureKind {
        match e {
            Upstream::Unavailable => FailureKind::Transient,
            Upstream::BadRequest => FailureKind::Permanent,
        }
    }

    fn caller(failure_threshold: u32) -> ResilientCaller {
        let registry = Arc::new(BreakerRegistry::new(BreakerConfig {
            failure_threshold,
            ..BreakerConfig::default()
        }));
        ResilientCaller::new(registry, Arc::new(MetricsRecorder::new())).with_rng_seed(1)
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::default().with_max_attempts(max_attempts)
    }

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[tokio::test(start_paused = true)]
    async fn test_success_first_try() {
        let caller = caller(5);
        let result: Result<u32, CallError<Upstream>> = caller
            .call("db", || async { Ok(42) }, TIMEOUT, &policy(3), &classify)
            .await;
        assert_eq!(result.unwrap(), 42);

        let m = caller.recorder().snapshot("db").unwrap();
        assert_eq!(m.total_calls, 1);
        assert_eq!(m.total_successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_then_success() {
        let caller = caller(5);
        let calls = AtomicU32::new(0);

        let result = caller
            .call(
                "db",
                || async {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(Upstream::Unavailable)
                    } else {
                        Ok("row")
                    }
                },
                TIMEOUT,
                &policy(3),
                &classify,
            )
            .await;

        assert_eq!(result.unwrap(), "row");
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let breaker = caller.registry().get("db");
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);

        let m = caller.recorder().snapshot("db").unwrap();
        assert_eq!(m.failures.transient, 2);
        assert_eq!(m.total_successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_not_retried() {
        let caller = caller(5);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = caller
            .call(
                "payments",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Upstream::BadRequest)
                },
                TIMEOUT,
                &policy(3),
                &classify,
            )
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, CallError::Permanent { attempt: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.into_inner(), Some(Upstream::BadRequest));
        assert_eq!(caller.registry().get("payments").consecutive_failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_wraps_last_error() {
        let caller = caller(10);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = caller
            .call(
                "ai",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Upstream::Unavailable)
                },
                TIMEOUT,
                &policy(3),
                &classify,
            )
            .await;

        match result.unwrap_err() {
            CallError::RetriesExhausted { attempts, last, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(last.into_inner(), Some(Upstream::Unavailable));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_transient() {
        let caller = caller(10);
        let result: Result<(), CallError<Upstream>> = caller
            .call(
                "ai",
                || async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                },
                Duration::from_millis(100),
                &policy(2),
                &classify,
            )
            .await;

        match result.unwrap_err() {
            CallError::RetriesExhausted { attempts, last, .. } => {
                assert_eq!(attempts, 2);
                assert!(last.is_timeout());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(caller.recorder().snapshot("ai").unwrap().failures.timeout, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_fails_fast_without_attempt() {
        let caller = caller(2);
        for _ in 0..2 {
            let _: Result<(), _> = caller
                .call("db", || async { Err(Upstream::Unavailable) }, TIMEOUT, &policy(1), &classify)
                .await;
        }
        assert_eq!(caller.registry().get("db").state(), CircuitState::Open);

        let calls = AtomicU32::new(0);
        let result: Result<(), _> = caller
            .call(
                "db",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Upstream>(())
                },
                TIMEOUT,
                &policy(3),
                &classify,
            )
            .await;

        let err = result.unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(err.attempts(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(caller.recorder().snapshot("db").unwrap().circuit_rejections, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opening_mid_call_stops_retries() {
        let caller = caller(2);
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = caller
            .call(
                "db",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Upstream::Unavailable)
                },
                TIMEOUT,
                &policy(5),
                &classify,
            )
            .await;

        assert!(result.unwrap_err().is_circuit_open());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let caller = caller(10);
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            // first attempt fails immediately; backoff is at least 160ms
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result: Result<(), _> = caller
            .call_with_cancellation(
                "ai",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Upstream::Unavailable)
                },
                TIMEOUT,
                &policy(3),
                &classify,
                &cancel,
            )
            .await;

        assert!(matches!(result.unwrap_err(), CallError::Cancelled { attempts: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let m = caller.recorder().snapshot("ai").unwrap();
        assert_eq!(m.cancellations, 1);
        assert_eq!(caller.registry().get("ai").consecutive_failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_in_flight_is_not_a_breaker_failure() {
        let caller = caller(1);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result: Result<(), CallError<Upstream>> = caller
            .call_with_cancellation(
                "ai",
                || async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                },
                Duration::from_secs(30),
                &policy(3),
                &classify,
                &cancel,
            )
            .await;

        assert!(matches!(result.unwrap_err(), CallError::Cancelled { attempts: 1, .. }));
        let breaker = caller.registry().get("ai");
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_cancelled_runs_nothing() {
        let caller = caller(5);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicU32::new(0);

        let result: Result<(), CallError<Upstream>> = caller
            .call_with_cancellation(
                "db",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
                TIMEOUT,
                &policy(3),
                &classify,
                &cancel,
            )
            .await;

        assert!(matches!(result.unwrap_err(), CallError::Cancelled { attempts: 0, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_waits_between_attempts() {
        let caller = caller(10);
        let policy = RetryPolicy::default().with_jitter_ratio(0.0);
        let started = Instant::now();

        let _: Result<(), _> = caller
            .call("db", || async { Err(Upstream::Unavailable) }, TIMEOUT, &policy, &AlwaysTransient)
            .await;

        // 200ms + 400ms of backoff, attempts themselves are instant
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(600), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(650), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_success_closes() {
        let registry = Arc::new(BreakerRegistry::new(BreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_secs(5),
            ..BreakerConfig::default()
        }));
        let caller = ResilientCaller::new(registry, Arc::new(MetricsRecorder::new()));

        let _: Result<(), _> = caller
            .call("db", || async { Err(Upstream::Unavailable) }, TIMEOUT, &policy(1), &classify)
            .await;
        assert_eq!(caller.registry().get("db").state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(5)).await;
        let result: Result<u8, CallError<Upstream>> = caller
            .call("db", || async { Ok(1) }, TIMEOUT, &policy(1), &classify)
            .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(caller.registry().get("db").state(), CircuitState::Closed);
    }

    #[test]
    fn test_profiles_from_config() {
        let config = crate::config::parse_config(
            "[timeouts]\ncall_ms = 1500\n[dependencies.openai]\ntimeout_ms = 60000\n[dependencies.openai.retries]\nmax_attempts = 5\n",
        )
        .unwrap();
        let caller = ResilientCaller::from_config(&config);

        let openai = caller.profile("openai");
        assert_eq!(openai.timeout, Duration::from_secs(60));
        assert_eq!(openai.retry.max_attempts, 5);

        let other = caller.profile("db");
        assert_eq!(other.timeout, Duration::from_millis(1_500));
        assert_eq!(other.retry, RetryPolicy::default());
        assert!(caller.registry().find("openai").is_some());
    }
}
