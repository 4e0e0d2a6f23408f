//! Exponential backoff with jitter.
//!
//! ```text
//! raw    = min(max_delay, base_delay * multiplier^(attempt - 1))
//! jitter = raw * jitter_ratio * uniform(-1, 1)
//! delay  = clamp(raw + jitter, 0, max_delay)
//! ```

use std::time::Duration;
use rand::Rng;

use crate::resilience::retries::RetryPolicy;

/// Calculate the delay to wait after `attempt` failed, before the next one.
///
/// `attempt` is 1-indexed: the wait before attempt 2 uses `attempt = 1`.
pub fn calculate_backoff(attempt: u32, policy: &RetryPolicy) -> Duration {
    calculate_backoff_with_rng(attempt, policy, &mut rand::thread_rng())
}

/// Same as [`calculate_backoff`] but draws jitter from the given generator.
pub fn calculate_backoff_with_rng<R: Rng + ?Sized>(
    attempt: u32,
    policy: &RetryPolicy,
    rng: &mut R,
) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let raw = raw_delay_secs(attempt, policy);
    let max = policy.max_delay.as_secs_f64();

    let jitter = if policy.jitter_ratio > 0.0 && raw > 0.0 {
        raw * policy.jitter_ratio * rng.gen_range(-1.0..=1.0)
    } else {
        0.0
    };

    Duration::from_secs_f64((raw + jitter).clamp(0.0, max))
}

/// Upper bound a jittered delay for `attempt` can reach.
pub fn max_backoff(attempt: u32, policy: &RetryPolicy) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let raw = raw_delay_secs(attempt, policy);
    Duration::from_secs_f64(raw * (1.0 + policy.jitter_ratio))
}

fn raw_delay_secs(attempt: u32, policy: &RetryPolicy) -> f64 {
    let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
    let exponential = policy.base_delay.as_secs_f64() * policy.multiplier.powi(exponent);
    // powi overflows to inf for large attempts; min() keeps it finite
    exponential.min(policy.max_delay.as_secs_f64())
}
