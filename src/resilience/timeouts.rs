//! Timeout enforcement.
//!
//! # Responsibilities
//! - Bound every attempt with a deadline
//! - Abort an attempt or a backoff wait when the caller cancels
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Cancellation is checked first so a fired token always wins a tie
//! - The timeout is the same for every attempt of a call

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// How a bounded attempt ended.
#[derive(Debug)]
pub enum Bounded<T> {
    Completed(T),
    TimedOut,
    Cancelled,
}

/// Run `fut` until it completes, `timeout` elapses, or `cancel` fires.
pub async fn run_bounded<F>(timeout: Duration, cancel: &CancellationToken, fut: F) -> Bounded<F::Output>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Bounded::Cancelled,
        result = tokio::time::timeout(timeout, fut) => match result {
            Ok(output) => Bounded::Completed(output),
            Err(_) => Bounded::TimedOut,
        },
    }
}

/// Sleep for `delay` unless `cancel` fires first. Returns false when cancelled.
pub async fn sleep_cancellable(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
