//! Failure classification.
//!
//! # Responsibilities
//! - Map a raw error from a work unit to Transient or Permanent
//! - Provide a ready classifier for HTTP calls made with reqwest
//!
//! # Design Decisions
//! - Classification is injected by the consumer, never hard-coded in the caller
//! - Connection errors, timeouts, 408, 429 and 5xx are transient
//! - Other 4xx (validation, auth) are permanent
//! - Unknown errors default to transient so a genuine outage still trips the breaker

use reqwest::StatusCode;
use serde::Serialize;

/// Retry class of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Worth retrying: network errors, 5xx, overload.
    Transient,
    /// Never retried: the request itself is wrong.
    Permanent,
}

/// Decides whether an error is worth retrying.
pub trait Classifier<E>: Send + Sync {
    fn classify(&self, error: &E) -> FailureKind;
}

impl<E, F> Classifier<E> for F
where
    F: Fn(&E) -> FailureKind + Send + Sync,
{
    fn classify(&self, error: &E) -> FailureKind {
        self(error)
    }
}

/// Treats every error as transient.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysTransient;

impl<E> Classifier<E> for AlwaysTransient {
    fn classify(&self, _error: &E) -> FailureKind {
        FailureKind::Transient
    }
}

/// Classify an HTTP status code.
pub fn classify_status(status: StatusCode) -> FailureKind {
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => FailureKind::Transient,
        s if s.is_server_error() => FailureKind::Transient,
        s if s.is_client_error() => FailureKind::Permanent,
        _ => FailureKind::Transient,
    }
}

/// Classifier for `reqwest::Error`.
///
/// Pair it with `Response::error_for_status` in the work unit so that
/// non-success statuses surface as errors carrying their code.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpClassifier;

impl Classifier<reqwest::Error> for HttpClassifier {
    fn classify(&self, error: &reqwest::Error) -> FailureKind {
        if let Some(status) = error.status() {
            return classify_status(status);
        }
        if error.is_builder() || error.is_redirect() || error.is_decode() {
            return FailureKind::Permanent;
        }
        // connect, timeout, request and body errors
        FailureKind::Transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(classify_status(StatusCode::BAD_REQUEST), FailureKind::Permanent);
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), FailureKind::Permanent);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), FailureKind::Permanent);
        assert_eq!(classify_status(StatusCode::UNPROCESSABLE_ENTITY), FailureKind::Permanent);

        assert_eq!(classify_status(StatusCode::REQUEST_TIMEOUT), FailureKind::Transient);
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), FailureKind::Transient);
        assert_eq!(classify_status(StatusCode::INTERNAL_SERVER_ERROR), FailureKind::Transient);
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), FailureKind::Transient);
        assert_eq!(classify_status(StatusCode::SERVICE_UNAVAILABLE), FailureKind::Transient);
    }

    #[test]
    fn test_closure_classifier() {
        let classifier = |e: &String| {
            if e.starts_with("invalid") {
                FailureKind::Permanent
            } else {
                FailureKind::Transient
            }
        };
        assert_eq!(classifier.classify(&"invalid payload".to_string()), FailureKind::Permanent);
        assert_eq!(classifier.classify(&"connection reset".to_string()), FailureKind::Transient);
        assert_eq!(AlwaysTransient.classify(&"anything"), FailureKind::Transient);
    }

    #[test]
    fn test_builder_error_is_permanent() {
        let err = reqwest::Client::new().get("not a url").build().unwrap_err();
        assert_eq!(HttpClassifier.classify(&err), FailureKind::Permanent);
    }
}
