//! Error taxonomy for resilient calls.

use std::time::Duration;

use thiserror::Error;

use crate::resilience::circuit_breaker::CircuitOpenError;

/// Why a single attempt failed.
#[derive(Debug, Error)]
pub enum AttemptError<E> {
    /// The work unit returned an error.
    #[error(transparent)]
    Failed(E),

    /// The work unit did not finish within the per-attempt timeout.
    #[error("attempt timed out after {0:?}")]
    TimedOut(Duration),
}

impl<E> AttemptError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, AttemptError::TimedOut(_))
    }

    /// The underlying error, if the attempt did not time out.
    pub fn into_inner(self) -> Option<E> {
        match self {
            AttemptError::Failed(e) => Some(e),
            AttemptError::TimedOut(_) => None,
        }
    }
}

/// Terminal failure of a resilient call.
#[derive(Debug, Error)]
pub enum CallError<E> {
    /// The breaker rejected the call; nothing was executed.
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    /// The dependency rejected the request in a way retrying cannot fix.
    #[error("permanent failure calling '{key}' on attempt {attempt}")]
    Permanent {
        key: String,
        attempt: u32,
        #[source]
        source: E,
    },

    /// Every attempt failed transiently or timed out.
    #[error("retries exhausted calling '{key}' after {attempts} attempts")]
    RetriesExhausted {
        key: String,
        attempts: u32,
        #[source]
        last: AttemptError<E>,
    },

    /// The caller's cancellation token fired.
    #[error("call to '{key}' cancelled after {attempts} attempts started")]
    Cancelled { key: String, attempts: u32 },
}

/// Discriminant of [`CallError`], for logging and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallErrorKind {
    CircuitOpen,
    Permanent,
    RetriesExhausted,
    Cancelled,
}

impl CallErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallErrorKind::CircuitOpen => "circuit_open",
            CallErrorKind::Permanent => "permanent",
            CallErrorKind::RetriesExhausted => "retries_exhausted",
            CallErrorKind::Cancelled => "cancelled",
        }
    }
}

impl<E> CallError<E> {
    pub fn kind(&self) -> CallErrorKind {
        match self {
            CallError::CircuitOpen(_) => CallErrorKind::CircuitOpen,
            CallError::Permanent { .. } => CallErrorKind::Permanent,
            CallError::RetriesExhausted { .. } => CallErrorKind::RetriesExhausted,
            CallError::Cancelled { .. } => CallErrorKind::Cancelled,
        }
    }

    /// Dependency the failed call targeted.
    pub fn key(&self) -> &str {
        match self {
            CallError::CircuitOpen(e) => &e.key,
            CallError::Permanent { key, .. }
            | CallError::RetriesExhausted { key, .. }
            | CallError::Cancelled { key, .. } => key,
        }
    }

    /// Number of attempts that were started before the call ended.
    pub fn attempts(&self) -> u32 {
        match self {
            CallError::CircuitOpen(_) => 0,
            CallError::Permanent { attempt, .. } => *attempt,
            CallError::RetriesExhausted { attempts, .. } | CallError::Cancelled { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CallError::CircuitOpen(_))
    }

    /// The dependency's own error, when there is one.
    pub fn into_inner(self) -> Option<E> {
        match self {
            CallError::Permanent { source, .. } => Some(source),
            CallError::RetriesExhausted { last, .. } => last.into_inner(),
            CallError::CircuitOpen(_) | CallError::Cancelled { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::CircuitState;
    use std::error::Error as _;

    #[derive(Debug, Error)]
    #[error("upstream said no")]
    struct Upstream;

    #[test]
    fn test_source_chain_reaches_underlying_error() {
        let err: CallError<Upstream> = CallError::RetriesExhausted {
            key: "ai".into(),
            attempts: 3,
            last: AttemptError::Failed(Upstream),
        };
        assert_eq!(err.kind(), CallErrorKind::RetriesExhausted);
        assert_eq!(err.key(), "ai");
        assert_eq!(err.attempts(), 3);
        assert_eq!(err.source().unwrap().to_string(), "upstream said no");
        assert!(err.into_inner().is_some());
    }

    #[test]
    fn test_timeout_has_no_inner_error() {
        let err: CallError<Upstream> = CallError::RetriesExhausted {
            key: "ai".into(),
            attempts: 2,
            last: AttemptError::TimedOut(Duration::from_millis(50)),
        };
        assert!(err.to_string().contains("after 2 attempts"));
        assert!(err.into_inner().is_none());
    }

    #[test]
    fn test_circuit_open_conversion() {
        let err: CallError<Upstream> = CircuitOpenError {
            key: "payments".into(),
            state: CircuitState::Open,
            consecutive_failures: 5,
            retry_after: None,
        }
        .into();
        assert!(err.is_circuit_open());
        assert_eq!(err.key(), "payments");
        assert_eq!(err.attempts(), 0);
        assert_eq!(err.kind().as_str(), "circuit_open");
    }
}
