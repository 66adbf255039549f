//! Error types for faultgate

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of upstream call failures.
///
/// Call functions tag their failures with a kind so the circuit breaker can
/// decide whether the failure counts toward the failure rate. Kinds listed in
/// `BreakerConfig::ignored_failure_kinds` are excluded from the rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection-level failure (refused, reset, DNS)
    Transport,
    /// The remote rejected the request (caller-side problem)
    Client,
    /// The remote failed to process the request
    Server,
    /// Anything else
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Client => "client",
            ErrorKind::Server => "server",
            ErrorKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// Failure raised by a registered call function.
#[derive(Debug, Error)]
#[error("{kind} error from upstream: {message}")]
pub struct UpstreamError {
    pub kind: ErrorKind,
    pub message: String,
}

impl UpstreamError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Errors surfaced by `ResilientExecutor::execute` and the registry.
#[derive(Debug, Error)]
pub enum CallError {
    /// The circuit breaker is open; no call was attempted.
    #[error("circuit breaker for '{endpoint}' rejected the call")]
    RejectedByBreaker { endpoint: String },

    /// The call exceeded its time limit. Recorded as a breaker failure.
    #[error("call to '{endpoint}' timed out after {limit:?}")]
    TimedOut { endpoint: String, limit: Duration },

    /// The call function itself failed.
    #[error("call to '{endpoint}' failed: {source}")]
    Upstream {
        endpoint: String,
        #[source]
        source: UpstreamError,
    },

    /// No endpoint registered under this name.
    #[error("unknown endpoint '{0}'")]
    UnknownEndpoint(String),

    /// Rejected configuration at registration time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CallError {
    /// True if the error means the underlying call was never attempted.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            CallError::RejectedByBreaker { .. } | CallError::UnknownEndpoint(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::Transport.to_string(), "transport");
        assert_eq!(ErrorKind::Server.to_string(), "server");
    }

    #[test]
    fn test_error_kind_serde_snake_case() {
        let yaml = serde_yaml::to_string(&ErrorKind::Client).unwrap();
        assert_eq!(yaml.trim(), "client");

        let parsed: ErrorKind = serde_yaml::from_str("transport").unwrap();
        assert_eq!(parsed, ErrorKind::Transport);
    }

    #[test]
    fn test_rejection_classification() {
        let rejected = CallError::RejectedByBreaker {
            endpoint: "api".to_string(),
        };
        assert!(rejected.is_rejection());

        let timed_out = CallError::TimedOut {
            endpoint: "api".to_string(),
            limit: Duration::from_secs(5),
        };
        assert!(!timed_out.is_rejection());
    }
}
