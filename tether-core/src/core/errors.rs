//! Error types surfaced by the resilience layer itself
//!
//! These are distinct from the *classified* failures ([`ErrorDetails`]) the
//! layer handles on behalf of callers: they describe why a retry, a policy or a
//! channel operation could not proceed.
//!
//! [`ErrorDetails`]: super::ErrorDetails

use super::types::ErrorId;
use crate::channel::Phase;
use crate::classify::RawFailure;
use std::time::Duration;
use thiserror::Error;

/// Invalid retry policy parameters
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,

    #[error("base_delay must be greater than zero")]
    ZeroBaseDelay,

    #[error("max_delay ({max:?}) must not be below base_delay ({base:?})")]
    MaxBelowBase { base: Duration, max: Duration },
}

/// Why a single `retry` call did not produce a value
#[derive(Debug, Clone, Error)]
pub enum RetryError {
    /// Error is not retryable or its budget is already spent
    #[error("NOT_RETRYABLE: {code} ({id})")]
    NotRetryable { id: ErrorId, code: String },

    /// Another retry for the same error id is still pending
    #[error("retry already in flight for {id}")]
    InFlight { id: ErrorId },

    /// The pending retry was cancelled (error dismissed)
    #[error("retry cancelled for {id}")]
    Cancelled { id: ErrorId },

    /// The operation ran and failed again
    #[error("attempt {attempt} failed: {failure}")]
    Failed {
        /// 1-based number of the attempt that failed
        attempt: u32,
        /// True when this was the last attempt the policy permits
        exhausted: bool,
        failure: RawFailure,
    },
}

impl RetryError {
    /// Whether the caller may invoke `retry` again for this error
    pub fn can_continue(&self) -> bool {
        matches!(
            self,
            RetryError::Failed {
                exhausted: false,
                ..
            }
        )
    }
}

/// Transport-level failure of a channel
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("receive failed: {0}")]
    Receive(String),

    #[error("invalid frame: {0}")]
    Protocol(String),
}

/// Misuse of the connection manager API
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("channel is already {0}")]
    AlreadyOpen(Phase),

    #[error("open() requires a running tokio runtime")]
    NoRuntime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_retryable_display() {
        let err = RetryError::NotRetryable {
            id: ErrorId::from("abc"),
            code: "HTTP_404".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("NOT_RETRYABLE"));
        assert!(msg.contains("HTTP_404"));
        assert!(!err.can_continue());
    }

    #[test]
    fn test_failed_can_continue() {
        let err = RetryError::Failed {
            attempt: 1,
            exhausted: false,
            failure: RawFailure::from("boom"),
        };
        assert!(err.can_continue());

        let err = RetryError::Failed {
            attempt: 3,
            exhausted: true,
            failure: RawFailure::from("boom"),
        };
        assert!(!err.can_continue());
    }

    #[test]
    fn test_connection_error_display() {
        let err = ConnectionError::AlreadyOpen(Phase::Reconnecting);
        assert_eq!(err.to_string(), "channel is already reconnecting");
    }

    #[test]
    fn test_policy_error_display() {
        let err = PolicyError::MaxBelowBase {
            base: Duration::from_secs(2),
            max: Duration::from_secs(1),
        };
        assert!(err.to_string().contains("must not be below"));
    }
}
