//! Terminal result of a recovered operation

use crate::core::ErrorDetails;
use crate::fallback::FallbackValue;
use serde::de::DeserializeOwned;

/// How a recovered operation ended
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryOutcome<T> {
    /// The operation (eventually) succeeded; `attempts` counts retries
    Success { value: T, attempts: u32 },
    /// A substitute was served; the error was still published
    Fallback {
        fallback: FallbackValue,
        error: ErrorDetails,
    },
    /// Nothing could be substituted; the error was published
    Failed { error: ErrorDetails },
}

impl<T> RecoveryOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn used_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Success { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn fallback(&self) -> Option<&FallbackValue> {
        match self {
            Self::Fallback { fallback, .. } => Some(fallback),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorDetails> {
        match self {
            Self::Success { .. } => None,
            Self::Fallback { error, .. } | Self::Failed { error } => Some(error),
        }
    }

    /// Success value, or the fallback payload decoded as `T`
    pub fn into_value(self) -> Option<T>
    where
        T: DeserializeOwned,
    {
        match self {
            Self::Success { value, .. } => Some(value),
            Self::Fallback { fallback, .. } => fallback.decode(),
            Self::Failed { .. } => None,
        }
    }

    /// Success value, or the error that ended recovery
    pub fn into_result(self) -> Result<T, ErrorDetails>
    where
        T: DeserializeOwned,
    {
        match self {
            Self::Success { value, .. } => Ok(value),
            Self::Fallback { fallback, error } => fallback.decode().ok_or(error),
            Self::Failed { error } => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ErrorCategory, Severity};
    use serde_json::json;

    fn error() -> ErrorDetails {
        ErrorDetails::new("HTTP_503", "unavailable", ErrorCategory::Network, Severity::High)
    }

    #[test]
    fn test_fallback_payload_decodes() {
        let outcome: RecoveryOutcome<Vec<u32>> = RecoveryOutcome::Fallback {
            fallback: FallbackValue::Substitute(json!([4, 5])),
            error: error(),
        };
        assert!(outcome.used_fallback());
        assert!(outcome.error().is_some());
        assert_eq!(outcome.into_value(), Some(vec![4, 5]));
    }

    #[test]
    fn test_marker_fallback_yields_error() {
        let outcome: RecoveryOutcome<Vec<u32>> = RecoveryOutcome::Fallback {
            fallback: FallbackValue::Offline {
                message: "offline".to_string(),
            },
            error: error(),
        };
        let err = outcome.into_result().unwrap_err();
        assert_eq!(err.code, "HTTP_503");
    }
}
