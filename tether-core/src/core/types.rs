//! Canonical failure record and its taxonomy
//!
//! Every failure the layer sees (thrown errors, HTTP responses, channel events,
//! free text) ends up as an [`ErrorDetails`]. The id is generated once at
//! classification time and reused for every retry of the same logical failure,
//! so attempt counters and suppression key off it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Open key/value context attached to a failure.
///
/// Ordered so that the same context always serializes identically (the
/// fallback cache keys off that serialization).
pub type ErrorContext = BTreeMap<String, serde_json::Value>;

/// Unique identifier of one failure occurrence
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorId(String);

impl ErrorId {
    /// Generate a fresh random id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ErrorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ErrorId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ErrorId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Failure taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    /// Transport failures, timeouts, rate limiting, dropped channels
    Network,
    /// Quotas and exhausted resources on either side
    ResourceAllocation,
    /// Misconfigured or missing environment
    Environment,
    /// Bad request input (4xx that retrying cannot fix)
    InputValidation,
    /// Everything else, including unclassifiable input
    System,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::ResourceAllocation => "resource-allocation",
            Self::Environment => "environment",
            Self::InputValidation => "input-validation",
            Self::System => "system",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How bad a failure is; drives notification intrusiveness
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low = 0,
    Medium = 1,
    High = 2,
    Critical = 3,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured diagnostics captured alongside a failure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Round-trip latency of the failed call, in milliseconds on the wire
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "duration_ms_opt"
    )]
    pub latency: Option<Duration>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_resources: Vec<String>,
    /// Stack or error-chain text of a native error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl DiagnosticInfo {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Canonical failure record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetails {
    pub id: ErrorId,
    /// Lookup key for a registered recovery strategy
    pub code: String,
    pub message: String,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub context: ErrorContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic_info: Option<DiagnosticInfo>,
    pub retryable: bool,
    pub user_facing: bool,
    #[serde(default)]
    pub suggested_actions: Vec<String>,
}

impl ErrorDetails {
    /// Create a record with a freshly generated id and the current time
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        category: ErrorCategory,
        severity: Severity,
    ) -> Self {
        Self {
            id: ErrorId::generate(),
            code: code.into(),
            message: message.into(),
            category,
            severity,
            timestamp: Utc::now(),
            context: ErrorContext::new(),
            diagnostic_info: None,
            retryable: false,
            user_facing: true,
            suggested_actions: Vec::new(),
        }
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context.extend(context);
        self
    }

    pub fn with_context_value(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_diagnostics(mut self, info: DiagnosticInfo) -> Self {
        self.diagnostic_info = (!info.is_empty()).then_some(info);
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.suggested_actions.push(action.into());
        self
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}

impl fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}/{}] {}: {}",
            self.category, self.severity, self.code, self.message
        )
    }
}

/// Serialize `Option<Duration>` as whole milliseconds
pub(crate) mod duration_ms_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_u64(d.as_millis() as u64),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

/// Serialize `Duration` as whole milliseconds
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
