//! Error classification
//!
//! Normalizes every inbound failure shape into an [`ErrorDetails`]. This is the
//! last line of defense, so `classify` is total: input it cannot make sense of
//! degrades to a generic `system/medium` record instead of failing.
//!
//! After the base classification, a [`RecoveryStrategy`] registered for the
//! resolved code may override `retryable`, `severity` and the suggested
//! actions.
//!
//! [`RecoveryStrategy`]: crate::strategy::RecoveryStrategy

pub mod http;
pub mod raw;

pub use http::{classify_status, StatusClass};
pub use raw::{ChannelFault, FaultKind, HttpBody, HttpFailure, RawFailure};

use crate::core::{DiagnosticInfo, ErrorCategory, ErrorContext, ErrorDetails, Severity};
use crate::monitoring::MetricsRegistry;
use crate::strategy::StrategyRegistry;
use std::sync::Arc;
use tracing::debug;

/// Catalog codes assigned by the classifier
pub mod codes {
    pub const GENERIC_ERROR: &str = "GENERIC_ERROR";
    pub const UNHANDLED_EXCEPTION: &str = "UNHANDLED_EXCEPTION";
    pub const CHANNEL_ERROR: &str = "CHANNEL_ERROR";
    pub const CHANNEL_CLOSED: &str = "CHANNEL_CLOSED";
    pub const CHANNEL_ABANDONED: &str = "CHANNEL_ABANDONED";
    pub const UNKNOWN_ERROR: &str = "UNKNOWN_ERROR";

    /// Derived code for an HTTP status without a server-provided code
    pub fn http(status: u16) -> String {
        format!("HTTP_{status}")
    }
}

const FALLBACK_MESSAGE: &str = "An unexpected error occurred";

/// Context keys the classifier adds on its own; they are not part of the
/// caller's context and never participate in cache keys.
pub(crate) const ANNOTATION_KEYS: &[&str] = &[REQUIRES_REAUTH, PAYLOAD];

const REQUIRES_REAUTH: &str = "requiresReauth";
const PAYLOAD: &str = "payload";

/// Turns raw failures into canonical [`ErrorDetails`]
pub struct ErrorClassifier {
    strategies: Arc<StrategyRegistry>,
    metrics: Option<MetricsRegistry>,
}

impl ErrorClassifier {
    pub fn new(strategies: Arc<StrategyRegistry>) -> Self {
        Self {
            strategies,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Classify a failure, attaching `context` to the resulting record
    pub fn classify(&self, failure: impl Into<RawFailure>, context: ErrorContext) -> ErrorDetails {
        let failure = failure.into();
        let mut details = base_classification(&failure).with_context(context);
        self.apply_strategy_overrides(&mut details);

        if let Some(metrics) = &self.metrics {
            metrics
                .recovery()
                .errors_classified
                .with_label_values(&[details.category.as_str(), details.severity.as_str()])
                .inc();
        }

        debug!(
            id = %details.id,
            code = %details.code,
            category = %details.category,
            severity = %details.severity,
            retryable = details.retryable,
            "Classified failure"
        );

        details
    }

    /// Classify a later failure of the same operation
    ///
    /// The result keeps `previous`'s id and caller context; annotations the
    /// classifier added to `previous` are dropped and re-derived.
    pub fn reclassify(&self, previous: &ErrorDetails, failure: impl Into<RawFailure>) -> ErrorDetails {
        let context = previous
            .context
            .iter()
            .filter(|(key, _)| !ANNOTATION_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let mut details = self.classify(failure, context);
        details.id = previous.id.clone();
        details
    }

    fn apply_strategy_overrides(&self, details: &mut ErrorDetails) {
        let Some(strategy) = self.strategies.get(&details.code) else {
            return;
        };

        if let Some(retryable) = strategy.retryable {
            details.retryable = retryable;
        }
        if let Some(severity) = strategy.severity {
            details.severity = severity;
        }
        if !strategy.suggested_actions.is_empty() {
            details.suggested_actions = strategy.suggested_actions.clone();
        }
    }
}

fn non_empty(message: &str) -> &str {
    if message.trim().is_empty() {
        FALLBACK_MESSAGE
    } else {
        message
    }
}

fn base_classification(failure: &RawFailure) -> ErrorDetails {
    match failure {
        RawFailure::Message(message) => ErrorDetails::new(
            codes::GENERIC_ERROR,
            non_empty(message),
            ErrorCategory::System,
            Severity::Medium,
        ),

        RawFailure::Exception { message, stack } => ErrorDetails::new(
            codes::UNHANDLED_EXCEPTION,
            non_empty(message),
            ErrorCategory::System,
            Severity::Medium,
        )
        .with_diagnostics(DiagnosticInfo {
            stack: stack.clone(),
            ..Default::default()
        }),

        RawFailure::Http(http) => {
            let class = classify_status(http.status);
            let body = http.body.as_ref();
            let code = body
                .and_then(|b| b.code.clone())
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| codes::http(http.status));
            let message = body
                .and_then(|b| b.message.as_deref())
                .filter(|m| !m.trim().is_empty())
                .unwrap_or(class.description);

            let mut details = ErrorDetails::new(code, message, class.category, class.severity)
                .retryable(class.retryable)
                .with_diagnostics(DiagnosticInfo {
                    endpoint: http.endpoint.clone(),
                    status_code: Some(http.status),
                    latency: http.latency,
                    ..Default::default()
                });
            details.suggested_actions = class.actions.iter().map(|a| a.to_string()).collect();
            if http::requires_reauth(http.status) {
                details = details.with_context_value(REQUIRES_REAUTH, true);
            }
            details
        }

        RawFailure::Channel(fault) => {
            let code = match fault.kind {
                FaultKind::Error => codes::CHANNEL_ERROR,
                FaultKind::Close => codes::CHANNEL_CLOSED,
            };
            let mut details = ErrorDetails::new(
                code,
                "Live updates were interrupted",
                ErrorCategory::Network,
                Severity::Medium,
            )
            .retryable(true)
            .with_action("Live updates resume automatically once the connection recovers");
            if fault.code.is_some() || fault.reason.is_some() {
                details = details.with_diagnostics(DiagnosticInfo {
                    status_code: fault.code,
                    stack: fault.reason.clone(),
                    ..Default::default()
                });
            }
            details
        }

        RawFailure::Unknown(payload) => ErrorDetails::new(
            codes::UNKNOWN_ERROR,
            FALLBACK_MESSAGE,
            ErrorCategory::System,
            Severity::Medium,
        )
        .with_context_value(PAYLOAD, payload.clone()),
    }
}
