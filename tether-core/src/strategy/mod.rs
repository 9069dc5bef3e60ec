//! Recovery strategies keyed by error code
//!
//! A [`RecoveryStrategy`] bundles how to retry, what to substitute and how to
//! notify for one error code, plus optional overrides of the classifier's
//! defaults. The [`StrategyRegistry`] is shared (via `Arc`) by the classifier,
//! the retry engine, the fallback provider and the notification selector.

use crate::core::Severity;
use crate::fallback::FallbackBehavior;
use crate::notify::NotificationStrategy;
use crate::retry::RetryPolicy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Per-code recovery configuration
#[derive(Debug, Clone)]
pub struct RecoveryStrategy {
    pub code: String,
    /// Retry override (None = the engine's default policy)
    pub retry_policy: Option<RetryPolicy>,
    /// Substitute behavior once retries are exhausted (None = surface the error)
    pub fallback: Option<FallbackBehavior>,
    /// Presentation override (None = severity table)
    pub notification: Option<NotificationStrategy>,
    pub retryable: Option<bool>,
    pub severity: Option<Severity>,
    pub suggested_actions: Vec<String>,
}

impl RecoveryStrategy {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            retry_policy: None,
            fallback: None,
            notification: None,
            retryable: None,
            severity: None,
            suggested_actions: Vec::new(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackBehavior) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_notification(mut self, notification: NotificationStrategy) -> Self {
        self.notification = Some(notification);
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_suggested_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suggested_actions = actions.into_iter().map(Into::into).collect();
        self
    }
}

/// Shared lookup table of recovery strategies
#[derive(Debug, Default)]
pub struct StrategyRegistry {
    strategies: RwLock<HashMap<String, Arc<RecoveryStrategy>>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the strategy for its code
    pub fn register(&self, strategy: RecoveryStrategy) {
        debug!(code = %strategy.code, "Registering recovery strategy");
        self.strategies
            .write()
            .insert(strategy.code.clone(), Arc::new(strategy));
    }

    pub fn get(&self, code: &str) -> Option<Arc<RecoveryStrategy>> {
        self.strategies.read().get(code).cloned()
    }

    pub fn remove(&self, code: &str) -> Option<Arc<RecoveryStrategy>> {
        self.strategies.write().remove(code)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.strategies.read().contains_key(code)
    }

    pub fn len(&self) -> usize {
        self.strategies.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered codes, sorted
    pub fn codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.strategies.read().keys().cloned().collect();
        codes.sort();
        codes
    }
}
