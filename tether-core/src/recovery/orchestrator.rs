//! Retry -> fallback -> notify composition
//!
//! This is the only place the three sub-policies meet, and the order is fixed:
//! retry while the policy allows, then substitute, then fail. Whatever the
//! terminal outcome, a failed operation is always published to the bus so the
//! user learns that data may be stale or missing.

use super::outcome::RecoveryOutcome;
use crate::bus::ErrorListenerBus;
use crate::classify::{ErrorClassifier, RawFailure};
use crate::core::{ErrorContext, ErrorDetails, ErrorId, RetryError};
use crate::fallback::FallbackProvider;
use crate::notify::{Notification, NotificationStrategySelector};
use crate::retry::{ProgressObserver, RetryPolicyEngine};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

pub struct RecoveryOrchestrator {
    classifier: Arc<ErrorClassifier>,
    engine: Arc<RetryPolicyEngine>,
    fallback: Arc<FallbackProvider>,
    selector: Arc<NotificationStrategySelector>,
    bus: ErrorListenerBus,
}

impl RecoveryOrchestrator {
    pub fn new(
        classifier: Arc<ErrorClassifier>,
        engine: Arc<RetryPolicyEngine>,
        fallback: Arc<FallbackProvider>,
        selector: Arc<NotificationStrategySelector>,
        bus: ErrorListenerBus,
    ) -> Self {
        Self {
            classifier,
            engine,
            fallback,
            selector,
            bus,
        }
    }

    pub fn classifier(&self) -> &Arc<ErrorClassifier> {
        &self.classifier
    }

    pub fn engine(&self) -> &Arc<RetryPolicyEngine> {
        &self.engine
    }

    pub fn fallback_provider(&self) -> &Arc<FallbackProvider> {
        &self.fallback
    }

    pub fn bus(&self) -> &ErrorListenerBus {
        &self.bus
    }

    /// Run `operation` with full recovery
    ///
    /// `context` identifies the operation (it keys the success cache) and is
    /// attached to any error produced.
    pub async fn run<T, F, Fut>(&self, operation: F, context: ErrorContext) -> RecoveryOutcome<T>
    where
        T: Serialize,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RawFailure>>,
    {
        self.run_with_observer(operation, context, None).await
    }

    /// [`run`](Self::run), reporting retry progress to `observer`
    pub async fn run_with_observer<T, F, Fut>(
        &self,
        mut operation: F,
        context: ErrorContext,
        observer: Option<&dyn ProgressObserver>,
    ) -> RecoveryOutcome<T>
    where
        T: Serialize,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RawFailure>>,
    {
        match operation().await {
            Ok(value) => {
                self.remember(&context, &value);
                RecoveryOutcome::Success { value, attempts: 0 }
            }
            Err(failure) => {
                let error = self.classifier.classify(failure, context);
                self.recover(error, &mut operation, observer).await
            }
        }
    }

    /// User-triggered retry of a surfaced error
    ///
    /// Cancels any automatic retry still pending for the error, starts a fresh
    /// attempt budget for the same id and invokes the operation right away. A
    /// new failure keeps the original id, so a later dismissal still applies
    /// to it, and goes through the usual retry -> fallback -> notify pipeline.
    pub async fn manual_retry<T, F, Fut>(&self, error: &ErrorDetails, operation: F) -> RecoveryOutcome<T>
    where
        T: Serialize,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RawFailure>>,
    {
        self.manual_retry_with_observer(error, operation, None).await
    }

    pub async fn manual_retry_with_observer<T, F, Fut>(
        &self,
        error: &ErrorDetails,
        mut operation: F,
        observer: Option<&dyn ProgressObserver>,
    ) -> RecoveryOutcome<T>
    where
        T: Serialize,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RawFailure>>,
    {
        // An automatic retry still pending for this id is superseded
        let superseded = self.engine.cancel(&error.id);
        info!(id = %error.id, code = %error.code, superseded, "Manual retry requested");

        match operation().await {
            Ok(value) => {
                self.remember(&error.context, &value);
                RecoveryOutcome::Success { value, attempts: 1 }
            }
            Err(failure) => {
                let next = self.classifier.reclassify(error, failure);
                self.recover(next, &mut operation, observer).await
            }
        }
    }

    /// Cancel any pending retry for `id` and stop notifying about it
    pub fn dismiss(&self, id: &ErrorId) {
        let cancelled = self.engine.cancel(id);
        self.bus.suppression().suppress(id);
        debug!(%id, cancelled, "Error dismissed");
    }

    async fn recover<T, F, Fut>(
        &self,
        error: ErrorDetails,
        operation: &mut F,
        observer: Option<&dyn ProgressObserver>,
    ) -> RecoveryOutcome<T>
    where
        T: Serialize,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RawFailure>>,
    {
        let mut error = error;
        let mut attempts = 0;
        while self
            .engine
            .should_retry(&error, self.engine.attempts(&error.id))
        {
            attempts += 1;
            match self
                .engine
                .retry_with_observer(&error, || operation(), observer)
                .await
            {
                Ok(value) => {
                    self.remember(&error.context, &value);
                    return RecoveryOutcome::Success { value, attempts };
                }
                Err(RetryError::Failed {
                    exhausted, failure, ..
                }) => {
                    // Report what the latest attempt saw
                    error = self.classifier.reclassify(&error, failure);
                    if exhausted {
                        break;
                    }
                }
                Err(e) => {
                    debug!(id = %error.id, "Retrying stopped: {}", e);
                    break;
                }
            }
        }

        self.conclude(error)
    }

    /// Serve a fallback if one exists and publish the error either way
    pub(crate) fn conclude<T>(&self, error: ErrorDetails) -> RecoveryOutcome<T> {
        let fallback = self.fallback.fallback(&error);
        let mut strategy = self.selector.select(&error);
        if fallback.is_some() {
            strategy = strategy.passive();
        }

        warn!(
            id = %error.id,
            code = %error.code,
            severity = %error.severity,
            fallback = fallback.as_ref().map(|f| f.kind()),
            "Operation failed: {}",
            error.message
        );
        self.bus.publish(&Notification::new(strategy, error.clone()));

        match fallback {
            Some(fallback) => RecoveryOutcome::Fallback { fallback, error },
            None => RecoveryOutcome::Failed { error },
        }
    }

    pub(crate) fn remember<T: Serialize>(&self, context: &ErrorContext, value: &T) {
        match serde_json::to_value(value) {
            Ok(payload) => self.fallback.record_success(context, payload),
            Err(e) => trace!("Result not cacheable: {}", e),
        }
    }
}
