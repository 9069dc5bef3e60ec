//! Failure boundary between the resilience layer and presentation code
//!
//! A [`Supervisor`] runs a guarded region (rendering a view, loading a panel)
//! and turns anything escaping it into a [`RecoveryOutcome`]: returned errors
//! and panics alike are classified as exceptions, published, and replaced by
//! the registered fallback when there is one.

use super::orchestrator::RecoveryOrchestrator;
use super::outcome::RecoveryOutcome;
use crate::classify::RawFailure;
use crate::core::ErrorContext;
use crate::utils::panic_message;
use futures_util::FutureExt;
use serde::Serialize;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::error;

#[derive(Clone)]
pub struct Supervisor {
    orchestrator: Arc<RecoveryOrchestrator>,
}

impl Supervisor {
    pub fn new(orchestrator: Arc<RecoveryOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Run `region`, converting errors and panics into an outcome
    ///
    /// The region is not retried; it is a one-shot future.
    pub async fn guard<T, Fut>(&self, region: Fut, context: ErrorContext) -> RecoveryOutcome<T>
    where
        T: Serialize,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let failure = match AssertUnwindSafe(region).catch_unwind().await {
            Ok(Ok(value)) => {
                self.orchestrator.remember(&context, &value);
                return RecoveryOutcome::Success { value, attempts: 0 };
            }
            Ok(Err(e)) => RawFailure::from(e),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(%message, "Guarded region panicked");
                RawFailure::Exception {
                    message,
                    stack: None,
                }
            }
        };

        let details = self.orchestrator.classifier().classify(failure, context);
        self.orchestrator.conclude(details)
    }
}
