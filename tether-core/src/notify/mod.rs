//! Notification strategy selection
//!
//! Decides how a failure is presented to the user. A strategy registered for
//! the error code wins; otherwise the severity table applies:
//!
//! | severity | presentation | duration   | dismissible | diagnostics |
//! |----------|--------------|------------|-------------|-------------|
//! | critical | modal        | persistent | no          | yes         |
//! | high     | banner       | persistent | yes         | yes         |
//! | medium   | toast        | 8000 ms    | yes         | no          |
//! | low      | toast        | 4000 ms    | yes         | no          |

use crate::core::types::duration_ms;
use crate::core::{ErrorDetails, Severity};
use crate::strategy::StrategyRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// How the UI renders a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presentation {
    Modal,
    Banner,
    Toast,
}

/// Presentation parameters handed to the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationStrategy {
    pub presentation: Presentation,
    /// Auto-dismiss delay; zero means persistent
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    pub dismissible: bool,
    pub show_diagnostics: bool,
}

impl NotificationStrategy {
    pub const PERSISTENT: Duration = Duration::ZERO;

    pub const fn new(
        presentation: Presentation,
        duration: Duration,
        dismissible: bool,
        show_diagnostics: bool,
    ) -> Self {
        Self {
            presentation,
            duration,
            dismissible,
            show_diagnostics,
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.duration == Self::PERSISTENT
    }

    /// Severity table default
    pub fn for_severity(severity: Severity) -> Self {
        match severity {
            Severity::Critical => Self::new(Presentation::Modal, Self::PERSISTENT, false, true),
            Severity::High => Self::new(Presentation::Banner, Self::PERSISTENT, true, true),
            Severity::Medium => Self::new(Presentation::Toast, Duration::from_millis(8000), true, false),
            Severity::Low => Self::new(Presentation::Toast, Duration::from_millis(4000), true, false),
        }
    }

    /// Non-blocking variant used when a fallback was served
    ///
    /// The user is informed that data may be stale, but nothing blocks them.
    pub fn passive(self) -> Self {
        let presentation = match self.presentation {
            Presentation::Modal => Presentation::Banner,
            other => other,
        };
        Self {
            presentation,
            dismissible: true,
            ..self
        }
    }
}

/// Picks a [`NotificationStrategy`] for an error
pub struct NotificationStrategySelector {
    strategies: Arc<StrategyRegistry>,
}

impl NotificationStrategySelector {
    pub fn new(strategies: Arc<StrategyRegistry>) -> Self {
        Self { strategies }
    }

    pub fn select(&self, error: &ErrorDetails) -> NotificationStrategy {
        self.strategies
            .get(&error.code)
            .and_then(|s| s.notification)
            .unwrap_or_else(|| NotificationStrategy::for_severity(error.severity))
    }
}

/// What the UI receives: presentation parameters plus the full error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(flatten)]
    pub strategy: NotificationStrategy,
    pub error: ErrorDetails,
}

impl Notification {
    pub fn new(strategy: NotificationStrategy, error: ErrorDetails) -> Self {
        Self { strategy, error }
    }
}
