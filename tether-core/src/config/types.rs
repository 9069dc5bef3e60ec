use crate::channel::ReconnectSettings;
use crate::core::Severity;
use crate::fallback::{FallbackBehavior, Substitute};
use crate::notify::{NotificationStrategy, Presentation};
use crate::retry::RetryPolicy;
use crate::strategy::{RecoveryStrategy, StrategyRegistry};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Main configuration structure
///
/// Every section has defaults, so an empty file is a valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    /// Default retry policy for codes without a strategy
    pub retry: RetryPolicy,
    pub reconnect: ReconnectSettings,
    pub channel: ChannelConfig,
    pub notifications: NotificationConfig,
    pub fallback: FallbackConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
    /// Per-code recovery strategies
    pub strategies: Vec<StrategyConfig>,
}

/// Real-time channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Name used in logs, metrics and error context
    pub name: String,

    /// WebSocket endpoint (ws:// or wss://)
    pub url: Option<String>,

    /// Topics subscribed on startup
    pub topics: Vec<String>,

    /// Treat the link as dropped after this long without a frame
    pub stale_after_ms: Option<u64>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: "events".to_string(),
            url: None,
            topics: Vec::new(),
            stale_after_ms: None,
        }
    }
}

impl ChannelConfig {
    pub fn stale_after(&self) -> Option<Duration> {
        self.stale_after_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Countdown granularity for retry progress (0 disables countdowns)
    pub progress_tick_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            progress_tick_ms: 1000,
        }
    }
}

impl NotificationConfig {
    pub fn progress_tick(&self) -> Option<Duration> {
        (self.progress_tick_ms > 0).then(|| Duration::from_millis(self.progress_tick_ms))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Cached payloads older than this are not served (None = no expiry)
    pub cache_max_age_secs: Option<u64>,
}

impl FallbackConfig {
    pub fn cache_max_age(&self) -> Option<Duration> {
        self.cache_max_age_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// One `[[strategies]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub code: String,

    #[serde(default)]
    pub retry: Option<RetryPolicy>,

    #[serde(default)]
    pub retryable: Option<bool>,

    #[serde(default)]
    pub severity: Option<Severity>,

    #[serde(default)]
    pub suggested_actions: Vec<String>,

    #[serde(default)]
    pub fallback: Option<FallbackSpec>,

    #[serde(default)]
    pub notification: Option<NotificationSpec>,
}

/// Declarative fallback behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FallbackSpec {
    Cache,
    SubstituteData {
        payload: Value,
    },
    /// Empty `collection` plus the error message
    FailureState {
        collection: String,
    },
    DegradedMode {
        message: String,
        #[serde(default)]
        disabled_features: Vec<String>,
    },
    OfflineMode {
        message: String,
    },
}

impl FallbackSpec {
    pub fn to_behavior(&self) -> FallbackBehavior {
        match self {
            Self::Cache => FallbackBehavior::Cache,
            Self::SubstituteData { payload } => {
                FallbackBehavior::SubstituteData(Substitute::Static(payload.clone()))
            }
            Self::FailureState { collection } => {
                FallbackBehavior::SubstituteData(Substitute::failure_state(collection.clone()))
            }
            Self::DegradedMode {
                message,
                disabled_features,
            } => FallbackBehavior::DegradedMode {
                message: message.clone(),
                disabled_features: disabled_features.clone(),
            },
            Self::OfflineMode { message } => FallbackBehavior::OfflineMode {
                message: message.clone(),
            },
        }
    }
}

/// Declarative notification override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSpec {
    pub presentation: Presentation,
    /// 0 = persistent
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default = "default_true")]
    pub dismissible: bool,
    #[serde(default)]
    pub show_diagnostics: bool,
}

fn default_true() -> bool {
    true
}

impl From<NotificationSpec> for NotificationStrategy {
    fn from(spec: NotificationSpec) -> Self {
        NotificationStrategy::new(
            spec.presentation,
            Duration::from_millis(spec.duration_ms),
            spec.dismissible,
            spec.show_diagnostics,
        )
    }
}

impl StrategyConfig {
    /// Build the runtime strategy; without a `retry` table the engine's
    /// default policy applies
    pub fn to_strategy(&self) -> RecoveryStrategy {
        let mut strategy = RecoveryStrategy::new(&self.code)
            .with_suggested_actions(self.suggested_actions.iter().cloned());
        strategy.retry_policy = self.retry.clone();
        strategy.retryable = self.retryable;
        strategy.severity = self.severity;
        strategy.fallback = self.fallback.as_ref().map(FallbackSpec::to_behavior);
        strategy.notification = self.notification.map(Into::into);
        strategy
    }
}

impl TetherConfig {
    /// Registry holding every configured strategy
    pub fn strategy_registry(&self) -> StrategyRegistry {
        let registry = StrategyRegistry::new();
        for entry in &self.strategies {
            registry.register(entry.to_strategy());
        }
        registry
    }
}
