//! Fallback dispatch
//!
//! Produces substitute data once the primary operation cannot succeed. The
//! behavior comes from the [`RecoveryStrategy`] registered for the error code;
//! no strategy (or no behavior) means no fallback, and the caller must surface
//! the error instead.
//!
//! The `Cache` behavior serves the most recent successful payload recorded for
//! the same context. Contexts are ordered maps, so the cache key is simply
//! their JSON serialization.
//!
//! [`RecoveryStrategy`]: crate::strategy::RecoveryStrategy

use crate::classify::ANNOTATION_KEYS;
use crate::core::{ErrorContext, ErrorDetails};
use crate::monitoring::MetricsRegistry;
use crate::strategy::StrategyRegistry;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Generator for substitute payloads
pub type SubstituteFn = Arc<dyn Fn(&ErrorDetails) -> Value + Send + Sync>;

/// Source of a substitute payload
#[derive(Clone)]
pub enum Substitute {
    Static(Value),
    Generated(SubstituteFn),
}

impl Substitute {
    pub fn generated<F>(f: F) -> Self
    where
        F: Fn(&ErrorDetails) -> Value + Send + Sync + 'static,
    {
        Self::Generated(Arc::new(f))
    }

    /// Empty collection plus the error message, so lists render as "nothing
    /// to show" with an explanation
    pub fn failure_state(collection: impl Into<String>) -> Self {
        let collection = collection.into();
        Self::generated(move |error| {
            let mut payload = Map::new();
            payload.insert(collection.clone(), Value::Array(Vec::new()));
            payload.insert("message".to_string(), error.message.clone().into());
            payload.insert("code".to_string(), error.code.clone().into());
            Value::Object(payload)
        })
    }

    fn produce(&self, error: &ErrorDetails) -> Value {
        match self {
            Self::Static(value) => value.clone(),
            Self::Generated(f) => f(error),
        }
    }
}

impl fmt::Debug for Substitute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(value) => f.debug_tuple("Static").field(value).finish(),
            Self::Generated(_) => f.write_str("Generated(<fn>)"),
        }
    }
}

/// What to substitute for a failed operation
#[derive(Debug, Clone)]
pub enum FallbackBehavior {
    /// Last successful payload for the same context
    Cache,
    SubstituteData(Substitute),
    /// Keep working with reduced functionality
    DegradedMode {
        message: String,
        disabled_features: Vec<String>,
    },
    /// Operate from cached data only
    OfflineMode { message: String },
}

impl FallbackBehavior {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::SubstituteData(_) => "substitute-data",
            Self::DegradedMode { .. } => "degraded-mode",
            Self::OfflineMode { .. } => "offline-mode",
        }
    }
}

/// A served fallback
#[derive(Debug, Clone, PartialEq)]
pub enum FallbackValue {
    Cached {
        payload: Value,
        stored_at: DateTime<Utc>,
    },
    Substitute(Value),
    /// Marker: reduced functionality
    Degraded {
        message: String,
        disabled_features: Vec<String>,
    },
    /// Marker: cached-only operation
    Offline { message: String },
}

impl FallbackValue {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Cached { .. } => "cache",
            Self::Substitute(_) => "substitute-data",
            Self::Degraded { .. } => "degraded-mode",
            Self::Offline { .. } => "offline-mode",
        }
    }

    /// Data payload, if this fallback carries one
    pub fn payload(&self) -> Option<&Value> {
        match self {
            Self::Cached { payload, .. } => Some(payload),
            Self::Substitute(payload) => Some(payload),
            Self::Degraded { .. } | Self::Offline { .. } => None,
        }
    }

    /// Decode the payload into the operation's result type
    pub fn decode<T: DeserializeOwned>(&self) -> Option<T> {
        self.payload()
            .and_then(|payload| serde_json::from_value(payload.clone()).ok())
    }

    /// Whether the user should be told that data may be stale or partial
    pub fn is_marker(&self) -> bool {
        self.payload().is_none()
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: Value,
    stored_at: DateTime<Utc>,
    recorded: Instant,
}

/// Resolves fallbacks from strategies and a success cache
pub struct FallbackProvider {
    strategies: Arc<StrategyRegistry>,
    cache: DashMap<String, CacheEntry>,
    /// Entries older than this are ignored (None = never expire)
    max_age: Option<Duration>,
    metrics: Option<MetricsRegistry>,
}

impl FallbackProvider {
    pub fn new(strategies: Arc<StrategyRegistry>) -> Self {
        Self {
            strategies,
            cache: DashMap::new(),
            max_age: None,
            metrics: None,
        }
    }

    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Remember a successful payload for `context`
    ///
    /// An empty context identifies nothing in particular and is not cached.
    pub fn record_success(&self, context: &ErrorContext, payload: Value) {
        let Some(key) = cache_key(context) else {
            return;
        };
        trace!(%key, "Recording successful payload");
        self.cache.insert(
            key,
            CacheEntry {
                payload,
                stored_at: Utc::now(),
                recorded: Instant::now(),
            },
        );
    }

    /// Fallback for `error`, or None when nothing can be substituted
    pub fn fallback(&self, error: &ErrorDetails) -> Option<FallbackValue> {
        let strategy = self.strategies.get(&error.code)?;
        let behavior = strategy.fallback.as_ref()?;

        let value = match behavior {
            FallbackBehavior::Cache => self.cached(&error.context),
            FallbackBehavior::SubstituteData(substitute) => {
                Some(FallbackValue::Substitute(substitute.produce(error)))
            }
            FallbackBehavior::DegradedMode {
                message,
                disabled_features,
            } => Some(FallbackValue::Degraded {
                message: message.clone(),
                disabled_features: disabled_features.clone(),
            }),
            FallbackBehavior::OfflineMode { message } => Some(FallbackValue::Offline {
                message: message.clone(),
            }),
        };

        match &value {
            Some(v) => {
                debug!(id = %error.id, code = %error.code, kind = v.kind(), "Serving fallback");
                if let Some(metrics) = &self.metrics {
                    metrics.recovery().fallbacks.with_label_values(&[v.kind()]).inc();
                }
            }
            None => debug!(id = %error.id, code = %error.code, "No cached payload for context"),
        }
        value
    }

    /// Drop the cached payload for `context`
    pub fn invalidate(&self, context: &ErrorContext) -> bool {
        cache_key(context).is_some_and(|key| self.cache.remove(&key).is_some())
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    fn cached(&self, context: &ErrorContext) -> Option<FallbackValue> {
        let key = cache_key(context)?;
        let entry = self.cache.get(&key)?;
        if let Some(max_age) = self.max_age {
            if entry.recorded.elapsed() > max_age {
                trace!(%key, "Cached payload expired");
                return None;
            }
        }
        Some(FallbackValue::Cached {
            payload: entry.payload.clone(),
            stored_at: entry.stored_at,
        })
    }
}

fn cache_key(context: &ErrorContext) -> Option<String> {
    let caller: ErrorContext = context
        .iter()
        .filter(|(k, _)| !ANNOTATION_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if caller.is_empty() {
        return None;
    }
    serde_json::to_string(&caller).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ErrorCategory, Severity};
    use crate::strategy::RecoveryStrategy;
    use serde_json::json;

    fn context(widget: &str) -> ErrorContext {
        let mut context = ErrorContext::new();
        context.insert("widget".to_string(), json!(widget));
        context
    }

    fn error(code: &str, context: ErrorContext) -> ErrorDetails {
        ErrorDetails::new(code, "failed", ErrorCategory::Network, Severity::High).with_context(context)
    }

    fn provider_with(behavior: FallbackBehavior) -> FallbackProvider {
        let registry = Arc::new(StrategyRegistry::new());
        registry.register(RecoveryStrategy::new("HTTP_503").with_fallback(behavior));
        FallbackProvider::new(registry)
    }

    #[test]
    fn test_no_strategy_means_no_fallback() {
        let provider = FallbackProvider::new(Arc::new(StrategyRegistry::new()));
        assert!(provider.fallback(&error("HTTP_503", context("a"))).is_none());

        let registry = Arc::new(StrategyRegistry::new());
        registry.register(RecoveryStrategy::new("HTTP_503"));
        let provider = FallbackProvider::new(registry);
        assert!(provider.fallback(&error("HTTP_503", context("a"))).is_none());
    }

    #[test]
    fn test_cache_serves_last_success_for_context() {
        let provider = provider_with(FallbackBehavior::Cache);
        assert!(provider.fallback(&error("HTTP_503", context("alerts"))).is_none());

        provider.record_success(&context("alerts"), json!([1]));
        provider.record_success(&context("alerts"), json!([1, 2]));
        provider.record_success(&context("audit"), json!(["x"]));

        let value = provider.fallback(&error("HTTP_503", context("alerts"))).unwrap();
        assert_eq!(value.payload(), Some(&json!([1, 2])));
        assert_eq!(value.decode::<Vec<u32>>(), Some(vec![1, 2]));
        assert_eq!(value.kind(), "cache");
    }

    #[test]
    fn test_cache_ignores_classifier_annotations() {
        let provider = provider_with(FallbackBehavior::Cache);
        provider.record_success(&context("alerts"), json!("ok"));

        let annotated = error("HTTP_503", context("alerts")).with_context_value("requiresReauth", true);
        assert!(provider.fallback(&annotated).is_some());
    }

    #[test]
    fn test_empty_context_is_not_cached() {
        let provider = provider_with(FallbackBehavior::Cache);
        provider.record_success(&ErrorContext::new(), json!("ok"));
        assert_eq!(provider.cached_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_max_age() {
        let provider = provider_with(FallbackBehavior::Cache).with_max_age(Some(Duration::from_secs(60)));
        provider.record_success(&context("alerts"), json!("ok"));
        assert!(provider.fallback(&error("HTTP_503", context("alerts"))).is_some());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(provider.fallback(&error("HTTP_503", context("alerts"))).is_none());
    }

    #[test]
    fn test_invalidate_and_clear() {
        let provider = provider_with(FallbackBehavior::Cache);
        provider.record_success(&context("a"), json!(1));
        provider.record_success(&context("b"), json!(2));

        assert!(provider.invalidate(&context("a")));
        assert!(!provider.invalidate(&context("a")));
        assert_eq!(provider.cached_len(), 1);

        provider.clear();
        assert_eq!(provider.cached_len(), 0);
    }

    #[test]
    fn test_substitute_failure_state() {
        let provider = provider_with(FallbackBehavior::SubstituteData(Substitute::failure_state("items")));
        let value = provider.fallback(&error("HTTP_503", ErrorContext::new())).unwrap();
        let payload = value.payload().unwrap();
        assert_eq!(payload["items"], json!([]));
        assert_eq!(payload["message"], json!("failed"));
    }

    #[test]
    fn test_markers() {
        let provider = provider_with(FallbackBehavior::DegradedMode {
            message: "Charts unavailable".to_string(),
            disabled_features: vec!["charts".to_string()],
        });
        let value = provider.fallback(&error("HTTP_503", ErrorContext::new())).unwrap();
        assert!(value.is_marker());
        assert_eq!(value.kind(), "degraded-mode");

        let provider = provider_with(FallbackBehavior::OfflineMode {
            message: "Offline".to_string(),
        });
        let value = provider.fallback(&error("HTTP_503", ErrorContext::new())).unwrap();
        assert_eq!(
            value,
            FallbackValue::Offline {
                message: "Offline".to_string()
            }
        );
    }
}
