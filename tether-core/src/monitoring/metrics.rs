//! Prometheus metrics for the resilience layer
//!
//! Two metric families:
//! - Recovery (classification, retries, fallbacks, notifications)
//! - Channel (connects, reconnects, phase, events)
//!
//! Every service takes the registry optionally; nothing breaks without it.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use tracing::info;

const NAMESPACE: &str = "tether";

/// Central registry for all Prometheus metrics
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Arc<Registry>,
    recovery: Arc<RecoveryMetrics>,
    channel: Arc<ChannelMetrics>,
}

impl MetricsRegistry {
    /// Create a new metrics registry with all metric families
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Arc::new(Registry::new());

        let recovery = Arc::new(RecoveryMetrics::new(&registry)?);
        let channel = Arc::new(ChannelMetrics::new(&registry)?);

        info!("Prometheus metrics registry initialized");

        Ok(Self {
            registry,
            recovery,
            channel,
        })
    }

    /// Get the underlying Prometheus registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn recovery(&self) -> &RecoveryMetrics {
        &self.recovery
    }

    pub fn channel(&self) -> &ChannelMetrics {
        &self.channel
    }

    /// Render every metric in the Prometheus text exposition format
    pub fn gather_text(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> Result<IntCounterVec, prometheus::Error> {
    let metric = IntCounterVec::new(Opts::new(name, help).namespace(NAMESPACE), labels)?;
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

/// Error recovery metrics
pub struct RecoveryMetrics {
    /// Classified failures by category and severity
    pub errors_classified: IntCounterVec,
    /// Retry attempts by outcome (succeeded, failed, exhausted, cancelled)
    pub retries: IntCounterVec,
    /// Fallbacks served by kind
    pub fallbacks: IntCounterVec,
    /// Published notifications by outcome (delivered, suppressed)
    pub notifications: IntCounterVec,
    /// Listener invocations that errored or panicked
    pub listener_failures: IntCounter,
}

impl RecoveryMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let errors_classified = counter_vec(
            registry,
            "errors_classified_total",
            "Total number of classified failures",
            &["category", "severity"],
        )?;
        let retries = counter_vec(registry, "retries_total", "Total number of retry attempts", &["outcome"])?;
        let fallbacks = counter_vec(registry, "fallbacks_total", "Total number of fallbacks served", &["kind"])?;
        let notifications = counter_vec(
            registry,
            "notifications_total",
            "Total number of published notifications",
            &["outcome"],
        )?;

        let listener_failures = IntCounter::new(
            "tether_listener_failures_total",
            "Total number of failed listener invocations",
        )?;
        registry.register(Box::new(listener_failures.clone()))?;

        Ok(Self {
            errors_classified,
            retries,
            fallbacks,
            notifications,
            listener_failures,
        })
    }
}

/// Channel lifecycle metrics, labeled by channel name
pub struct ChannelMetrics {
    pub connect_attempts: IntCounterVec,
    pub disconnects: IntCounterVec,
    pub reconnects: IntCounterVec,
    pub abandoned: IntCounterVec,
    pub events: IntCounterVec,
    /// Current phase (0 disconnected .. 4 abandoned)
    pub phase: IntGaugeVec,
}

impl ChannelMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let connect_attempts = counter_vec(
            registry,
            "channel_connect_attempts_total",
            "Total number of connection attempts",
            &["channel"],
        )?;
        let disconnects = counter_vec(
            registry,
            "channel_disconnects_total",
            "Total number of dropped connections",
            &["channel"],
        )?;
        let reconnects = counter_vec(
            registry,
            "channel_reconnects_total",
            "Total number of reconnect transitions",
            &["channel"],
        )?;
        let abandoned = counter_vec(
            registry,
            "channel_abandoned_total",
            "Total number of channels given up on",
            &["channel"],
        )?;
        let events = counter_vec(registry, "channel_events_total", "Total number of inbound events", &["channel"])?;

        let phase = IntGaugeVec::new(
            Opts::new("channel_phase", "Current connection phase").namespace(NAMESPACE),
            &["channel"],
        )?;
        registry.register(Box::new(phase.clone()))?;

        Ok(Self {
            connect_attempts,
            disconnects,
            reconnects,
            abandoned,
            events,
            phase,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registry_creation() {
        let registry = MetricsRegistry::new().unwrap();
        registry.recovery().listener_failures.inc();
        assert!(!registry.registry().gather().is_empty());
    }

    #[test]
    fn test_text_exposition() {
        let registry = MetricsRegistry::new().unwrap();
        registry
            .recovery()
            .errors_classified
            .with_label_values(&["network", "high"])
            .inc();
        registry.channel().phase.with_label_values(&["events"]).set(2);

        let text = registry.gather_text().unwrap();
        assert!(text.contains("tether_errors_classified_total{category=\"network\",severity=\"high\"} 1"));
        assert!(text.contains("tether_channel_phase{channel=\"events\"} 2"));
    }
}
