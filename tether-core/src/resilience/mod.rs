//! Wiring for a complete resilience layer
//!
//! [`Resilience`] builds every component from one [`TetherConfig`] and shares
//! a single strategy registry, suppression set and listener bus between
//! them, so a strategy registered once applies to classification, retry,
//! fallback and notification alike.

use crate::bus::{ErrorListenerBus, SuppressionRegistry};
use crate::channel::{ConnectionManager, Connector};
use crate::classify::ErrorClassifier;
use crate::config::TetherConfig;
use crate::fallback::FallbackProvider;
use crate::monitoring::MetricsRegistry;
use crate::notify::NotificationStrategySelector;
use crate::recovery::{RecoveryOrchestrator, Supervisor};
use crate::retry::RetryPolicyEngine;
use crate::strategy::StrategyRegistry;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct Resilience {
    config: Arc<TetherConfig>,
    metrics: Option<MetricsRegistry>,
    strategies: Arc<StrategyRegistry>,
    classifier: Arc<ErrorClassifier>,
    engine: Arc<RetryPolicyEngine>,
    fallback: Arc<FallbackProvider>,
    selector: Arc<NotificationStrategySelector>,
    bus: ErrorListenerBus,
    orchestrator: Arc<RecoveryOrchestrator>,
    supervisor: Supervisor,
}

impl Resilience {
    /// Build every component from `config`
    ///
    /// Fails only when metrics are enabled and the collectors cannot be
    /// registered.
    pub fn from_config(config: TetherConfig) -> Result<Self> {
        let metrics = if config.metrics.enabled {
            Some(MetricsRegistry::new().context("Failed to register metrics")?)
        } else {
            None
        };

        let strategies = Arc::new(config.strategy_registry());
        let suppression = Arc::new(SuppressionRegistry::new());

        let mut classifier = ErrorClassifier::new(strategies.clone());
        let mut engine = RetryPolicyEngine::new(strategies.clone(), config.retry.clone())
            .with_progress_tick(config.notifications.progress_tick());
        let mut fallback =
            FallbackProvider::new(strategies.clone()).with_max_age(config.fallback.cache_max_age());
        let bus = match &metrics {
            Some(m) => ErrorListenerBus::with_metrics(suppression, m.clone()),
            None => ErrorListenerBus::new(suppression),
        };
        if let Some(m) = &metrics {
            classifier = classifier.with_metrics(m.clone());
            engine = engine.with_metrics(m.clone());
            fallback = fallback.with_metrics(m.clone());
        }

        let classifier = Arc::new(classifier);
        let engine = Arc::new(engine);
        let fallback = Arc::new(fallback);
        let selector = Arc::new(NotificationStrategySelector::new(strategies.clone()));

        let orchestrator = Arc::new(RecoveryOrchestrator::new(
            classifier.clone(),
            engine.clone(),
            fallback.clone(),
            selector.clone(),
            bus.clone(),
        ));
        let supervisor = Supervisor::new(orchestrator.clone());

        info!(
            strategies = strategies.len(),
            max_attempts = config.retry.max_attempts,
            metrics = metrics.is_some(),
            "Resilience layer ready"
        );

        Ok(Self {
            config: Arc::new(config),
            metrics,
            strategies,
            classifier,
            engine,
            fallback,
            selector,
            bus,
            orchestrator,
            supervisor,
        })
    }

    pub fn config(&self) -> &TetherConfig {
        &self.config
    }

    pub fn metrics(&self) -> Option<&MetricsRegistry> {
        self.metrics.as_ref()
    }

    pub fn strategies(&self) -> &Arc<StrategyRegistry> {
        &self.strategies
    }

    pub fn classifier(&self) -> &Arc<ErrorClassifier> {
        &self.classifier
    }

    pub fn engine(&self) -> &Arc<RetryPolicyEngine> {
        &self.engine
    }

    pub fn fallback(&self) -> &Arc<FallbackProvider> {
        &self.fallback
    }

    pub fn selector(&self) -> &Arc<NotificationStrategySelector> {
        &self.selector
    }

    pub fn bus(&self) -> &ErrorListenerBus {
        &self.bus
    }

    pub fn suppression(&self) -> &Arc<SuppressionRegistry> {
        self.bus.suppression()
    }

    pub fn orchestrator(&self) -> &Arc<RecoveryOrchestrator> {
        &self.orchestrator
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Connection manager over `connector`, configured from the `[channel]`
    /// and `[reconnect]` sections and reporting through this layer's bus
    pub fn connection_manager(&self, connector: Arc<dyn Connector>) -> ConnectionManager {
        let mut builder = ConnectionManager::builder(
            connector,
            self.classifier.clone(),
            self.selector.clone(),
            self.bus.clone(),
        )
        .name(self.config.channel.name.clone())
        .settings(self.config.reconnect.clone())
        .stale_after(self.config.channel.stale_after());
        if let Some(metrics) = &self.metrics {
            builder = builder.metrics(metrics.clone());
        }
        builder.build()
    }
}
