//! Common utilities for all binaries
//!
//! Shared initialization, CLI parsing, and setup code.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use tether_core::notify::Presentation;
use tether_core::{Notification, Resilience, Severity, TetherConfig};

/// Common CLI arguments for all binaries
#[derive(Args, Debug)]
pub struct CommonArgs {
    /// TOML configuration file (defaults plus TETHER__ overrides when omitted)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (overrides the config file)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Emit JSON log lines
    #[arg(long)]
    pub json_logs: bool,
}

impl CommonArgs {
    /// Load configuration, applying CLI overrides on top
    pub fn load_config(&self) -> Result<TetherConfig> {
        let mut config = match &self.config {
            Some(path) => TetherConfig::load(path)?,
            None => TetherConfig::from_env().context("Failed to load configuration from environment")?,
        };
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.json_logs {
            config.logging.json = true;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Initialize tracing/logging from the `[logging]` section
pub fn init_logging(config: &TetherConfig) -> Result<()> {
    tether_core::utils::init_logger(&config.logging.level, config.logging.json)
}

/// Log every published notification at a level matching its severity
pub fn log_notifications(resilience: &Resilience) {
    // Kept for the lifetime of the process
    let _subscription = resilience.bus().subscribe(|n: &Notification| {
        let error = &n.error;
        let presentation = match n.strategy.presentation {
            Presentation::Modal => "modal",
            Presentation::Banner => "banner",
            Presentation::Toast => "toast",
        };
        match error.severity {
            Severity::Critical | Severity::High => tracing::error!(
                id = %error.id,
                code = %error.code,
                presentation,
                actions = ?error.suggested_actions,
                "{}",
                error.message
            ),
            Severity::Medium | Severity::Low => tracing::warn!(
                id = %error.id,
                code = %error.code,
                presentation,
                "{}",
                error.message
            ),
        }
        Ok(())
    });
}

/// Print final statistics
pub fn print_stats(resilience: &Resilience, stats: &tether_core::channel::ConnectionStats) {
    tracing::info!("=== Final Statistics ===");
    tracing::info!("Connects: {} ({} failed attempts)", stats.connects, stats.connect_failures);
    tracing::info!("Disconnects: {}", stats.disconnects);
    tracing::info!("Reconnects: {}", stats.reconnects);
    tracing::info!("Events received: {}", stats.events_received);
    tracing::info!("Malformed frames: {}", stats.malformed_frames);

    let bus = resilience.bus().stats();
    tracing::info!(
        "Notifications: {} delivered, {} suppressed",
        bus.delivered,
        bus.suppressed
    );

    if let Some(metrics) = resilience.metrics() {
        match metrics.gather_text() {
            Ok(text) => tracing::debug!("Metrics:\n{}", text),
            Err(e) => tracing::warn!("Failed to render metrics: {}", e),
        }
    }
}
