//! Tether Watch - follow a real-time channel with full resilience
//!
//! This binary combines:
//! - Configuration file plus TETHER__ environment overrides
//! - The WebSocket transport with bounded reconnects
//! - Notification logging (what a UI would render)
//!
//! Runs until Ctrl-C or until the channel is abandoned.

#[path = "../common.rs"]
mod common;

use anyhow::{Context, Result};
use clap::Parser;
use common::{init_logging, log_notifications, print_stats, CommonArgs};
use std::sync::Arc;
use tether_core::channel::{Phase, WILDCARD};
use tether_core::{Resilience, WsConnector};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// WebSocket endpoint (overrides channel.url)
    #[arg(short, long)]
    url: Option<String>,

    /// Topic to subscribe to (repeatable; adds to channel.topics)
    #[arg(short, long = "topic")]
    topics: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();
    let config = args.common.load_config()?;

    // Initialize logging
    init_logging(&config)?;

    tracing::info!("=== Tether: channel watch ===");

    let url = args
        .url
        .clone()
        .or_else(|| config.channel.url.clone())
        .context("No endpoint given: pass --url or set channel.url")?;
    let connector = WsConnector::new(&url).with_context(|| format!("Invalid endpoint {url}"))?;
    let mut topics = config.channel.topics.clone();
    topics.extend(args.topics.iter().cloned());

    let resilience = Resilience::from_config(config)?;
    log_notifications(&resilience);

    let manager = resilience.connection_manager(Arc::new(connector));
    manager.on_event(WILDCARD, |event| {
        tracing::info!(
            event_type = %event.event_type,
            timestamp = event.timestamp.as_deref().unwrap_or("-"),
            "{}",
            event.data
        );
    });
    for topic in &topics {
        manager.subscribe(topic);
    }

    tracing::info!("Endpoint: {}", url);
    tracing::info!("Topics: {:?}", topics);
    manager.open()?;

    let mut snapshots = manager.watch();
    let abandoned = snapshots.wait_for(|s| s.phase == Phase::Abandoned);

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            tracing::info!("Shutdown requested");
        }
        _ = abandoned => {
            tracing::error!("Channel abandoned; exiting");
        }
    }

    manager.close();
    print_stats(&resilience, &manager.stats());

    Ok(())
}
