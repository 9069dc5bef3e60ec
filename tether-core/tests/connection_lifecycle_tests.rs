//! Connection Lifecycle Integration Tests
//!
//! Exercises the connection manager against the in-memory transport:
//! 1. Topics requested before connecting are declared once connected
//! 2. Drops reconnect with backoff and re-declare every topic
//! 3. The attempt budget ends in `abandoned` with one critical notification
//! 4. An explicit close always lands in `disconnected`
//!
//! Time is paused, so backoff delays elapse instantly.

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tether_core::channel::{ConnectionManager, MemoryConnector, Phase, ReconnectSettings};
use tether_core::classify::codes;
use tether_core::notify::Presentation;
use tether_core::prelude::*;

// ============================================================================
// HELPERS
// ============================================================================

struct Harness {
    connector: MemoryConnector,
    manager: ConnectionManager,
    resilience: Resilience,
    published: Arc<Mutex<Vec<Notification>>>,
}

fn harness(max_attempts: u32, stale_after_ms: Option<u64>) -> Harness {
    let mut config = TetherConfig::default();
    config.channel.name = "alerts".to_string();
    config.channel.stale_after_ms = stale_after_ms;
    config.reconnect = ReconnectSettings {
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(1000),
        max_attempts,
        jitter: 0.0,
    };
    let resilience = Resilience::from_config(config).unwrap();

    let published = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&published);
    resilience.bus().subscribe(move |n: &Notification| {
        sink.lock().push(n.clone());
        Ok(())
    });

    let connector = MemoryConnector::new();
    let manager = resilience.connection_manager(Arc::new(connector.clone()));
    Harness {
        connector,
        manager,
        resilience,
        published,
    }
}

async fn wait_for(manager: &ConnectionManager, phase: Phase) {
    let mut rx = manager.watch();
    rx.wait_for(|s| s.phase == phase).await.unwrap();
}

/// Let the driver task drain what it has been handed
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

fn frames(connector: &MemoryConnector) -> Vec<Value> {
    connector
        .sent()
        .iter()
        .map(|text| serde_json::from_str(text).unwrap())
        .collect()
}

// ============================================================================
// SUBSCRIPTIONS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_topics_declared_on_connect() {
    let h = harness(5, None);

    assert!(h.manager.subscribe("orders"));
    assert!(h.manager.subscribe("alerts"));
    assert!(!h.manager.subscribe("orders"));
    // Nothing goes out before the link exists
    assert!(h.connector.sent().is_empty());

    h.manager.open().unwrap();
    wait_for(&h.manager, Phase::Connected).await;
    settle().await;

    assert_eq!(
        frames(&h.connector),
        vec![json!({"type": "subscribe", "topics": ["alerts", "orders"]})]
    );

    // Live subscriptions go out immediately
    assert!(h.manager.subscribe("audit"));
    assert!(h.manager.unsubscribe("orders"));
    settle().await;

    let sent = frames(&h.connector);
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[1], json!({"type": "subscribe", "topics": ["audit"]}));
    assert_eq!(sent[2], json!({"type": "unsubscribe", "topics": ["orders"]}));
    assert_eq!(h.manager.snapshot().topics, vec!["alerts", "audit"]);

    h.manager.close();
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_redeclares_topics() {
    let h = harness(5, None);
    h.manager.subscribe("orders");
    h.manager.open().unwrap();
    wait_for(&h.manager, Phase::Connected).await;
    settle().await;

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    h.manager.on_event("order.created", move |e| sink.lock().push(e.data.clone()));

    h.connector.refuse_next(1);
    assert!(h.connector.drop_connection(Some(1006), Some("abnormal closure")));
    wait_for(&h.manager, Phase::Reconnecting).await;
    wait_for(&h.manager, Phase::Connected).await;
    settle().await;

    // Initial connect, one refused reconnect, one accepted
    assert_eq!(h.connector.connect_attempts(), 3);
    let subscribes: Vec<_> = frames(&h.connector)
        .into_iter()
        .filter(|f| f["type"] == "subscribe")
        .collect();
    assert_eq!(subscribes.len(), 2);
    assert_eq!(subscribes[1]["topics"], json!(["orders"]));

    let stats = h.manager.stats();
    assert_eq!(stats.connects, 2);
    assert_eq!(stats.disconnects, 1);
    assert_eq!(stats.connect_failures, 1);
    assert_eq!(h.manager.snapshot().attempt, 0);

    // Drop and refused connect are both reported, as transient failures
    {
        let published = h.published.lock();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].error.code, codes::CHANNEL_CLOSED);
        assert_eq!(published[1].error.code, codes::CHANNEL_ERROR);
        assert!(published.iter().all(|n| n.error.severity == Severity::Medium));
        assert_eq!(published[0].error.context["channel"], json!("alerts"));
    }

    h.connector
        .push(r#"{"type":"order.created","data":{"id":7},"timestamp":"2024-01-01T00:00:00Z"}"#);
    settle().await;
    assert_eq!(*events.lock(), vec![json!({"id": 7})]);

    h.manager.close();
}

// ============================================================================
// ABANDON AND CLOSE
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_abandons_after_attempt_budget() {
    let h = harness(5, None);
    h.connector.refuse_all(true);

    h.manager.open().unwrap();
    wait_for(&h.manager, Phase::Abandoned).await;

    assert_eq!(h.connector.connect_attempts(), 5);
    assert_eq!(h.manager.stats().abandoned, 1);

    let published = h.published.lock();
    let critical: Vec<_> = published
        .iter()
        .filter(|n| n.error.severity == Severity::Critical)
        .collect();
    assert_eq!(critical.len(), 1);
    let abandoned = critical[0];
    assert_eq!(abandoned.error.code, codes::CHANNEL_ABANDONED);
    assert!(!abandoned.error.retryable);
    assert_eq!(abandoned.strategy.presentation, Presentation::Modal);
    assert!(!abandoned.strategy.dismissible);
    assert_eq!(abandoned.error.suggested_actions, vec!["Reload to reconnect"]);
    drop(published);

    // No further attempts once abandoned
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.connector.connect_attempts(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_open_again_after_abandon() {
    let h = harness(2, None);
    h.connector.refuse_all(true);
    h.manager.open().unwrap();
    wait_for(&h.manager, Phase::Abandoned).await;

    h.connector.refuse_all(false);
    h.manager.open().unwrap();
    wait_for(&h.manager, Phase::Connected).await;
    assert!(h.connector.is_connected());
    h.manager.close();
}

#[tokio::test(start_paused = true)]
async fn test_close_while_reconnecting_never_abandons() {
    let h = harness(3, None);
    h.manager.subscribe("orders");
    h.connector.refuse_all(true);
    h.manager.open().unwrap();
    wait_for(&h.manager, Phase::Reconnecting).await;

    h.manager.close();
    assert_eq!(h.manager.phase(), Phase::Disconnected);
    assert!(h.manager.snapshot().topics.is_empty());

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.manager.phase(), Phase::Disconnected);
    assert_eq!(h.manager.stats().abandoned, 0);
    assert!(h
        .published
        .lock()
        .iter()
        .all(|n| n.error.code != codes::CHANNEL_ABANDONED));
}

#[tokio::test(start_paused = true)]
async fn test_close_while_connected_closes_transport() {
    let h = harness(5, None);
    h.manager.open().unwrap();
    wait_for(&h.manager, Phase::Connected).await;

    h.manager.close();
    settle().await;

    assert_eq!(h.manager.phase(), Phase::Disconnected);
    assert_eq!(h.connector.client_closes(), 1);
    assert!(!h.connector.is_connected());
    assert!(h.published.lock().is_empty());
}

// ============================================================================
// STALE LINKS AND METRICS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_silent_link_is_treated_as_dropped() {
    let h = harness(5, Some(5_000));
    h.manager.open().unwrap();
    wait_for(&h.manager, Phase::Connected).await;

    // Traffic keeps the link alive
    tokio::time::sleep(Duration::from_secs(3)).await;
    h.connector.push(r#"{"type":"ping","data":null}"#);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(h.manager.phase(), Phase::Connected);

    wait_for(&h.manager, Phase::Reconnecting).await;
    assert_eq!(h.manager.stats().disconnects, 1);
    assert_eq!(h.published.lock()[0].error.code, codes::CHANNEL_ERROR);

    h.manager.close();
}

#[tokio::test(start_paused = true)]
async fn test_channel_metrics_exported() {
    let h = harness(2, None);
    h.connector.refuse_all(true);
    h.manager.open().unwrap();
    wait_for(&h.manager, Phase::Abandoned).await;

    let text = h.resilience.metrics().unwrap().gather_text().unwrap();
    assert!(text.contains(r#"tether_channel_abandoned_total{channel="alerts"} 1"#));
    assert!(text.contains(r#"tether_channel_connect_attempts_total{channel="alerts"} 2"#));
}
