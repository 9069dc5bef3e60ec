//! Connection manager
//!
//! Owns one long-lived channel: connects, detects drops, reconnects with
//! bounded exponential backoff and re-declares every subscribed topic after
//! each successful connect.
//!
//! All I/O happens on a single driver task spawned by [`open`]. The public
//! API only mutates the shared [`ConnectionState`] under a short lock and
//! hands frames to the driver through a command queue. Every driver carries
//! the generation it was spawned with; [`close`] and a later [`open`] bump the
//! generation, so a stale driver can never touch the state again.
//!
//! [`open`]: ConnectionManager::open
//! [`close`]: ConnectionManager::close

use super::frame::{ChannelEvent, OutboundFrame};
use super::state::{
    ConnectionSnapshot, ConnectionState, ConnectionStats, Phase, ReconnectDecision, ReconnectSettings,
};
use super::transport::{Channel, Connector, Incoming};
use crate::bus::ErrorListenerBus;
use crate::classify::{codes, ChannelFault, ErrorClassifier};
use crate::core::{ConnectionError, ErrorCategory, ErrorContext, ErrorDetails, Severity, TransportError};
use crate::monitoring::MetricsRegistry;
use crate::notify::{Notification, NotificationStrategySelector};
use crate::utils::panic_message;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Handler key that receives every event
pub const WILDCARD: &str = "*";

/// Identifies a registered event handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type EventHandler = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

enum Command {
    Send(OutboundFrame),
    Close,
}

/// How a connected session ended
enum SessionEnd {
    Lost(ChannelFault),
    Closed,
}

struct Shared {
    name: String,
    connector: Arc<dyn Connector>,
    settings: ReconnectSettings,
    stale_after: Option<Duration>,
    classifier: Arc<ErrorClassifier>,
    selector: Arc<NotificationStrategySelector>,
    bus: ErrorListenerBus,
    state: Mutex<ConnectionState>,
    generation: AtomicU64,
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    handlers: RwLock<HashMap<String, Vec<(HandlerId, EventHandler)>>>,
    next_handler: AtomicU64,
    snapshots: watch::Sender<ConnectionSnapshot>,
    metrics: Option<MetricsRegistry>,
}

/// Builder for [`ConnectionManager`]
pub struct ConnectionManagerBuilder {
    name: String,
    connector: Arc<dyn Connector>,
    settings: ReconnectSettings,
    stale_after: Option<Duration>,
    classifier: Arc<ErrorClassifier>,
    selector: Arc<NotificationStrategySelector>,
    bus: ErrorListenerBus,
    metrics: Option<MetricsRegistry>,
}

impl ConnectionManagerBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn settings(mut self, settings: ReconnectSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Treat the link as dropped when nothing arrives for this long
    pub fn stale_after(mut self, stale_after: Option<Duration>) -> Self {
        self.stale_after = stale_after.filter(|d| !d.is_zero());
        self
    }

    pub fn metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> ConnectionManager {
        let (snapshots, _) = watch::channel(ConnectionSnapshot::default());
        ConnectionManager {
            shared: Arc::new(Shared {
                name: self.name,
                connector: self.connector,
                settings: self.settings,
                stale_after: self.stale_after,
                classifier: self.classifier,
                selector: self.selector,
                bus: self.bus,
                state: Mutex::new(ConnectionState::new()),
                generation: AtomicU64::new(0),
                commands: Mutex::new(None),
                handlers: RwLock::new(HashMap::new()),
                next_handler: AtomicU64::new(1),
                snapshots,
                metrics: self.metrics,
            }),
        }
    }
}

/// Handle to a managed channel; clones share the same channel
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn builder(
        connector: Arc<dyn Connector>,
        classifier: Arc<ErrorClassifier>,
        selector: Arc<NotificationStrategySelector>,
        bus: ErrorListenerBus,
    ) -> ConnectionManagerBuilder {
        ConnectionManagerBuilder {
            name: "channel".to_string(),
            connector,
            settings: ReconnectSettings::default(),
            stale_after: None,
            classifier,
            selector,
            bus,
            metrics: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn phase(&self) -> Phase {
        self.shared.state.lock().phase()
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.shared.state.lock().snapshot()
    }

    /// Receiver that observes every phase change
    pub fn watch(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.shared.snapshots.subscribe()
    }

    pub fn stats(&self) -> ConnectionStats {
        *self.shared.state.lock().stats()
    }

    /// Start connecting (from `disconnected` or `abandoned`)
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(&self) -> Result<(), ConnectionError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ConnectionError::NoRuntime)?;
        let shared = &self.shared;

        let (tx, rx) = mpsc::unbounded_channel();
        let generation = {
            let mut state = shared.state.lock();
            state
                .open()
                .map_err(|e| ConnectionError::AlreadyOpen(e.from))?;
            *shared.commands.lock() = Some(tx);
            shared.publish_snapshot(&state);
            shared.generation.fetch_add(1, Ordering::SeqCst) + 1
        };

        info!(channel = %shared.name, endpoint = %shared.connector.endpoint(), "Opening channel");
        runtime.spawn(Arc::clone(shared).drive(generation, rx));
        Ok(())
    }

    /// Explicit close from any phase; never lands in `abandoned`
    ///
    /// Forgets every topic and stops the pending reconnect timer.
    pub fn close(&self) {
        let shared = &self.shared;
        let previous = {
            let mut state = shared.state.lock();
            shared.generation.fetch_add(1, Ordering::SeqCst);
            let previous = state.close();
            shared.publish_snapshot(&state);
            previous
        };

        if let Some(commands) = shared.commands.lock().take() {
            let _ = commands.send(Command::Close);
        }
        info!(channel = %shared.name, from = %previous, "Channel closed");
    }

    /// Add a topic; declared now if connected, otherwise on the next connect
    ///
    /// Returns false if the topic was already subscribed.
    pub fn subscribe(&self, topic: &str) -> bool {
        let mut state = self.shared.state.lock();
        if !state.subscribe(topic) {
            return false;
        }
        debug!(channel = %self.shared.name, topic, phase = %state.phase(), "Topic subscribed");
        if state.phase() == Phase::Connected {
            self.shared.command(Command::Send(OutboundFrame::subscribe([topic])));
        }
        self.shared.publish_snapshot(&state);
        true
    }

    pub fn unsubscribe(&self, topic: &str) -> bool {
        let mut state = self.shared.state.lock();
        if !state.unsubscribe(topic) {
            return false;
        }
        if state.phase() == Phase::Connected {
            self.shared.command(Command::Send(OutboundFrame::unsubscribe([topic])));
        }
        self.shared.publish_snapshot(&state);
        true
    }

    /// Register a handler for events of `event_type` (`"*"` for all)
    pub fn on_event<F>(&self, event_type: &str, handler: F) -> HandlerId
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        let id = HandlerId(self.shared.next_handler.fetch_add(1, Ordering::Relaxed));
        self.shared
            .handlers
            .write()
            .entry(event_type.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    pub fn remove_handler(&self, id: HandlerId) -> bool {
        let mut handlers = self.shared.handlers.write();
        let mut removed = false;
        for list in handlers.values_mut() {
            let before = list.len();
            list.retain(|(h, _)| *h != id);
            removed |= before != list.len();
        }
        handlers.retain(|_, list| !list.is_empty());
        removed
    }
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn command(&self, command: Command) {
        if let Some(commands) = self.commands.lock().as_ref() {
            let _ = commands.send(command);
        }
    }

    fn publish_snapshot(&self, state: &ConnectionState) {
        if let Some(metrics) = &self.metrics {
            metrics
                .channel()
                .phase
                .with_label_values(&[&self.name])
                .set(state.phase().as_gauge());
        }
        self.snapshots.send_replace(state.snapshot());
    }

    /// Apply `f` to the state if this driver is still current
    fn transition<R>(&self, generation: u64, f: impl FnOnce(&mut ConnectionState) -> R) -> Option<R> {
        let mut state = self.state.lock();
        if !self.is_current(generation) {
            return None;
        }
        let result = f(&mut state);
        self.publish_snapshot(&state);
        Some(result)
    }

    fn context(&self) -> ErrorContext {
        let mut context = ErrorContext::new();
        context.insert("channel".to_string(), self.name.clone().into());
        context.insert("endpoint".to_string(), self.connector.endpoint().into());
        context
    }

    /// Classify and publish a channel failure
    fn report(&self, fault: ChannelFault) {
        let error = self.classifier.classify(fault, self.context());
        self.notify(error);
    }

    fn notify(&self, error: ErrorDetails) {
        let strategy = self.selector.select(&error);
        self.bus.publish(&Notification::new(strategy, error));
    }

    fn count(&self, f: impl FnOnce(&crate::monitoring::ChannelMetrics, &str)) {
        if let Some(metrics) = &self.metrics {
            f(metrics.channel(), &self.name);
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let jitter = self.settings.jitter;
        if jitter <= 0.0 {
            return delay;
        }
        let spread = rand::thread_rng().gen::<f64>() * jitter;
        delay.mul_f64((1.0 + spread - jitter / 2.0).max(0.0))
    }

    // ------------------------------------------------------------------------
    // Driver
    // ------------------------------------------------------------------------

    async fn drive(self: Arc<Self>, generation: u64, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            // Phase is `connecting` here
            self.count(|m, name| m.connect_attempts.with_label_values(&[name]).inc());
            let Some(result) = self.connect(&mut commands).await else {
                return;
            };

            let fault = match result {
                Ok(mut channel) => {
                    let topics = match self.transition(generation, |s| s.connected()) {
                        Some(Ok(topics)) => topics,
                        Some(Err(e)) => {
                            error!(channel = %self.name, "Connection state out of sync: {}", e);
                            let _ = channel.close().await;
                            return;
                        }
                        None => {
                            let _ = channel.close().await;
                            return;
                        }
                    };
                    info!(channel = %self.name, topics = topics.len(), "Channel connected");

                    match self.session(generation, &mut *channel, &mut commands, topics).await {
                        SessionEnd::Closed => return,
                        SessionEnd::Lost(fault) => {
                            let _ = channel.close().await;
                            if self.transition(generation, |s| s.connection_lost()).is_none() {
                                return;
                            }
                            self.count(|m, name| m.disconnects.with_label_values(&[name]).inc());
                            warn!(channel = %self.name, "Connection lost: {}", fault);
                            fault
                        }
                    }
                }
                Err(e) => {
                    if self.transition(generation, |s| s.connect_failed()).is_none() {
                        return;
                    }
                    warn!(channel = %self.name, "Connect failed: {}", e);
                    ChannelFault::error(e.to_string())
                }
            };
            self.report(fault);

            let Some(decision) = self.transition(generation, |s| s.next_reconnect(&self.settings)) else {
                return;
            };
            match decision {
                Ok(ReconnectDecision::Wait(delay)) => {
                    let delay = self.jittered(delay);
                    debug!(channel = %self.name, delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
                    if !self.wait(delay, &mut commands).await {
                        return;
                    }
                    if self.transition(generation, |s| s.reconnect_timer_fired()).is_none() {
                        return;
                    }
                    self.count(|m, name| m.reconnects.with_label_values(&[name]).inc());
                }
                Ok(ReconnectDecision::Abandon) => {
                    self.abandon();
                    return;
                }
                Err(e) => {
                    error!(channel = %self.name, "Connection state out of sync: {}", e);
                    return;
                }
            }
        }
    }

    /// Connect, or None if closed meanwhile
    async fn connect(
        &self,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Option<Result<Box<dyn Channel>, TransportError>> {
        let connect = self.connector.connect();
        tokio::pin!(connect);
        loop {
            tokio::select! {
                result = &mut connect => return Some(result),
                command = commands.recv() => match command {
                    // Topics are declared in full once connected
                    Some(Command::Send(_)) => continue,
                    Some(Command::Close) | None => return None,
                },
            }
        }
    }

    /// Sleep for the reconnect delay; false if closed meanwhile
    async fn wait(&self, delay: Duration, commands: &mut mpsc::UnboundedReceiver<Command>) -> bool {
        let deadline = tokio::time::sleep(delay);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => return true,
                command = commands.recv() => match command {
                    Some(Command::Send(_)) => continue,
                    Some(Command::Close) | None => return false,
                },
            }
        }
    }

    async fn session(
        &self,
        generation: u64,
        channel: &mut dyn Channel,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        topics: Vec<String>,
    ) -> SessionEnd {
        if !topics.is_empty() {
            if let Err(e) = self.send(channel, &OutboundFrame::subscribe(topics)).await {
                return SessionEnd::Lost(ChannelFault::error(e.to_string()));
            }
        }

        enum Step {
            Incoming(Result<Incoming, TransportError>),
            Command(Option<Command>),
            Stale,
        }

        let mut last_inbound = Instant::now();
        loop {
            let stale_deadline = self.stale_after.map(|d| last_inbound + d);
            let step = tokio::select! {
                incoming = channel.recv() => Step::Incoming(incoming),
                command = commands.recv() => Step::Command(command),
                _ = tokio::time::sleep_until(stale_deadline.unwrap_or(last_inbound)), if stale_deadline.is_some() => Step::Stale,
            };

            if !self.is_current(generation) {
                let _ = channel.close().await;
                return SessionEnd::Closed;
            }

            match step {
                Step::Incoming(Ok(Incoming::Text(text))) => {
                    last_inbound = Instant::now();
                    self.dispatch(&text);
                }
                Step::Incoming(Ok(Incoming::Closed { code, reason })) => {
                    return SessionEnd::Lost(ChannelFault::close(code, reason));
                }
                Step::Incoming(Err(e)) => return SessionEnd::Lost(ChannelFault::error(e.to_string())),
                Step::Command(Some(Command::Send(frame))) => {
                    if let Err(e) = self.send(channel, &frame).await {
                        return SessionEnd::Lost(ChannelFault::error(e.to_string()));
                    }
                }
                Step::Command(Some(Command::Close) | None) => {
                    let _ = channel.close().await;
                    return SessionEnd::Closed;
                }
                Step::Stale => {
                    let silence = self.stale_after.unwrap_or_default();
                    return SessionEnd::Lost(ChannelFault::error(format!(
                        "no frames received for {}ms",
                        silence.as_millis()
                    )));
                }
            }
        }
    }

    async fn send(&self, channel: &mut dyn Channel, frame: &OutboundFrame) -> Result<(), TransportError> {
        let text = frame.encode()?;
        debug!(channel = %self.name, frame = %text, "Sending control frame");
        channel.send(text).await
    }

    fn dispatch(&self, text: &str) {
        let event = match ChannelEvent::decode(text) {
            Ok(event) => event,
            Err(e) => {
                warn!(channel = %self.name, "Dropping malformed frame: {}", e);
                self.state.lock().stats_mut().malformed_frames += 1;
                return;
            }
        };
        self.state.lock().stats_mut().events_received += 1;
        self.count(|m, name| m.events.with_label_values(&[name]).inc());

        let targets: Vec<EventHandler> = {
            let handlers = self.handlers.read();
            [event.event_type.as_str(), WILDCARD]
                .iter()
                .filter_map(|key| handlers.get(*key))
                .flatten()
                .map(|(_, h)| Arc::clone(h))
                .collect()
        };

        for handler in targets {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                error!(
                    channel = %self.name,
                    event_type = %event.event_type,
                    message = %panic_message(payload.as_ref()),
                    "Event handler panicked"
                );
            }
        }
    }

    fn abandon(&self) {
        let attempts = self.settings.max_attempts;
        error!(channel = %self.name, attempts, "Giving up on channel");
        self.count(|m, name| m.abandoned.with_label_values(&[name]).inc());

        let error = ErrorDetails::new(
            codes::CHANNEL_ABANDONED,
            format!("Live updates stopped after {attempts} failed connection attempts"),
            ErrorCategory::Network,
            Severity::Critical,
        )
        .retryable(false)
        .with_context(self.context())
        .with_action("Reload to reconnect");
        self.notify(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryConnector;
    use crate::strategy::StrategyRegistry;

    fn manager(connector: &MemoryConnector, bus: ErrorListenerBus, max_attempts: u32) -> ConnectionManager {
        let registry = Arc::new(StrategyRegistry::new());
        ConnectionManager::builder(
            Arc::new(connector.clone()),
            Arc::new(ErrorClassifier::new(Arc::clone(&registry))),
            Arc::new(NotificationStrategySelector::new(registry)),
            bus,
        )
        .settings(ReconnectSettings {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            max_attempts,
            jitter: 0.0,
        })
        .build()
    }

    async fn wait_for(manager: &ConnectionManager, phase: Phase) {
        let mut rx = manager.watch();
        rx.wait_for(|s| s.phase == phase).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_twice_is_rejected() {
        let connector = MemoryConnector::new();
        let manager = manager(&connector, ErrorListenerBus::default(), 5);
        manager.open().unwrap();
        assert_eq!(
            manager.open(),
            Err(ConnectionError::AlreadyOpen(Phase::Connecting))
        );
        wait_for(&manager, Phase::Connected).await;
        manager.close();
    }

    #[test]
    fn test_open_outside_runtime() {
        let connector = MemoryConnector::new();
        let manager = manager(&connector, ErrorListenerBus::default(), 5);
        assert_eq!(manager.open(), Err(ConnectionError::NoRuntime));
        assert_eq!(manager.phase(), Phase::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wildcard_and_typed_handlers() {
        let connector = MemoryConnector::new();
        let manager = manager(&connector, ErrorListenerBus::default(), 5);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = Arc::clone(&seen);
        manager.on_event("alert", move |e| s.lock().push(format!("alert:{}", e.data)));
        let s = Arc::clone(&seen);
        let wildcard = manager.on_event(WILDCARD, move |e| s.lock().push(format!("*:{}", e.event_type)));

        manager.open().unwrap();
        wait_for(&manager, Phase::Connected).await;

        connector.push(r#"{"type":"alert","data":1,"timestamp":"t"}"#);
        connector.push("garbage");
        connector.push(r#"{"type":"audit","data":2,"timestamp":"t"}"#);
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(
            *seen.lock(),
            vec!["alert:1".to_string(), "*:alert".to_string(), "*:audit".to_string()]
        );
        let stats = manager.stats();
        assert_eq!(stats.events_received, 2);
        assert_eq!(stats.malformed_frames, 1);

        assert!(manager.remove_handler(wildcard));
        assert!(!manager.remove_handler(wildcard));
        manager.close();
    }
}
