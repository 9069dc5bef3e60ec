//! Listener registration and fan-out

use super::suppression::SuppressionRegistry;
use crate::monitoring::MetricsRegistry;
use crate::notify::Notification;
use crate::utils::panic_message;
use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, warn};

/// Receiver of published notifications
pub trait ErrorListener: Send + Sync {
    fn on_error(&self, notification: &Notification) -> anyhow::Result<()>;
}

impl<F> ErrorListener for F
where
    F: Fn(&Notification) -> anyhow::Result<()> + Send + Sync,
{
    fn on_error(&self, notification: &Notification) -> anyhow::Result<()> {
        self(notification)
    }
}

/// Result of a single publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The error id is suppressed; no listener was invoked
    Suppressed,
    /// Every listener was invoked; `failures` of them errored or panicked
    Delivered { listeners: usize, failures: usize },
}

/// Counter snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    pub delivered: u64,
    pub suppressed: u64,
    pub listener_failures: u64,
    pub listeners: usize,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    suppressed: AtomicU64,
    listener_failures: AtomicU64,
}

struct BusInner {
    listeners: RwLock<Vec<(u64, Arc<dyn ErrorListener>)>>,
    next_id: AtomicU64,
    suppression: Arc<SuppressionRegistry>,
    counters: Counters,
    metrics: Option<MetricsRegistry>,
}

/// Handle returned by `subscribe`
///
/// Dropping it keeps the listener registered; call [`Subscription::unsubscribe`]
/// to remove it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Remove the listener; false if the bus is gone or it was already removed
    pub fn unsubscribe(&self) -> bool {
        let Some(bus) = self.bus.upgrade() else {
            return false;
        };
        let mut listeners = bus.listeners.write();
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != self.id);
        before != listeners.len()
    }
}

impl std::fmt::Debug for BusInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusInner")
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

/// Publish/subscribe hub for error notifications
#[derive(Clone, Debug)]
pub struct ErrorListenerBus {
    inner: Arc<BusInner>,
}

impl Default for ErrorListenerBus {
    fn default() -> Self {
        Self::new(Arc::new(SuppressionRegistry::new()))
    }
}

impl ErrorListenerBus {
    pub fn new(suppression: Arc<SuppressionRegistry>) -> Self {
        Self::build(suppression, None)
    }

    pub fn with_metrics(suppression: Arc<SuppressionRegistry>, metrics: MetricsRegistry) -> Self {
        Self::build(suppression, Some(metrics))
    }

    fn build(suppression: Arc<SuppressionRegistry>, metrics: Option<MetricsRegistry>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                listeners: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                suppression,
                counters: Counters::default(),
                metrics,
            }),
        }
    }

    pub fn suppression(&self) -> &Arc<SuppressionRegistry> {
        &self.inner.suppression
    }

    /// Register a closure listener
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Notification) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe_listener(Arc::new(listener))
    }

    pub fn subscribe_listener(&self, listener: Arc<dyn ErrorListener>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.write().push((id, listener));
        debug!(subscription = id, "Listener subscribed");
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }

    /// Deliver `notification` to every listener unless its id is suppressed
    ///
    /// A listener that errors or panics is logged and counted; the remaining
    /// listeners still receive the notification.
    pub fn publish(&self, notification: &Notification) -> PublishOutcome {
        let id = &notification.error.id;
        if self.inner.suppression.is_suppressed(id) {
            debug!(%id, code = %notification.error.code, "Notification suppressed");
            self.inner.counters.suppressed.fetch_add(1, Ordering::Relaxed);
            self.count("suppressed");
            return PublishOutcome::Suppressed;
        }

        // Snapshot so listeners may (un)subscribe or publish while being called
        let listeners: Vec<Arc<dyn ErrorListener>> = self
            .inner
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        let mut failures = 0;
        for listener in &listeners {
            match panic::catch_unwind(AssertUnwindSafe(|| listener.on_error(notification))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    warn!(%id, "Error listener failed: {:#}", e);
                }
                Err(payload) => {
                    failures += 1;
                    error!(%id, message = %panic_message(payload.as_ref()), "Error listener panicked");
                }
            }
        }

        let counters = &self.inner.counters;
        counters.delivered.fetch_add(1, Ordering::Relaxed);
        counters
            .listener_failures
            .fetch_add(failures as u64, Ordering::Relaxed);
        self.count("delivered");
        if failures > 0 {
            if let Some(metrics) = &self.inner.metrics {
                metrics.recovery().listener_failures.inc_by(failures as u64);
            }
        }

        PublishOutcome::Delivered {
            listeners: listeners.len(),
            failures,
        }
    }

    pub fn stats(&self) -> BusStats {
        let counters = &self.inner.counters;
        BusStats {
            delivered: counters.delivered.load(Ordering::Relaxed),
            suppressed: counters.suppressed.load(Ordering::Relaxed),
            listener_failures: counters.listener_failures.load(Ordering::Relaxed),
            listeners: self.listener_count(),
        }
    }

    fn count(&self, outcome: &str) {
        if let Some(metrics) = &self.inner.metrics {
            metrics.recovery().notifications.with_label_values(&[outcome]).inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ErrorCategory, ErrorDetails, Severity};
    use crate::notify::NotificationStrategy;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    fn notification(id: &str) -> Notification {
        let mut error = ErrorDetails::new("HTTP_500", "boom", ErrorCategory::System, Severity::High);
        error.id = id.into();
        Notification::new(NotificationStrategy::for_severity(Severity::High), error)
    }

    #[test]
    fn test_delivers_to_all_listeners() {
        let bus = ErrorListenerBus::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let seen = Arc::clone(&seen);
            bus.subscribe(move |note: &Notification| {
                seen.lock().push((n, note.error.id.to_string()));
                Ok(())
            });
        }

        let outcome = bus.publish(&notification("e1"));
        assert_eq!(outcome, PublishOutcome::Delivered { listeners: 3, failures: 0 });
        assert_eq!(seen.lock().len(), 3);
    }

    #[test]
    fn test_suppressed_id_reaches_nobody() {
        let bus = ErrorListenerBus::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        bus.subscribe(move |_: &Notification| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.suppression().suppress(&"e1".into());
        assert_eq!(bus.publish(&notification("e1")), PublishOutcome::Suppressed);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        bus.publish(&notification("e2"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        bus.suppression().clear_suppressed();
        bus.publish(&notification("e1"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(bus.stats().suppressed, 1);
    }

    #[test]
    fn test_failing_and_panicking_listeners_are_isolated() {
        let bus = ErrorListenerBus::default();
        let calls = Arc::new(AtomicUsize::new(0));

        bus.subscribe(|_: &Notification| anyhow::bail!("render failed"));
        bus.subscribe(|_: &Notification| panic!("listener exploded"));
        let c = Arc::clone(&calls);
        bus.subscribe(move |_: &Notification| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let outcome = bus.publish(&notification("e1"));
        assert_eq!(outcome, PublishOutcome::Delivered { listeners: 3, failures: 2 });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.stats().listener_failures, 2);
    }

    #[test]
    fn test_listener_can_unsubscribe_itself() {
        let bus = ErrorListenerBus::default();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicUsize::new(0));

        let s = Arc::clone(&slot);
        let c = Arc::clone(&calls);
        let sub = bus.subscribe(move |_: &Notification| {
            c.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = s.lock().take() {
                sub.unsubscribe();
            }
            Ok(())
        });
        *slot.lock() = Some(sub);

        let other = Arc::new(AtomicUsize::new(0));
        let o = Arc::clone(&other);
        bus.subscribe(move |_: &Notification| {
            o.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish(&notification("e1"));
        bus.publish(&notification("e2"));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(other.load(Ordering::SeqCst), 2);
        assert_eq!(bus.listener_count(), 1);
    }

    #[test]
    fn test_unsubscribe_twice() {
        let bus = ErrorListenerBus::default();
        let sub = bus.subscribe(|_: &Notification| Ok(()));
        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
    }
}
