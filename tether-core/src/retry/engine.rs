//! Retry policy engine
//!
//! Tracks attempt counters per error id and performs exactly one delayed
//! re-invocation per `retry` call. The engine never loops on its own: a failed
//! attempt is handed back to the caller, who decides whether to call `retry`
//! again. This keeps a mis-set policy from turning into unbounded recursion.
//!
//! At most one retry per error id is pending at any time; a second call while
//! one is waiting or running fails fast with [`RetryError::InFlight`].

use super::policy::RetryPolicy;
use crate::classify::RawFailure;
use crate::core::{ErrorDetails, ErrorId, RetryError};
use crate::monitoring::MetricsRegistry;
use crate::strategy::StrategyRegistry;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// What happened during a retry cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A delay was scheduled before the attempt
    Scheduled { delay: Duration },
    /// Periodic update while the delay runs
    Countdown { remaining: Duration },
    /// The delay elapsed and the operation is being invoked
    Attempting,
    Succeeded,
    Failed { exhausted: bool },
    Cancelled,
}

/// Progress report delivered to a [`ProgressObserver`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryProgress {
    pub id: ErrorId,
    /// 1-based attempt number
    pub attempt: u32,
    pub max_attempts: u32,
    pub event: ProgressEvent,
}

/// Side channel for retry progress (UI countdowns, logging)
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, progress: &RetryProgress);
}

impl<F> ProgressObserver for F
where
    F: Fn(&RetryProgress) + Send + Sync,
{
    fn on_progress(&self, progress: &RetryProgress) {
        self(progress)
    }
}

#[derive(Debug, Default)]
struct RetrySlot {
    attempts: u32,
    /// Wakes the pending delay when the retry is cancelled
    pending: Option<Arc<Notify>>,
}

/// Pending marker of one claimed attempt
///
/// If the retry future is dropped before it settles (caller timeout, aborted
/// task), the slot is released so the id does not stay `InFlight`. An attempt
/// dropped before its operation ran is not counted.
struct PendingRetry<'a> {
    slots: &'a Mutex<HashMap<ErrorId, RetrySlot>>,
    id: &'a ErrorId,
    token: Arc<Notify>,
    invoked: bool,
    settled: bool,
}

impl PendingRetry<'_> {
    /// Apply `f` to the slot map if the slot still belongs to this attempt
    fn settle(&mut self, f: impl FnOnce(&mut HashMap<ErrorId, RetrySlot>)) {
        self.settled = true;
        let mut slots = self.slots.lock();
        let owned = slots
            .get(self.id)
            .and_then(|slot| slot.pending.as_ref())
            .is_some_and(|token| Arc::ptr_eq(token, &self.token));
        if owned {
            f(&mut slots);
        }
    }
}

impl Drop for PendingRetry<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let id = self.id;
        let invoked = self.invoked;
        self.settle(|slots| {
            if let Some(slot) = slots.get_mut(id) {
                slot.pending = None;
                if !invoked {
                    slot.attempts = slot.attempts.saturating_sub(1);
                }
                if slot.attempts == 0 {
                    slots.remove(id);
                }
            }
        });
        debug!(%id, invoked, "Retry dropped before completion");
    }
}

/// Attempt bookkeeping and delayed re-invocation
pub struct RetryPolicyEngine {
    strategies: Arc<StrategyRegistry>,
    default_policy: RetryPolicy,
    /// Countdown granularity reported to observers (None = no countdown)
    progress_tick: Option<Duration>,
    slots: Mutex<HashMap<ErrorId, RetrySlot>>,
    metrics: Option<MetricsRegistry>,
}

impl RetryPolicyEngine {
    pub fn new(strategies: Arc<StrategyRegistry>, default_policy: RetryPolicy) -> Self {
        Self {
            strategies,
            default_policy,
            progress_tick: Some(Duration::from_secs(1)),
            slots: Mutex::new(HashMap::new()),
            metrics: None,
        }
    }

    pub fn with_progress_tick(mut self, tick: Option<Duration>) -> Self {
        self.progress_tick = tick.filter(|t| !t.is_zero());
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn default_policy(&self) -> &RetryPolicy {
        &self.default_policy
    }

    /// Policy registered for the error's code, or the engine default
    pub fn policy_for(&self, error: &ErrorDetails) -> RetryPolicy {
        self.strategies
            .get(&error.code)
            .and_then(|s| s.retry_policy.clone())
            .unwrap_or_else(|| self.default_policy.clone())
    }

    /// Eligibility check: retryable and budget left
    pub fn should_retry(&self, error: &ErrorDetails, attempts_so_far: u32) -> bool {
        error.retryable && self.policy_for(error).permits(attempts_so_far)
    }

    /// Delay before the 0-based attempt `attempt` under `policy`
    pub fn next_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
        policy.next_delay(attempt)
    }

    /// Attempts consumed so far for an error id
    pub fn attempts(&self, id: &ErrorId) -> u32 {
        self.slots.lock().get(id).map_or(0, |s| s.attempts)
    }

    /// Whether a retry for `id` is currently waiting or running
    pub fn is_pending(&self, id: &ErrorId) -> bool {
        self.slots
            .lock()
            .get(id)
            .is_some_and(|s| s.pending.is_some())
    }

    /// Forget the counter for `id` (a fresh budget on the next retry)
    ///
    /// A retry that is still pending keeps running; only its count is reset.
    pub fn reset(&self, id: &ErrorId) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(id) {
            slot.attempts = 0;
            if slot.pending.is_none() {
                slots.remove(id);
            }
        }
    }

    /// Cancel a pending retry and drop its counter
    ///
    /// Returns true if there was anything to cancel or forget.
    pub fn cancel(&self, id: &ErrorId) -> bool {
        let Some(slot) = self.slots.lock().remove(id) else {
            return false;
        };
        if let Some(notify) = slot.pending {
            debug!(%id, "Cancelling pending retry");
            notify.notify_one();
        }
        true
    }

    /// Retry `operation` once after the policy delay
    pub async fn retry<T, F, Fut>(&self, error: &ErrorDetails, operation: F) -> Result<T, RetryError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RawFailure>>,
    {
        self.retry_with_observer(error, operation, None).await
    }

    /// Retry `operation` once, reporting progress to `observer`
    pub async fn retry_with_observer<T, F, Fut>(
        &self,
        error: &ErrorDetails,
        operation: F,
        observer: Option<&dyn ProgressObserver>,
    ) -> Result<T, RetryError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RawFailure>>,
    {
        let policy = self.policy_for(error);
        let (index, cancel) = self.claim(error, &policy)?;
        let mut pending = PendingRetry {
            slots: &self.slots,
            id: &error.id,
            token: Arc::clone(&cancel),
            invoked: false,
            settled: false,
        };
        let attempt = index + 1;
        let report = |event: ProgressEvent| {
            if let Some(observer) = observer {
                observer.on_progress(&RetryProgress {
                    id: error.id.clone(),
                    attempt,
                    max_attempts: policy.max_attempts,
                    event,
                });
            }
        };

        let delay = policy.next_delay(index);
        debug!(
            id = %error.id,
            code = %error.code,
            attempt,
            max_attempts = policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Scheduling retry"
        );
        report(ProgressEvent::Scheduled { delay });

        let countdown = observer.map(|_| &report as &(dyn Fn(ProgressEvent) + Sync));
        let proceed = self.wait(delay, &cancel, countdown).await;

        let result = if proceed {
            report(ProgressEvent::Attempting);
            pending.invoked = true;
            // A cancel while the operation runs drops it at its next await
            tokio::select! {
                biased;
                _ = cancel.notified() => None,
                result = operation() => Some(result),
            }
        } else {
            None
        };

        let Some(result) = result else {
            pending.settle(|_| {});
            debug!(id = %error.id, attempt, "Retry cancelled");
            self.record("cancelled");
            report(ProgressEvent::Cancelled);
            return Err(RetryError::Cancelled {
                id: error.id.clone(),
            });
        };

        match result {
            Ok(value) => {
                pending.settle(|slots| {
                    slots.remove(&error.id);
                });
                info!(id = %error.id, code = %error.code, attempt, "Retry succeeded");
                self.record("succeeded");
                report(ProgressEvent::Succeeded);
                Ok(value)
            }
            Err(failure) => {
                let exhausted = attempt >= policy.max_attempts;
                pending.settle(|slots| {
                    if exhausted {
                        slots.remove(&error.id);
                    } else if let Some(slot) = slots.get_mut(&error.id) {
                        slot.pending = None;
                    }
                });

                warn!(
                    id = %error.id,
                    code = %error.code,
                    attempt,
                    exhausted,
                    "Retry attempt failed: {}",
                    failure
                );
                self.record(if exhausted { "exhausted" } else { "failed" });
                report(ProgressEvent::Failed { exhausted });
                Err(RetryError::Failed {
                    attempt,
                    exhausted,
                    failure,
                })
            }
        }
    }

    /// Reserve the next attempt for `error`, returning its 0-based index
    fn claim(
        &self,
        error: &ErrorDetails,
        policy: &RetryPolicy,
    ) -> Result<(u32, Arc<Notify>), RetryError> {
        let mut slots = self.slots.lock();
        let slot = slots.entry(error.id.clone()).or_default();

        if slot.pending.is_some() {
            return Err(RetryError::InFlight {
                id: error.id.clone(),
            });
        }

        if !(error.retryable && policy.permits(slot.attempts)) {
            if slot.attempts == 0 {
                slots.remove(&error.id);
            }
            return Err(RetryError::NotRetryable {
                id: error.id.clone(),
                code: error.code.clone(),
            });
        }

        let index = slot.attempts;
        let notify = Arc::new(Notify::new());
        slot.attempts += 1;
        slot.pending = Some(Arc::clone(&notify));
        Ok((index, notify))
    }

    /// Sleep for `delay`, emitting countdown ticks; false if cancelled
    async fn wait(
        &self,
        delay: Duration,
        cancel: &Notify,
        report: Option<&(dyn Fn(ProgressEvent) + Sync)>,
    ) -> bool {
        let deadline = Instant::now() + delay;
        let tick = self.progress_tick.filter(|_| report.is_some());

        loop {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            let remaining = deadline - now;
            let step = match (tick, report) {
                (Some(tick), Some(report)) => {
                    report(ProgressEvent::Countdown { remaining });
                    tick.min(remaining)
                }
                _ => remaining,
            };

            tokio::select! {
                _ = tokio::time::sleep(step) => {}
                _ = cancel.notified() => return false,
            }
        }
    }

    fn record(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.recovery().retries.with_label_values(&[outcome]).inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ErrorCategory, Severity};
    use crate::strategy::RecoveryStrategy;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn retryable_error() -> ErrorDetails {
        ErrorDetails::new("HTTP_503", "unavailable", ErrorCategory::Network, Severity::High)
            .retryable(true)
    }

    fn engine() -> RetryPolicyEngine {
        RetryPolicyEngine::new(Arc::new(StrategyRegistry::new()), RetryPolicy::default())
    }

    #[test]
    fn test_should_retry_respects_budget() {
        let engine = engine();
        let error = retryable_error();
        assert!(engine.should_retry(&error, 0));
        assert!(engine.should_retry(&error, 2));
        assert!(!engine.should_retry(&error, 3));
    }

    #[test]
    fn test_non_retryable_never_retries() {
        let engine = engine();
        let error = retryable_error().retryable(false);
        for attempts in 0..10 {
            assert!(!engine.should_retry(&error, attempts));
        }
    }

    #[test]
    fn test_policy_comes_from_strategy() {
        let registry = Arc::new(StrategyRegistry::new());
        registry.register(
            RecoveryStrategy::new("HTTP_503").with_retry_policy(RetryPolicy::linear(
                1,
                Duration::from_millis(5),
                Duration::from_millis(5),
            )),
        );
        let engine = RetryPolicyEngine::new(registry, RetryPolicy::default());
        let error = retryable_error();
        assert_eq!(engine.policy_for(&error).max_attempts, 1);
        assert!(!engine.should_retry(&error, 1));
    }

    #[test]
    fn test_strategy_without_policy_uses_engine_default() {
        let registry = Arc::new(StrategyRegistry::new());
        registry.register(RecoveryStrategy::new("HTTP_503").with_severity(Severity::Critical));
        let default = RetryPolicy::linear(5, Duration::from_millis(10), Duration::from_millis(50));
        let engine = RetryPolicyEngine::new(registry, default.clone());

        let error = retryable_error();
        assert_eq!(engine.policy_for(&error), default);
        assert!(engine.should_retry(&error, 4));
        assert!(!engine.should_retry(&error, 5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_retryable_rejects_immediately() {
        let engine = engine();
        let error = retryable_error().retryable(false);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = engine
            .retry(&error, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(RetryError::NotRetryable { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(engine.attempts(&error.id), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_clears_counter() {
        let engine = engine();
        let error = retryable_error();
        let start = Instant::now();

        let value = engine.retry(&error, || async { Ok(7) }).await.unwrap();

        assert_eq!(value, 7);
        assert_eq!(engine.attempts(&error.id), 0);
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_never_exceed_budget() {
        let engine = engine();
        let error = retryable_error();

        for expected in 1..=2u32 {
            let result: Result<(), _> = engine.retry(&error, || async { Err("down".into()) }).await;
            match result {
                Err(RetryError::Failed { attempt, exhausted, .. }) => {
                    assert_eq!(attempt, expected);
                    assert!(!exhausted);
                }
                other => panic!("unexpected {other:?}"),
            }
            assert_eq!(engine.attempts(&error.id), expected);
        }

        let result: Result<(), _> = engine.retry(&error, || async { Err("down".into()) }).await;
        assert!(matches!(
            result,
            Err(RetryError::Failed { attempt: 3, exhausted: true, .. })
        ));
        // Final failure clears the counter
        assert_eq!(engine.attempts(&error.id), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_sees_schedule_and_countdown() {
        let engine = engine();
        let error = retryable_error();
        let events = parking_lot::Mutex::new(Vec::new());
        let observer = |p: &RetryProgress| events.lock().push(p.event.clone());

        let _: Result<(), _> = engine
            .retry_with_observer(&error, || async { Err("down".into()) }, Some(&observer))
            .await;

        let events = events.into_inner();
        assert_eq!(
            events.first(),
            Some(&ProgressEvent::Scheduled {
                delay: Duration::from_millis(1000)
            })
        );
        assert!(events.contains(&ProgressEvent::Countdown {
            remaining: Duration::from_millis(1000)
        }));
        assert!(events.contains(&ProgressEvent::Attempting));
        assert_eq!(events.last(), Some(&ProgressEvent::Failed { exhausted: false }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_wakes_pending_retry() {
        let engine = Arc::new(engine());
        let error = retryable_error();
        let calls = Arc::new(AtomicU32::new(0));

        let task = {
            let engine = Arc::clone(&engine);
            let error = error.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                engine
                    .retry(&error, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            })
        };

        tokio::task::yield_now().await;
        assert!(engine.is_pending(&error.id));

        // A second cycle for the same id is refused while one is pending
        let second: Result<(), _> = engine.retry(&error, || async { Ok(()) }).await;
        assert!(matches!(second, Err(RetryError::InFlight { .. })));

        assert!(engine.cancel(&error.id));
        let result = task.await.unwrap();
        assert!(matches!(result, Err(RetryError::Cancelled { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(engine.attempts(&error.id), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_grants_fresh_budget() {
        let engine = engine();
        let error = retryable_error();
        for _ in 0..2 {
            let _: Result<(), _> = engine.retry(&error, || async { Err("down".into()) }).await;
        }
        assert_eq!(engine.attempts(&error.id), 2);

        engine.reset(&error.id);
        assert_eq!(engine.attempts(&error.id), 0);
        assert!(engine.should_retry(&error, engine.attempts(&error.id)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_retry_releases_slot() {
        let engine = engine();
        let error = retryable_error();

        // Caller gives up while the delay is still running
        let timed_out =
            tokio::time::timeout(Duration::from_millis(10), engine.retry(&error, || async { Ok(()) }))
                .await;
        assert!(timed_out.is_err());
        assert!(!engine.is_pending(&error.id));
        assert_eq!(engine.attempts(&error.id), 0);

        let value = engine.retry(&error, || async { Ok(1) }).await.unwrap();
        assert_eq!(value, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_during_operation_counts_attempt() {
        let engine = engine();
        let error = retryable_error();

        let timed_out = tokio::time::timeout(
            Duration::from_millis(1500),
            engine.retry(&error, || async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            }),
        )
        .await;
        assert!(timed_out.is_err());
        assert!(!engine.is_pending(&error.id));
        assert_eq!(engine.attempts(&error.id), 1);

        let result: Result<(), _> = engine.retry(&error, || async { Err("down".into()) }).await;
        assert!(matches!(
            result,
            Err(RetryError::Failed { attempt: 2, exhausted: false, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_running_operation() {
        let engine = Arc::new(engine());
        let error = retryable_error();
        let calls = Arc::new(AtomicU32::new(0));

        let task = {
            let engine = Arc::clone(&engine);
            let error = error.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                engine
                    .retry(&error, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_secs(10)).await;
                        Ok(())
                    })
                    .await
            })
        };

        // Past the 1s delay, inside the operation
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(engine.is_pending(&error.id));

        assert!(engine.cancel(&error.id));
        let result = task.await.unwrap();
        assert!(matches!(result, Err(RetryError::Cancelled { .. })));
        assert!(!engine.is_pending(&error.id));
        assert_eq!(engine.attempts(&error.id), 0);
    }
}
