//! # Event Bus
//!
//! Priority-ordered publish/subscribe with bounded history and per-kind
//! performance statistics.
//!
//! ## Dispatch
//!
//! ```text
//! publish(event)
//!   1. reject null payload (if validation is on)
//!   2. append history record
//!   3. sync handlers, ascending priority, each isolated
//!   4. async handlers → Supervisor units (timeout-bounded)
//!   5. record dispatch time under the kind name
//! ```
//!
//! Handler lists are snapshotted before invocation, so handlers may publish,
//! subscribe or unsubscribe re-entrantly. No bus lock is held while a
//! handler or callback runs.

use crate::config::BusConfig;
use crate::errors::{panic_message, BusError, HandlerError};
use crate::events::{Event, EventKind};
use crate::handlers::{AsyncHandler, HandlerCallback, HandlerEntry, HandlerId, HandlerRegistry};
use crate::history::{EventHistory, EventHistoryRecord};
use crate::performance::{async_metric_name, EventStatistics, PerformanceMetric, PerformanceTracker};
use crate::supervisor::{Supervisor, UnitOrigin, UnitOutcome, UnitReport};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use keystone_telemetry::metric_inc;
use keystone_telemetry::metrics::{
    HistogramTimer, ASYNC_HANDLER_COMPLETIONS, DISPATCH_DURATION, EVENTS_PUBLISHED,
    HANDLER_FAILURES,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Trait for publishing events to the bus.
///
/// Services receive an `Arc<dyn EventPublisher>` rather than the whole bus.
pub trait EventPublisher: Send + Sync {
    /// Dispatch an event now. Returns the number of handlers it reached.
    fn publish(&self, event: Event) -> Result<usize, BusError>;

    /// Queue an event for the next scheduler tick.
    fn publish_async(&self, event: Event) -> Result<(), BusError>;

    /// Get the total number of events dispatched.
    fn events_published(&self) -> u64;
}

/// A handler failure, delivered once to every error callback.
#[derive(Debug, Clone)]
pub struct HandlerFailure {
    pub kind: EventKind,
    pub handler_id: HandlerId,
    pub error: BusError,
    pub timestamp: DateTime<Utc>,
}

/// A successful async handler completion.
#[derive(Debug, Clone)]
pub struct HandlerCompletion {
    pub kind: EventKind,
    pub handler_id: HandlerId,
    pub elapsed: Duration,
    pub timestamp: DateTime<Utc>,
}

type FailureCallback = Arc<dyn Fn(&HandlerFailure) + Send + Sync>;
type CompletionCallback = Arc<dyn Fn(&HandlerCompletion) + Send + Sync>;

/// In-process event bus.
pub struct EventBus {
    config: BusConfig,
    handlers: RwLock<HandlerRegistry>,
    queue: Mutex<VecDeque<Event>>,
    history: Mutex<EventHistory>,
    performance: Mutex<PerformanceTracker>,
    statistics: Mutex<HashMap<EventKind, EventStatistics>>,
    failure_callbacks: RwLock<Vec<FailureCallback>>,
    completion_callbacks: RwLock<Vec<CompletionCallback>>,
    supervisor: Arc<Supervisor>,
    events_published: AtomicU64,
}

impl EventBus {
    /// Create a bus with its own supervisor.
    #[must_use]
    pub fn new(config: BusConfig) -> Self {
        Self::with_supervisor(config, Arc::new(Supervisor::new()))
    }

    /// Create a bus that shares a supervisor with other components.
    #[must_use]
    pub fn with_supervisor(config: BusConfig, supervisor: Arc<Supervisor>) -> Self {
        let history = EventHistory::new(config.max_history);
        Self {
            config,
            handlers: RwLock::new(HandlerRegistry::new()),
            queue: Mutex::new(VecDeque::new()),
            history: Mutex::new(history),
            performance: Mutex::new(PerformanceTracker::new()),
            statistics: Mutex::new(HashMap::new()),
            failure_callbacks: RwLock::new(Vec::new()),
            completion_callbacks: RwLock::new(Vec::new()),
            supervisor,
            events_published: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    #[must_use]
    pub fn supervisor(&self) -> Arc<Supervisor> {
        self.supervisor.clone()
    }

    // =========================================================================
    // SUBSCRIPTION
    // =========================================================================

    /// Subscribe a synchronous handler. Lower priority runs first.
    pub fn subscribe<F>(&self, kind: EventKind, priority: i32, handler: F) -> HandlerId
    where
        F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let id = self
            .handlers
            .write()
            .insert(kind, priority, HandlerCallback::Sync(Arc::new(handler)));
        debug!(event = %kind, handler_id = %id, priority, "[EventBus] Sync handler subscribed");
        id
    }

    /// Subscribe an async handler. `timeout` defaults to the configured
    /// handler timeout.
    pub fn subscribe_async<F, Fut>(
        &self,
        kind: EventKind,
        priority: i32,
        timeout: Option<Duration>,
        handler: F,
    ) -> HandlerId
    where
        F: Fn(Arc<Event>, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let timeout = timeout.unwrap_or_else(|| self.config.default_handler_timeout());
        let handler: AsyncHandler = Arc::new(move |event, token| handler(event, token).boxed());
        let id = self
            .handlers
            .write()
            .insert(kind, priority, HandlerCallback::Async { handler, timeout });
        debug!(
            event = %kind,
            handler_id = %id,
            priority,
            timeout_ms = timeout.as_millis() as u64,
            "[EventBus] Async handler subscribed"
        );
        id
    }

    /// Remove a handler by identity. Returns whether it was registered.
    pub fn unsubscribe(&self, kind: EventKind, id: HandlerId) -> bool {
        let removed = self.handlers.write().remove(kind, id);
        if removed {
            debug!(event = %kind, handler_id = %id, "[EventBus] Handler unsubscribed");
        }
        removed
    }

    /// Register a callback for handler failures.
    pub fn on_handler_error<F>(&self, callback: F)
    where
        F: Fn(&HandlerFailure) + Send + Sync + 'static,
    {
        self.failure_callbacks.write().push(Arc::new(callback));
    }

    /// Register a callback for successful async handler completions.
    pub fn on_handler_completed<F>(&self, callback: F)
    where
        F: Fn(&HandlerCompletion) + Send + Sync + 'static,
    {
        self.completion_callbacks.write().push(Arc::new(callback));
    }

    // =========================================================================
    // PUBLISHING
    // =========================================================================

    fn validate(&self, event: &Event) -> Result<(), BusError> {
        if self.config.validate_payloads && event.is_null_payload() {
            let kind = event.kind();
            warn!(event = %kind, "[EventBus] Rejected event with null payload");
            return Err(BusError::NullPayload(kind));
        }
        Ok(())
    }

    /// Dispatch an event to every handler of its kind.
    ///
    /// Sync handlers have all run when this returns; async handlers have
    /// been handed to the supervisor. Returns the number of handlers reached.
    pub fn publish(&self, event: Event) -> Result<usize, BusError> {
        self.validate(&event)?;
        Ok(self.dispatch(Arc::new(event)))
    }

    /// Queue an event for [`drain_queued`](Self::drain_queued).
    pub fn publish_async(&self, event: Event) -> Result<(), BusError> {
        self.validate(&event)?;
        let kind = event.kind();
        let depth = {
            let mut queue = self.queue.lock();
            queue.push_back(event);
            queue.len()
        };
        debug!(event = %kind, depth, "[EventBus] Event queued");
        Ok(())
    }

    /// Dispatch every event queued so far, in FIFO order. Events queued while
    /// draining wait for the next call. Returns how many were dispatched.
    pub fn drain_queued(&self) -> usize {
        let batch: Vec<Event> = self.queue.lock().drain(..).collect();
        let drained = batch.len();
        for event in batch {
            self.dispatch(Arc::new(event));
        }
        drained
    }

    /// Events waiting for the next drain.
    #[must_use]
    pub fn pending_async(&self) -> usize {
        self.queue.lock().len()
    }

    fn dispatch(&self, event: Arc<Event>) -> usize {
        let kind = event.kind();
        let sequence_id = self.history.lock().record(&event);
        {
            let mut statistics = self.statistics.lock();
            let entry = statistics.entry(kind).or_default();
            entry.published += 1;
            entry.last_published = Some(Utc::now());
        }
        self.events_published.fetch_add(1, Ordering::Relaxed);
        metric_inc!(EVENTS_PUBLISHED, &[kind.as_str()]);

        let entries = self.handlers.read().snapshot(kind);
        let _timer = HistogramTimer::new(&DISPATCH_DURATION);
        let started = Instant::now();
        for entry in &entries {
            match &entry.callback {
                HandlerCallback::Sync(handler) => {
                    self.invoke_sync(entry, |event| handler(event), &event);
                }
                HandlerCallback::Async { handler, timeout } => {
                    self.submit_async(entry, handler.clone(), *timeout, event.clone());
                }
            }
        }
        let elapsed = started.elapsed();
        self.performance.lock().record(kind.as_str(), elapsed);

        debug!(
            event = %kind,
            sequence_id,
            handlers = entries.len(),
            elapsed_us = elapsed.as_micros() as u64,
            "[EventBus] Event dispatched"
        );
        entries.len()
    }

    fn invoke_sync<F>(&self, entry: &HandlerEntry, handler: F, event: &Event)
    where
        F: Fn(&Event) -> Result<(), HandlerError>,
    {
        let message = match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
            Ok(Ok(())) => return,
            Ok(Err(err)) => err.to_string(),
            Err(payload) => HandlerError::Panicked(panic_message(payload.as_ref())).to_string(),
        };
        let failure = BusError::HandlerInvocation {
            kind: entry.kind,
            handler_id: entry.id,
            message,
        };
        error!(
            event = %entry.kind,
            handler_id = %entry.id,
            error = %failure,
            "[EventBus] Handler failed"
        );
        self.report_failure(entry.kind, entry.id, failure);
    }

    fn submit_async(
        &self,
        entry: &HandlerEntry,
        handler: AsyncHandler,
        timeout: Duration,
        event: Arc<Event>,
    ) {
        let origin = UnitOrigin::Handler {
            kind: entry.kind,
            handler_id: entry.id,
        };
        self.supervisor.submit(origin, timeout, move |token| {
            let future = handler(event, token);
            async move { future.await.map_err(|err| err.to_string()) }.boxed()
        });
    }

    // =========================================================================
    // ASYNC COMPLETION
    // =========================================================================

    /// Advance the supervisor and account for finished handler units.
    ///
    /// Reports for units the bus did not submit (service initializers) are
    /// returned untouched for the caller to route.
    pub fn advance(&self) -> Vec<UnitReport> {
        let reports = self.supervisor.advance();
        for report in &reports {
            self.handle_unit_report(report);
        }
        reports
    }

    /// Account for one handler unit report. Reports of other origins are
    /// ignored.
    pub fn handle_unit_report(&self, report: &UnitReport) {
        let UnitOrigin::Handler { kind, handler_id } = report.origin else {
            return;
        };

        match &report.outcome {
            UnitOutcome::Completed => {
                self.performance
                    .lock()
                    .record(&async_metric_name(kind), report.elapsed);
                self.statistics.lock().entry(kind).or_default().async_completed += 1;
                ASYNC_HANDLER_COMPLETIONS
                    .with_label_values(&[kind.as_str()])
                    .inc();

                let completion = HandlerCompletion {
                    kind,
                    handler_id,
                    elapsed: report.elapsed,
                    timestamp: Utc::now(),
                };
                let callbacks = self.completion_callbacks.read().clone();
                for callback in callbacks {
                    callback(&completion);
                }
            }
            UnitOutcome::Failed(message) => {
                let failure = BusError::AsyncHandlerFailed {
                    kind,
                    handler_id,
                    message: message.clone(),
                };
                error!(event = %kind, handler_id = %handler_id, error = %failure, "[EventBus] Async handler failed");
                self.report_failure(kind, handler_id, failure);
            }
            UnitOutcome::TimedOut => {
                let failure = BusError::AsyncHandlerTimeout {
                    kind,
                    handler_id,
                    timeout: report.timeout,
                };
                warn!(event = %kind, handler_id = %handler_id, error = %failure, "[EventBus] Async handler timed out");
                self.report_failure(kind, handler_id, failure);
            }
        }
    }

    fn report_failure(&self, kind: EventKind, handler_id: HandlerId, error: BusError) {
        {
            let mut statistics = self.statistics.lock();
            let entry = statistics.entry(kind).or_default();
            entry.handler_failures += 1;
            if matches!(error, BusError::AsyncHandlerTimeout { .. }) {
                entry.timeouts += 1;
            }
        }
        metric_inc!(HANDLER_FAILURES, &[kind.as_str(), error.reason()]);

        let failure = HandlerFailure {
            kind,
            handler_id,
            error,
            timestamp: Utc::now(),
        };
        let callbacks = self.failure_callbacks.read().clone();
        for callback in callbacks {
            callback(&failure);
        }
    }

    // =========================================================================
    // INTROSPECTION
    // =========================================================================

    /// The most recent `count` history records, oldest first.
    #[must_use]
    pub fn history(&self, count: usize) -> Vec<EventHistoryRecord> {
        self.history.lock().recent(count)
    }

    /// Timing statistics by name: an event kind name, or `async:<kind>` for
    /// async handler completions.
    #[must_use]
    pub fn performance(&self, name: &str) -> Option<PerformanceMetric> {
        self.performance.lock().get(name)
    }

    #[must_use]
    pub fn all_performance(&self) -> Vec<PerformanceMetric> {
        self.performance.lock().all()
    }

    /// Counters and subscriber counts for one kind.
    #[must_use]
    pub fn statistics(&self, kind: EventKind) -> EventStatistics {
        let (sync_subscribers, async_subscribers) = self.handlers.read().counts(kind);
        let mut statistics = self
            .statistics
            .lock()
            .get(&kind)
            .cloned()
            .unwrap_or_default();
        statistics.kind = Some(kind);
        statistics.sync_subscribers = sync_subscribers;
        statistics.async_subscribers = async_subscribers;
        statistics
    }

    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    // =========================================================================
    // RESET
    // =========================================================================

    /// Remove every handler and queued event. History and metrics are kept.
    pub fn clear(&self) {
        self.handlers.write().clear();
        let dropped = {
            let mut queue = self.queue.lock();
            let n = queue.len();
            queue.clear();
            n
        };
        debug!(dropped, "[EventBus] Cleared handlers and queue");
    }

    pub fn clear_history(&self) {
        self.history.lock().clear();
    }

    /// Reset performance metrics and per-kind counters.
    pub fn reset_metrics(&self) {
        self.performance.lock().clear();
        self.statistics.lock().clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl EventPublisher for EventBus {
    fn publish(&self, event: Event) -> Result<usize, BusError> {
        EventBus::publish(self, event)
    }

    fn publish_async(&self, event: Event) -> Result<(), BusError> {
        EventBus::publish_async(self, event)
    }

    fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn level(n: u32) -> Event {
        Event::LevelUp {
            player_id: "p1".into(),
            level: n,
        }
    }

    #[test]
    fn test_priority_dispatch_order() {
        let bus = EventBus::default();
        let order = Arc::new(Mutex::new(Vec::new()));
        for priority in [3, 1, 2] {
            let order = order.clone();
            bus.subscribe(EventKind::LevelUp, priority, move |_| {
                order.lock().push(priority);
                Ok(())
            });
        }

        assert_eq!(bus.publish(level(1)).unwrap(), 3);
        assert_eq!(*order.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn test_failing_handler_isolated() {
        let bus = EventBus::default();
        let ran = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe(EventKind::LevelUp, 0, |_| Err(HandlerError::failed("nope")));
        bus.subscribe(EventKind::LevelUp, 1, |_| panic!("handler blew up"));
        let counter = ran.clone();
        bus.subscribe(EventKind::LevelUp, 2, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let seen = failures.clone();
        bus.on_handler_error(move |failure| seen.lock().push(failure.error.clone()));

        bus.publish(level(2)).unwrap();

        assert_eq!(ran.load(Ordering::SeqCst), 1);
        let failures = failures.lock();
        assert_eq!(failures.len(), 2);
        assert!(matches!(&failures[0], BusError::HandlerInvocation { message, .. } if message == "nope"));
        assert!(matches!(&failures[1], BusError::HandlerInvocation { message, .. } if message.contains("blew up")));
        assert_eq!(bus.statistics(EventKind::LevelUp).handler_failures, 2);
    }

    #[test]
    fn test_null_payload_rejected_unless_disabled() {
        let bus = EventBus::default();
        let err = bus
            .publish(Event::custom("ping", serde_json::Value::Null))
            .unwrap_err();
        assert_eq!(err, BusError::NullPayload(EventKind::Custom));
        assert!(bus.history(10).is_empty());

        let relaxed = EventBus::new(BusConfig {
            validate_payloads: false,
            ..BusConfig::default()
        });
        assert!(relaxed
            .publish(Event::custom("ping", serde_json::Value::Null))
            .is_ok());
        assert_eq!(relaxed.history(10).len(), 1);
    }

    #[test]
    fn test_publish_async_waits_for_drain() {
        let bus = EventBus::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(EventKind::LevelUp, 0, move |event| {
            if let Event::LevelUp { level, .. } = event {
                sink.lock().push(*level);
            }
            Ok(())
        });

        bus.publish_async(level(1)).unwrap();
        bus.publish_async(level(2)).unwrap();
        assert!(seen.lock().is_empty());
        assert_eq!(bus.pending_async(), 2);

        assert_eq!(bus.drain_queued(), 2);
        assert_eq!(*seen.lock(), vec![1, 2]);
        assert_eq!(bus.pending_async(), 0);
    }

    #[test]
    fn test_unsubscribe_and_clear() {
        let bus = EventBus::default();
        let id = bus.subscribe(EventKind::FriendAdded, 0, |_| Ok(()));
        bus.subscribe(EventKind::FriendAdded, 0, |_| Ok(()));
        assert!(bus.unsubscribe(EventKind::FriendAdded, id));
        assert_eq!(bus.statistics(EventKind::FriendAdded).sync_subscribers, 1);

        bus.publish(Event::FriendAdded {
            player_id: "a".into(),
            friend_id: "b".into(),
        })
        .unwrap();
        bus.publish_async(level(1)).unwrap();
        bus.clear();

        assert_eq!(bus.handler_count(), 0);
        assert_eq!(bus.pending_async(), 0);
        assert_eq!(bus.history(10).len(), 1);
        assert!(bus.performance("FriendAdded").is_some());

        bus.clear_history();
        bus.reset_metrics();
        assert!(bus.history(10).is_empty());
        assert!(bus.performance("FriendAdded").is_none());
    }

    #[test]
    fn test_reentrant_publish_from_handler() {
        let bus = Arc::new(EventBus::default());
        let inner = Arc::downgrade(&bus);
        bus.subscribe(EventKind::LevelUp, 0, move |_| {
            if let Some(bus) = inner.upgrade() {
                bus.publish(Event::AchievementUnlocked {
                    player_id: "p1".into(),
                    achievement_id: "first-level".into(),
                })
                .map_err(|e| HandlerError::failed(e.to_string()))?;
            }
            Ok(())
        });

        bus.publish(level(1)).unwrap();
        let kinds: Vec<EventKind> = bus.history(10).iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![EventKind::LevelUp, EventKind::AchievementUnlocked]);
    }

    #[tokio::test]
    async fn test_async_handler_completion_and_timeout() {
        let bus = EventBus::default();
        let completions = Arc::new(AtomicUsize::new(0));
        let timeouts = Arc::new(AtomicUsize::new(0));

        bus.subscribe_async(EventKind::AdWatched, 0, None, |_, _| async {
            Ok::<(), HandlerError>(())
        });
        bus.subscribe_async(
            EventKind::AdWatched,
            1,
            Some(Duration::from_millis(20)),
            |_, token: CancellationToken| async move {
                token.cancelled().await;
                Err::<(), _>(HandlerError::Cancelled)
            },
        );

        let done = completions.clone();
        bus.on_handler_completed(move |_| {
            done.fetch_add(1, Ordering::SeqCst);
        });
        let timed_out = timeouts.clone();
        bus.on_handler_error(move |failure| {
            if matches!(failure.error, BusError::AsyncHandlerTimeout { .. }) {
                timed_out.fetch_add(1, Ordering::SeqCst);
            }
        });

        bus.publish(Event::AdWatched {
            player_id: "p1".into(),
            placement: "shop".into(),
            rewarded: true,
        })
        .unwrap();

        let supervisor = bus.supervisor();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            bus.advance();
            if supervisor.is_idle() || tokio::time::Instant::now() > deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert_eq!(timeouts.load(Ordering::SeqCst), 1);
        let stats = bus.statistics(EventKind::AdWatched);
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.async_completed, 1);
        assert_eq!(stats.async_subscribers, 2);
        assert_eq!(bus.performance("async:AdWatched").unwrap().count, 1);
    }

    #[test]
    fn test_publisher_trait_counts() {
        let bus = EventBus::default();
        let publisher: &dyn EventPublisher = &bus;
        publisher.publish(level(1)).unwrap();
        publisher.publish_async(level(2)).unwrap();
        assert_eq!(publisher.events_published(), 1);
        bus.drain_queued();
        assert_eq!(publisher.events_published(), 2);
    }
}
