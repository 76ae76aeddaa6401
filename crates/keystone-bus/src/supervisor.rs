//! # Cooperative Unit Supervisor
//!
//! Runs async handler invocations and async service initializers as
//! cooperative units of work, each bounded by its own timeout.
//!
//! ```text
//! submit() ──► pending ──advance()──► in-flight ──poll──► UnitReport
//!                                         │                (Completed |
//!                                         └─ deadline ──►   Failed |
//!                                            token.cancel()  TimedOut)
//! ```
//!
//! Units are polled only from [`Supervisor::advance`], which never blocks:
//! it starts every pending unit, polls whatever is ready and returns. The
//! deadline of a unit is measured from submission.
//!
//! When a unit times out its future is dropped and its `CancellationToken`
//! is cancelled. Work the unit detached from its own future (for example a
//! `tokio::spawn`ed task that ignores the token) keeps running.

use crate::errors::panic_message;
use crate::events::EventKind;
use crate::handlers::HandlerId;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use keystone_types::ServiceKey;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Future run by a unit. Errors are carried as text.
pub type UnitFuture = BoxFuture<'static, Result<(), String>>;

type UnitStart = Box<dyn FnOnce(CancellationToken) -> UnitFuture + Send>;

/// Who submitted a unit; used to route its report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOrigin {
    /// An async event handler.
    Handler {
        kind: EventKind,
        handler_id: HandlerId,
    },
    /// A service's `initialize_async`.
    Initializer { service: ServiceKey },
}

impl fmt::Display for UnitOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handler { kind, handler_id } => write!(f, "handler {handler_id} on {kind}"),
            Self::Initializer { service } => write!(f, "initializer of {service}"),
        }
    }
}

/// How a unit ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Completed,
    Failed(String),
    TimedOut,
}

/// Report for one finished unit.
#[derive(Debug, Clone)]
pub struct UnitReport {
    pub unit_id: u64,
    pub origin: UnitOrigin,
    pub outcome: UnitOutcome,
    /// Time from the first poll to the outcome.
    pub elapsed: Duration,
    pub timeout: Duration,
}

struct PendingUnit {
    unit_id: u64,
    origin: UnitOrigin,
    timeout: Duration,
    submitted_at: Instant,
    start: UnitStart,
}

/// Timeout supervisor for cooperative units.
pub struct Supervisor {
    pending: Mutex<VecDeque<PendingUnit>>,
    in_flight: Mutex<FuturesUnordered<BoxFuture<'static, UnitReport>>>,
    in_flight_count: AtomicUsize,
    next_unit: AtomicU64,
    root: CancellationToken,
}

impl Supervisor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            in_flight: Mutex::new(FuturesUnordered::new()),
            in_flight_count: AtomicUsize::new(0),
            next_unit: AtomicU64::new(0),
            root: CancellationToken::new(),
        }
    }

    /// Queue a unit. It starts on the next [`advance`](Self::advance).
    pub fn submit<F>(&self, origin: UnitOrigin, timeout: Duration, start: F) -> u64
    where
        F: FnOnce(CancellationToken) -> UnitFuture + Send + 'static,
    {
        let unit_id = self.next_unit.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(unit_id, origin = %origin, timeout_ms = timeout.as_millis() as u64, "[Supervisor] Unit queued");
        self.pending.lock().push_back(PendingUnit {
            unit_id,
            origin,
            timeout,
            submitted_at: Instant::now(),
            start: Box::new(start),
        });
        unit_id
    }

    /// Start pending units and collect every unit that has finished.
    ///
    /// Never blocks. A nested call made from inside a unit returns nothing.
    pub fn advance(&self) -> Vec<UnitReport> {
        let Some(mut in_flight) = self.in_flight.try_lock() else {
            return Vec::new();
        };

        let started: Vec<PendingUnit> = self.pending.lock().drain(..).collect();
        for unit in started {
            in_flight.push(self.launch(unit));
        }

        let mut reports = Vec::new();
        while let Some(Some(report)) = in_flight.next().now_or_never() {
            if report.outcome == UnitOutcome::TimedOut {
                warn!(
                    unit_id = report.unit_id,
                    origin = %report.origin,
                    timeout_ms = report.timeout.as_millis() as u64,
                    "[Supervisor] Unit timed out, supervision cancelled"
                );
            }
            reports.push(report);
        }
        self.in_flight_count.store(in_flight.len(), Ordering::Relaxed);
        reports
    }

    /// Advance repeatedly until idle or until `max_wait` passes.
    pub async fn settle(&self, poll_interval: Duration, max_wait: Duration) -> Vec<UnitReport> {
        let deadline = Instant::now() + max_wait;
        let mut reports = self.advance();
        while !self.is_idle() && Instant::now() < deadline {
            tokio::time::sleep(poll_interval).await;
            reports.extend(self.advance());
        }
        reports
    }

    fn launch(&self, unit: PendingUnit) -> BoxFuture<'static, UnitReport> {
        let PendingUnit {
            unit_id,
            origin,
            timeout,
            submitted_at,
            start,
        } = unit;
        let token = self.root.child_token();
        let deadline = submitted_at + timeout;

        let future = match std::panic::catch_unwind(AssertUnwindSafe(|| start(token.clone()))) {
            Ok(future) => future,
            Err(panic) => {
                let message = format!("panicked: {}", panic_message(panic.as_ref()));
                async move { Err(message) }.boxed()
            }
        };

        async move {
            let started = Instant::now();
            let outcome =
                match tokio::time::timeout_at(deadline, AssertUnwindSafe(future).catch_unwind())
                    .await
                {
                    Ok(Ok(Ok(()))) => UnitOutcome::Completed,
                    Ok(Ok(Err(message))) => UnitOutcome::Failed(message),
                    Ok(Err(panic)) => {
                        UnitOutcome::Failed(format!("panicked: {}", panic_message(panic.as_ref())))
                    }
                    Err(_) => {
                        token.cancel();
                        UnitOutcome::TimedOut
                    }
                };
            UnitReport {
                unit_id,
                origin,
                outcome,
                elapsed: started.elapsed(),
                timeout,
            }
        }
        .boxed()
    }

    /// Cancel every unit and drop all supervision. Returns how many units
    /// were discarded. Units submitted afterwards start already cancelled.
    pub fn shutdown(&self) -> usize {
        self.root.cancel();
        let dropped_pending = {
            let mut pending = self.pending.lock();
            let n = pending.len();
            pending.clear();
            n
        };
        let dropped_in_flight = {
            let mut in_flight = self.in_flight.lock();
            let n = in_flight.len();
            *in_flight = FuturesUnordered::new();
            n
        };
        self.in_flight_count.store(0, Ordering::Relaxed);
        dropped_pending + dropped_in_flight
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Units started but not yet reported, as of the last advance.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending_count() == 0 && self.in_flight_count() == 0
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}
