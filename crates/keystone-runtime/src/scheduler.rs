//! # Cooperative Scheduler
//!
//! The single driver of deferred work. Each tick:
//!
//! 1. dispatches events queued with `publish_async`
//! 2. advances the supervisor, accounting for async handlers and async
//!    service initializers
//! 3. runs a health round when the monitor's interval has elapsed
//!
//! A tick never blocks on a unit; slow handlers are simply polled again on
//! the next tick until they finish or their deadline passes.

use crate::config::SchedulerConfig;
use crate::container::ServiceContainer;
use crate::health::{HealthMonitor, HealthReport};
use keystone_bus::{EventBus, UnitOutcome};
use keystone_telemetry::{metric_observe, TICK_DURATION};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info};

/// What one tick did.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub tick: u64,
    /// Queued events dispatched.
    pub drained: usize,
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
    /// Reports routed to the container's async initialization tracking.
    pub initializers: usize,
    pub health: Option<HealthReport>,
    pub elapsed: Duration,
}

impl TickReport {
    /// Whether the tick found anything to do.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.drained == 0
            && self.completed + self.failed + self.timed_out == 0
            && self.health.is_none()
    }
}

pub struct CooperativeScheduler {
    bus: Arc<EventBus>,
    container: Arc<ServiceContainer>,
    health: Arc<HealthMonitor>,
    config: SchedulerConfig,
    ticks: AtomicU64,
}

impl CooperativeScheduler {
    pub fn new(
        bus: Arc<EventBus>,
        container: Arc<ServiceContainer>,
        health: Arc<HealthMonitor>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            bus,
            container,
            health,
            config,
            ticks: AtomicU64::new(0),
        }
    }

    /// Run one tick. Must be called from inside a tokio runtime.
    pub fn tick(&self) -> TickReport {
        let started = Instant::now();
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;

        let mut report = TickReport {
            tick,
            drained: self.bus.drain_queued(),
            ..TickReport::default()
        };

        for unit in self.bus.advance() {
            match unit.outcome {
                UnitOutcome::Completed => report.completed += 1,
                UnitOutcome::Failed(_) => report.failed += 1,
                UnitOutcome::TimedOut => report.timed_out += 1,
            }
            if self.container.record_async_initialization(&unit) {
                report.initializers += 1;
            }
        }

        report.health = self.health.check_if_due();
        report.elapsed = started.elapsed();
        metric_observe!(TICK_DURATION, report.elapsed.as_secs_f64());

        if !report.is_idle() {
            debug!(
                tick,
                drained = report.drained,
                completed = report.completed,
                failed = report.failed,
                timed_out = report.timed_out,
                elapsed_us = report.elapsed.as_micros() as u64,
                "[Scheduler] Tick"
            );
        }
        report
    }

    /// Tick on the configured interval until `shutdown` turns true or its
    /// sender is dropped. Returns the number of ticks run.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> u64 {
        let interval = self.config.tick_interval();
        info!("[Scheduler] Running every {:?}", interval);

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut ran = 0;
        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick();
                    ran += 1;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("[Scheduler] Stopped after {} ticks", ran);
        ran
    }

    /// Ticks run since creation.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}
