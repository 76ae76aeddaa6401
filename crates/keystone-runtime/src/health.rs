//! # Health Monitor
//!
//! Checks registered services and keeps one [`ServiceHealth`] record per
//! key. A status transition (and the first unhealthy result for a key) is
//! announced as an [`Event::ServiceHealthChanged`].
//!
//! A check resolves the service and calls its `health_check`. Any error,
//! panic or a response slower than `service_timeout_ms` counts as unhealthy.
//! Scoped services have no resolvable instance and are not checked.
//! Transient services are checked on a fresh instance whose sync
//! `initialize` runs but whose async initializer is never scheduled.

use crate::config::HealthConfig;
use crate::container::ServiceContainer;
use keystone_bus::{Event, EventPublisher};
use keystone_telemetry::SERVICES_UNHEALTHY;
use keystone_types::{Lifetime, ServiceHealth, ServiceKey, ServiceStatus};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Summary of one check round.
#[derive(Debug, Clone, Default)]
pub struct HealthReport {
    pub round: u64,
    pub checked: usize,
    pub unhealthy: Vec<ServiceKey>,
    /// Notifications published this round.
    pub notifications: usize,
    pub elapsed: Duration,
}

impl HealthReport {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.unhealthy.is_empty()
    }
}

struct Transition {
    key: ServiceKey,
    status: ServiceStatus,
    previous: Option<ServiceStatus>,
    error: Option<String>,
}

/// Periodic health checker.
pub struct HealthMonitor {
    container: Arc<ServiceContainer>,
    publisher: Arc<dyn EventPublisher>,
    config: HealthConfig,
    records: RwLock<HashMap<ServiceKey, ServiceHealth>>,
    last_round: Mutex<Instant>,
    rounds: AtomicU64,
}

impl HealthMonitor {
    pub fn new(
        container: Arc<ServiceContainer>,
        publisher: Arc<dyn EventPublisher>,
        config: HealthConfig,
    ) -> Self {
        Self {
            container,
            publisher,
            config,
            records: RwLock::new(HashMap::new()),
            last_round: Mutex::new(Instant::now()),
            rounds: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Whether the check interval has passed since the last round.
    #[must_use]
    pub fn is_due(&self) -> bool {
        self.config.enabled && self.last_round.lock().elapsed() >= self.config.check_interval()
    }

    /// Run a round if one is due.
    pub fn check_if_due(&self) -> Option<HealthReport> {
        self.is_due().then(|| self.check_all())
    }

    /// Check every resolvable registered service.
    pub fn check_all(&self) -> HealthReport {
        let started = Instant::now();
        *self.last_round.lock() = started;
        let round = self.rounds.fetch_add(1, Ordering::Relaxed) + 1;

        let keys = self.container.registered_keys();
        self.records.write().retain(|key, _| keys.contains(key));

        let mut report = HealthReport {
            round,
            ..HealthReport::default()
        };
        let mut transitions = Vec::new();
        for key in keys {
            let Some(descriptor) = self.container.descriptor(&key) else {
                continue;
            };
            if descriptor.lifetime == Lifetime::Scoped {
                continue;
            }
            let (health, transition) = self.check_and_record(&key);
            transitions.extend(transition);
            report.checked += 1;
            if !health.is_healthy {
                report.unhealthy.push(key);
            }
        }

        // Published after every check so handlers see a consistent set.
        for transition in transitions {
            if self.notify(transition) {
                report.notifications += 1;
            }
        }

        SERVICES_UNHEALTHY.set(report.unhealthy.len() as f64);
        report.elapsed = started.elapsed();
        if report.is_healthy() {
            debug!(
                "[Health] Round {}: {} services healthy ({:?})",
                round, report.checked, report.elapsed
            );
        } else {
            warn!(
                "[Health] Round {}: {}/{} services unhealthy",
                round,
                report.unhealthy.len(),
                report.checked
            );
        }
        report
    }

    /// Check one service, update its record and announce a transition.
    pub fn check_service(&self, key: &ServiceKey) -> ServiceHealth {
        let (health, transition) = self.check_and_record(key);
        if let Some(transition) = transition {
            self.notify(transition);
        }
        health
    }

    fn check_and_record(&self, key: &ServiceKey) -> (ServiceHealth, Option<Transition>) {
        let started = Instant::now();
        let outcome = self.run_check(key);
        let elapsed = started.elapsed();
        let response_time_ms = elapsed.as_secs_f64() * 1000.0;

        let outcome = match outcome {
            Ok(()) if elapsed > self.config.service_timeout() => Err(format!(
                "health check took {:.1}ms, limit is {}ms",
                response_time_ms, self.config.service_timeout_ms
            )),
            other => other,
        };

        let mut records = self.records.write();
        let previous = records.get(key).map(ServiceHealth::status);
        let record = records
            .entry(*key)
            .or_insert_with(|| ServiceHealth::new(*key));
        match &outcome {
            Ok(()) => record.mark_healthy(response_time_ms),
            Err(error) => record.mark_unhealthy(response_time_ms, error.clone()),
        }
        let status = record.status();
        let changed = match previous {
            Some(prev) => prev != status,
            None => status == ServiceStatus::Unhealthy,
        };
        let transition = changed.then(|| Transition {
            key: *key,
            status,
            previous,
            error: record.last_error.clone().filter(|_| !record.is_healthy),
        });
        (record.clone(), transition)
    }

    fn run_check(&self, key: &ServiceKey) -> Result<(), String> {
        let resolved = self.container.resolve_for_check(key).map_err(|e| e.to_string())?;
        let lifecycle = resolved.lifecycle();
        match std::panic::catch_unwind(AssertUnwindSafe(|| lifecycle.health_check())) {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err("health check panicked".to_string()),
        }
    }

    fn notify(&self, transition: Transition) -> bool {
        let Transition {
            key,
            status,
            previous,
            error,
        } = transition;

        match previous {
            Some(prev) => info!("[Health] {} changed {} -> {}", key, prev, status),
            None => warn!("[Health] {} is {}", key, status),
        }

        let event = Event::ServiceHealthChanged {
            service: key.to_string(),
            status,
            previous,
            error,
        };
        match self.publisher.publish(event) {
            Ok(_) => true,
            Err(err) => {
                warn!("[Health] Failed to publish health change for {}: {}", key, err);
                false
            }
        }
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    #[must_use]
    pub fn health(&self, key: &ServiceKey) -> Option<ServiceHealth> {
        self.records.read().get(key).cloned()
    }

    #[must_use]
    pub fn health_of<I: ?Sized + 'static>(&self) -> Option<ServiceHealth> {
        self.health(&ServiceKey::of::<I>())
    }

    /// Every record, ordered by service name.
    #[must_use]
    pub fn all_health(&self) -> Vec<ServiceHealth> {
        let mut records: Vec<_> = self.records.read().values().cloned().collect();
        records.sort_by_key(|r| r.service_key.to_string());
        records
    }

    #[must_use]
    pub fn unhealthy(&self) -> Vec<ServiceKey> {
        self.records
            .read()
            .values()
            .filter(|r| !r.is_healthy)
            .map(|r| r.service_key)
            .collect()
    }

    /// Running, but with at least one unhealthy service.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.records.read().values().any(|r| !r.is_healthy)
    }

    #[must_use]
    pub fn rounds(&self) -> u64 {
        self.rounds.load(Ordering::Relaxed)
    }
}
