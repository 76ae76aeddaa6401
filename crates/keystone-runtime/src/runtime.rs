//! # Keystone Runtime
//!
//! Owns the shared infrastructure and hands it out. Nothing here is global:
//! two runtimes in one process are fully independent.
//!
//! ## Startup Sequence
//!
//! 1. Create the supervisor shared by the bus and the container
//! 2. Create the event bus and register it as `dyn EventPublisher`
//! 3. Create the container, health monitor and scheduler
//! 4. `start()` initializes every singleton in dependency order
//! 5. `run()` drives the scheduler until shutdown is requested

use crate::config::{ConfigError, RuntimeConfig};
use crate::container::{ContainerState, ServiceContainer};
use crate::health::{HealthMonitor, HealthReport};
use crate::scheduler::{CooperativeScheduler, TickReport};
use keystone_bus::{EventBus, EventPublisher, Supervisor};
use keystone_types::{ContainerError, ServiceKey};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Point-in-time view of the runtime.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStatus {
    pub container_state: ContainerState,
    pub registered_services: usize,
    pub live_instances: usize,
    pub degraded: bool,
    pub unhealthy_services: Vec<String>,
    pub events_published: u64,
    pub pending_units: usize,
    pub ticks: u64,
}

/// The runtime context.
pub struct KeystoneRuntime {
    config: RuntimeConfig,
    supervisor: Arc<Supervisor>,
    bus: Arc<EventBus>,
    container: Arc<ServiceContainer>,
    health: Arc<HealthMonitor>,
    scheduler: Arc<CooperativeScheduler>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl KeystoneRuntime {
    /// Build a runtime from a validated configuration.
    pub fn new(config: RuntimeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        info!("[Runtime] Creating keystone runtime");

        let supervisor = Arc::new(Supervisor::new());
        let bus = Arc::new(EventBus::with_supervisor(
            config.bus.clone(),
            supervisor.clone(),
        ));
        let container = Arc::new(ServiceContainer::with_supervisor(
            config.container.clone(),
            supervisor.clone(),
        ));
        container.register_instance::<dyn EventPublisher>(bus.clone());

        let health = Arc::new(HealthMonitor::new(
            container.clone(),
            bus.clone(),
            config.health.clone(),
        ));
        let scheduler = Arc::new(CooperativeScheduler::new(
            bus.clone(),
            container.clone(),
            health.clone(),
            config.scheduler.clone(),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config,
            supervisor,
            bus,
            container,
            health,
            scheduler,
            shutdown_tx,
            shutdown_rx,
        })
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    #[must_use]
    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    #[must_use]
    pub fn container(&self) -> Arc<ServiceContainer> {
        Arc::clone(&self.container)
    }

    #[must_use]
    pub fn health(&self) -> Arc<HealthMonitor> {
        Arc::clone(&self.health)
    }

    #[must_use]
    pub fn scheduler(&self) -> Arc<CooperativeScheduler> {
        Arc::clone(&self.scheduler)
    }

    #[must_use]
    pub fn supervisor(&self) -> Arc<Supervisor> {
        Arc::clone(&self.supervisor)
    }

    /// Initialize every registered singleton and take a first health
    /// reading. Returns the initialization order.
    pub fn start(&self) -> Result<Vec<ServiceKey>, ContainerError> {
        info!("===========================================");
        info!("  Keystone Runtime v{}", env!("CARGO_PKG_VERSION"));
        info!("===========================================");

        let order = self.container.initialize_all()?;
        if self.config.health.enabled {
            let report = self.health.check_all();
            if !report.is_healthy() {
                warn!(
                    "[Runtime] Started degraded: {} unhealthy services",
                    report.unhealthy.len()
                );
            }
        }
        info!("[Runtime] {} services initialized", order.len());
        Ok(order)
    }

    /// Run one scheduler tick by hand.
    pub fn tick(&self) -> TickReport {
        self.scheduler.tick()
    }

    /// Run a health round now, regardless of the interval.
    pub fn check_health(&self) -> HealthReport {
        self.health.check_all()
    }

    /// Drive the scheduler until [`request_shutdown`](Self::request_shutdown).
    pub async fn run(&self) -> u64 {
        self.scheduler.run(self.shutdown_rx.clone()).await
    }

    /// Ask a running [`run`](Self::run) loop to stop.
    pub fn request_shutdown(&self) {
        // Receivers may all be gone already; nothing is waiting then.
        let _ = self.shutdown_tx.send(true);
    }

    /// A receiver that observes shutdown requests.
    #[must_use]
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Stop the scheduler, drop all supervised work, unsubscribe every
    /// handler and dispose every service.
    pub fn shutdown(&self) {
        info!("[Runtime] Shutting down");
        self.request_shutdown();
        let dropped = self.supervisor.shutdown();
        if dropped > 0 {
            warn!("[Runtime] Dropped {} unfinished units", dropped);
        }
        self.bus.clear();
        self.container.clear();
        info!("[Runtime] Shutdown complete");
    }

    #[must_use]
    pub fn status(&self) -> RuntimeStatus {
        RuntimeStatus {
            container_state: self.container.state(),
            registered_services: self.container.registered_keys().len(),
            live_instances: self.container.instance_count(),
            degraded: self.health.is_degraded(),
            unhealthy_services: self
                .health
                .unhealthy()
                .iter()
                .map(ToString::to_string)
                .collect(),
            events_published: self.bus.events_published(),
            pending_units: self.supervisor.pending_count() + self.supervisor.in_flight_count(),
            ticks: self.scheduler.ticks(),
        }
    }
}
