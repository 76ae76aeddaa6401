//! # Service Container
//!
//! Registers services by interface, builds them on demand with their
//! dependencies and drives their lifecycle hooks.
//!
//! ## Lifecycle
//!
//! ```text
//! Uninitialized ──initialize_all()──► Building ──► Initializing ──► Ready
//!       ▲                                              │
//!       │ register()                                   └─ cycle ──► Failed
//!       │
//!    Cleared ◄── Disposing ◄── clear()
//! ```
//!
//! Resolution never holds a registry lock while a factory runs, so factories
//! may resolve further services. Singleton construction is serialized by a
//! re-entrant lock; at most one instance per singleton key is ever live.

pub mod graph;
pub mod registration;
pub mod registry;

pub use graph::{DependencyGraph, GraphNode};
pub use registration::{Constructed, Dependencies, Registration};
pub use registry::{DescriptorSummary, ServiceDescriptor, ServiceRegistry};

use crate::config::ContainerConfig;
use futures::FutureExt;
use keystone_bus::{Supervisor, UnitOrigin, UnitOutcome, UnitReport};
use keystone_telemetry::SERVICES_RESOLVED;
use keystone_types::{
    short_type_name, ContainerError, Lifetime, Service, ServiceError, ServiceKey,
};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use registration::{downcast, BuiltInstance, ErasedInstance};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Container lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContainerState {
    Uninitialized,
    Building,
    Initializing,
    Ready,
    Disposing,
    Cleared,
    /// Terminal until `clear()`.
    Failed,
}

impl ContainerState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "Uninitialized",
            Self::Building => "Building",
            Self::Initializing => "Initializing",
            Self::Ready => "Ready",
            Self::Disposing => "Disposing",
            Self::Cleared => "Cleared",
            Self::Failed => "Failed",
        }
    }

    fn allows_resolution(self) -> bool {
        !matches!(self, Self::Disposing | Self::Failed)
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of a service's async initializer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsyncInitStatus {
    Pending,
    Completed,
    Failed(String),
    TimedOut,
    /// No supervisor was attached to run it.
    Skipped,
}

/// A resolved instance seen through its key rather than its interface type.
#[derive(Clone)]
pub struct ResolvedService {
    key: ServiceKey,
    interface: ErasedInstance,
    lifecycle: Arc<dyn Service>,
}

impl ResolvedService {
    #[must_use]
    pub fn key(&self) -> ServiceKey {
        self.key
    }

    #[must_use]
    pub fn lifecycle(&self) -> Arc<dyn Service> {
        self.lifecycle.clone()
    }

    /// Recover the typed interface handle.
    pub fn downcast<I: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<I>, ContainerError> {
        downcast::<I>(self.key, &self.interface)
    }
}

/// The service container.
pub struct ServiceContainer {
    config: ContainerConfig,
    registry: RwLock<ServiceRegistry>,
    graph: RwLock<DependencyGraph>,
    singletons: RwLock<HashMap<ServiceKey, BuiltInstance>>,
    /// Singleton keys in construction order, for reverse disposal.
    creation_order: Mutex<Vec<ServiceKey>>,
    construction: ReentrantMutex<()>,
    state: RwLock<ContainerState>,
    supervisor: Option<Arc<Supervisor>>,
    async_init: RwLock<HashMap<ServiceKey, AsyncInitStatus>>,
}

impl ServiceContainer {
    /// A container without a supervisor. Async initializers are skipped.
    #[must_use]
    pub fn new(config: ContainerConfig) -> Self {
        Self::build(config, None)
    }

    /// A container that submits async initializers to `supervisor`.
    #[must_use]
    pub fn with_supervisor(config: ContainerConfig, supervisor: Arc<Supervisor>) -> Self {
        Self::build(config, Some(supervisor))
    }

    fn build(config: ContainerConfig, supervisor: Option<Arc<Supervisor>>) -> Self {
        Self {
            config,
            registry: RwLock::new(ServiceRegistry::new()),
            graph: RwLock::new(DependencyGraph::default()),
            singletons: RwLock::new(HashMap::new()),
            creation_order: Mutex::new(Vec::new()),
            construction: ReentrantMutex::new(()),
            state: RwLock::new(ContainerState::Uninitialized),
            supervisor,
            async_init: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> ContainerState {
        *self.state.read()
    }

    // =========================================================================
    // REGISTRATION
    // =========================================================================

    /// Register a service. Re-registering a key replaces the descriptor and
    /// disposes any instance built from the old one.
    pub fn register<I: ?Sized + Send + Sync + 'static>(&self, registration: Registration<I>) {
        let key = registration.key;
        let implementation = registration.implementation;
        let lifetime = registration.lifetime;

        let previous = {
            let mut registry = self.registry.write();
            let (_, previous) = registry.insert(registration);
            *self.graph.write() = DependencyGraph::build(&registry);
            previous
        };

        info!(
            "[Container] Registered {} -> {} ({})",
            key,
            short_type_name(implementation),
            lifetime
        );

        if let Some(previous) = previous {
            warn!(
                "[Container] {}",
                ContainerError::RegistrationConflict {
                    key,
                    previous: previous.implementation,
                }
            );
            self.evict(&key);
        }

        let mut state = self.state.write();
        if *state == ContainerState::Cleared {
            *state = ContainerState::Uninitialized;
        }
    }

    /// Register a concrete service type as a singleton under its own key.
    pub fn register_singleton<T, F>(&self, factory: F)
    where
        T: Service,
        F: Fn(&Dependencies<'_>) -> Result<T, ServiceError> + Send + Sync + 'static,
    {
        self.register(Registration::<T>::singleton(move |deps| {
            Ok(Constructed::service(Arc::new(factory(deps)?)))
        }));
    }

    /// Register a concrete service type as transient under its own key.
    pub fn register_transient<T, F>(&self, factory: F)
    where
        T: Service,
        F: Fn(&Dependencies<'_>) -> Result<T, ServiceError> + Send + Sync + 'static,
    {
        self.register(Registration::<T>::transient(move |deps| {
            Ok(Constructed::service(Arc::new(factory(deps)?)))
        }));
    }

    /// Register an already-built value as a singleton without lifecycle hooks.
    pub fn register_instance<I: ?Sized + Send + Sync + 'static>(&self, instance: Arc<I>) {
        self.register(Registration::<I>::singleton(move |_| {
            Ok(Constructed::plain(instance.clone()))
        }));
    }

    /// Remove a registration and dispose its cached instance.
    pub fn unregister<I: ?Sized + 'static>(&self) -> bool {
        let key = ServiceKey::of::<I>();
        let removed = {
            let mut registry = self.registry.write();
            let removed = registry.remove(&key).is_some();
            if removed {
                *self.graph.write() = DependencyGraph::build(&registry);
            }
            removed
        };
        if removed {
            self.evict(&key);
            info!("[Container] Unregistered {}", key);
        }
        removed
    }

    #[must_use]
    pub fn is_registered<I: ?Sized + 'static>(&self) -> bool {
        self.is_key_registered(&ServiceKey::of::<I>())
    }

    #[must_use]
    pub fn is_key_registered(&self, key: &ServiceKey) -> bool {
        self.registry.read().contains(key)
    }

    /// Registered keys by priority, then registration order.
    #[must_use]
    pub fn registered_keys(&self) -> Vec<ServiceKey> {
        self.registry.read().keys()
    }

    #[must_use]
    pub fn descriptor(&self, key: &ServiceKey) -> Option<Arc<ServiceDescriptor>> {
        self.registry.read().get(key)
    }

    #[must_use]
    pub fn descriptors(&self) -> Vec<Arc<ServiceDescriptor>> {
        self.registry.read().ordered()
    }

    #[must_use]
    pub fn dependency_graph(&self) -> DependencyGraph {
        self.graph.read().clone()
    }

    /// Dependencies-first order over every registered service.
    pub fn initialization_order(&self) -> Result<Vec<ServiceKey>, ContainerError> {
        self.graph
            .read()
            .topological_order(self.config.enable_cycle_detection)
    }

    // =========================================================================
    // RESOLUTION
    // =========================================================================

    /// Resolve an interface.
    pub fn resolve<I: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<I>, ContainerError> {
        let key = ServiceKey::of::<I>();
        let built = self.resolve_erased(key, &[])?;
        downcast::<I>(key, &built.interface)
    }

    /// Resolve an interface, treating every failure as absence.
    pub fn try_resolve<I: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<I>> {
        match self.resolve::<I>() {
            Ok(instance) => Some(instance),
            Err(err) => {
                debug!("[Container] try_resolve {}: {}", ServiceKey::of::<I>(), err);
                None
            }
        }
    }

    /// Resolve by key when the interface type is not known statically.
    pub fn resolve_key(&self, key: &ServiceKey) -> Result<ResolvedService, ContainerError> {
        let built = self.resolve_erased(*key, &[])?;
        Ok(ResolvedService {
            key: *key,
            interface: built.interface,
            lifecycle: built.lifecycle,
        })
    }

    /// Resolve for a health check. Singletons come from the cache as usual;
    /// a transient is built without scheduling its async initializer, so
    /// a check never resubmits work or overwrites `async_init_status`.
    pub fn resolve_for_check(&self, key: &ServiceKey) -> Result<ResolvedService, ContainerError> {
        self.ensure_resolvable()?;
        let descriptor = self
            .registry
            .read()
            .get(key)
            .ok_or(ContainerError::ServiceNotRegistered(*key))?;
        let built = match descriptor.lifetime {
            Lifetime::Transient => self.construct(&descriptor, &[], false)?,
            _ => self.resolve_erased(*key, &[])?,
        };
        Ok(ResolvedService {
            key: *key,
            interface: built.interface,
            lifecycle: built.lifecycle,
        })
    }

    fn ensure_resolvable(&self) -> Result<(), ContainerError> {
        let state = self.state();
        if state.allows_resolution() {
            Ok(())
        } else {
            Err(ContainerError::InvalidState {
                state: state.as_str(),
                operation: "resolve",
            })
        }
    }

    pub(crate) fn resolve_erased(
        &self,
        key: ServiceKey,
        path: &[ServiceKey],
    ) -> Result<BuiltInstance, ContainerError> {
        self.ensure_resolvable()?;

        if let Some(start) = path.iter().position(|k| *k == key) {
            let mut cycle = path[start..].to_vec();
            cycle.push(key);
            return Err(ContainerError::CircularDependency { key, path: cycle });
        }

        let descriptor = self
            .registry
            .read()
            .get(&key)
            .ok_or(ContainerError::ServiceNotRegistered(key))?;

        match descriptor.lifetime {
            Lifetime::Scoped => Err(ContainerError::ScopeUnavailable(key)),
            Lifetime::Transient => self.construct(&descriptor, path, true),
            Lifetime::Singleton => {
                if let Some(cached) = self.cached(&key) {
                    return Ok(cached);
                }
                let _guard = self.construction.lock();
                if let Some(cached) = self.cached(&key) {
                    return Ok(cached);
                }
                let built = self.construct(&descriptor, path, true)?;
                self.singletons.write().insert(key, built.clone());
                self.creation_order.lock().push(key);
                Ok(built)
            }
        }
    }

    fn cached(&self, key: &ServiceKey) -> Option<BuiltInstance> {
        self.singletons.read().get(key).cloned()
    }

    fn construct(
        &self,
        descriptor: &ServiceDescriptor,
        path: &[ServiceKey],
        schedule_async: bool,
    ) -> Result<BuiltInstance, ContainerError> {
        let key = descriptor.key;
        let mut chain = path.to_vec();
        chain.push(key);

        let edges = self.graph.read().dependencies_of(&key).to_vec();
        let mut resolved = HashMap::with_capacity(edges.len());
        for dep in edges {
            if chain.contains(&dep) && !self.config.enable_cycle_detection {
                warn!("[Container] Skipping circular edge {} -> {}", key, dep);
                continue;
            }
            let instance = self.resolve_erased(dep, &chain)?;
            resolved.insert(dep, instance.interface);
        }

        let deps = Dependencies::new(self, resolved, chain);
        let built = std::panic::catch_unwind(AssertUnwindSafe(|| (descriptor.factory)(&deps)))
            .unwrap_or_else(|panic| {
                Err(ServiceError::Construction(format!(
                    "factory panicked: {}",
                    panic_message(panic.as_ref())
                )))
            })
            .map_err(|source| resolution_error(key, source))?;

        for injector in &descriptor.injectors {
            injector(&built.interface, &deps)
                .map_err(|source| resolution_error(key, source))?;
        }

        if let Err(source) = built.lifecycle.initialize() {
            warn!("[Container] ✗ {} failed to initialize: {}", key, source);
            return Err(ContainerError::ResolutionFailure { key, source });
        }

        SERVICES_RESOLVED
            .with_label_values(&[lifetime_label(descriptor.lifetime)])
            .inc();
        debug!(
            "[Container] Built {} ({})",
            key,
            short_type_name(descriptor.implementation)
        );

        if schedule_async && built.lifecycle.has_async_initializer() {
            self.schedule_async_init(key, built.lifecycle.clone());
        }
        Ok(built)
    }

    // =========================================================================
    // ASYNC INITIALIZATION
    // =========================================================================

    fn schedule_async_init(&self, key: ServiceKey, lifecycle: Arc<dyn Service>) {
        let Some(supervisor) = &self.supervisor else {
            warn!(
                "[Container] {} has an async initializer but no supervisor is attached, skipping",
                key
            );
            self.async_init.write().insert(key, AsyncInitStatus::Skipped);
            return;
        };

        self.async_init.write().insert(key, AsyncInitStatus::Pending);
        supervisor.submit(
            UnitOrigin::Initializer { service: key },
            self.config.async_init_timeout(),
            move |_token| {
                async move {
                    lifecycle
                        .initialize_async()
                        .await
                        .map_err(|e| e.to_string())
                }
                .boxed()
            },
        );
        debug!("[Container] Scheduled async initializer for {}", key);
    }

    /// Record the outcome of an async initializer. Returns `false` for
    /// reports that did not come from one.
    pub fn record_async_initialization(&self, report: &UnitReport) -> bool {
        let UnitOrigin::Initializer { service } = report.origin else {
            return false;
        };

        let status = match &report.outcome {
            UnitOutcome::Completed => {
                info!(
                    "[Container] ✓ {} async initialization completed in {:?}",
                    service, report.elapsed
                );
                AsyncInitStatus::Completed
            }
            UnitOutcome::Failed(message) => {
                error!("[Container] ✗ {} async initialization failed: {}", service, message);
                AsyncInitStatus::Failed(message.clone())
            }
            UnitOutcome::TimedOut => {
                error!(
                    "[Container] ✗ {} async initialization timed out after {:?}",
                    service, report.timeout
                );
                AsyncInitStatus::TimedOut
            }
        };
        self.async_init.write().insert(service, status);
        true
    }

    #[must_use]
    pub fn async_init_status(&self, key: &ServiceKey) -> Option<AsyncInitStatus> {
        self.async_init.read().get(key).cloned()
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Build every registered singleton in dependency order.
    ///
    /// Returns the keys that were initialized. A cycle (with detection on)
    /// moves the container to `Failed`; any other failure returns it to
    /// `Uninitialized` so the call can be retried.
    pub fn initialize_all(&self) -> Result<Vec<ServiceKey>, ContainerError> {
        {
            let mut state = self.state.write();
            if matches!(*state, ContainerState::Failed | ContainerState::Disposing) {
                return Err(ContainerError::InvalidState {
                    state: state.as_str(),
                    operation: "initialize",
                });
            }
            *state = ContainerState::Building;
        }

        let ordered = self.initialization_order();
        let order = match ordered {
            Ok(order) => order,
            Err(err) => {
                error!("[Container] ✗ {}", err);
                self.set_state(ContainerState::Failed);
                return Err(err);
            }
        };

        self.set_state(ContainerState::Initializing);
        info!(
            "[Container] Initializing {} services in dependency order",
            order.len()
        );

        let mut initialized = Vec::with_capacity(order.len());
        for key in order {
            let Some(descriptor) = self.descriptor(&key) else {
                continue;
            };
            if descriptor.lifetime != Lifetime::Singleton {
                continue;
            }
            match self.resolve_erased(key, &[]) {
                Ok(_) => {
                    info!("[Container] ✓ {} ready", key);
                    initialized.push(key);
                }
                Err(err) => {
                    error!("[Container] ✗ {} failed: {}", key, err);
                    let next = if matches!(err, ContainerError::CircularDependency { .. }) {
                        ContainerState::Failed
                    } else {
                        ContainerState::Uninitialized
                    };
                    self.set_state(next);
                    return Err(err);
                }
            }
        }

        self.set_state(ContainerState::Ready);
        info!("[Container] All {} singletons initialized", initialized.len());
        Ok(initialized)
    }

    /// Dispose one cached singleton. The registration stays; the next
    /// resolve builds a fresh instance.
    pub fn dispose<I: ?Sized + 'static>(&self) -> bool {
        self.evict(&ServiceKey::of::<I>())
    }

    /// Dispose every singleton in reverse creation order and drop all
    /// registrations.
    pub fn clear(&self) {
        self.set_state(ContainerState::Disposing);
        info!("[Container] Disposing all services");

        let order = std::mem::take(&mut *self.creation_order.lock());
        let instances = std::mem::take(&mut *self.singletons.write());
        for key in order.iter().rev() {
            if let Some(instance) = instances.get(key) {
                dispose_instance(key, instance.lifecycle.as_ref());
            }
        }

        {
            let mut registry = self.registry.write();
            registry.clear();
            *self.graph.write() = DependencyGraph::default();
        }
        self.async_init.write().clear();

        self.set_state(ContainerState::Cleared);
        info!("[Container] Cleared ({} instances disposed)", instances.len());
    }

    /// Number of live singleton instances.
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.singletons.read().len()
    }

    #[must_use]
    pub fn supervisor(&self) -> Option<&Arc<Supervisor>> {
        self.supervisor.as_ref()
    }

    fn evict(&self, key: &ServiceKey) -> bool {
        let removed = self.singletons.write().remove(key);
        let Some(instance) = removed else {
            return false;
        };
        self.creation_order.lock().retain(|k| k != key);
        dispose_instance(key, instance.lifecycle.as_ref());
        true
    }

    fn set_state(&self, next: ContainerState) {
        let mut state = self.state.write();
        if *state != next {
            debug!("[Container] State {} -> {}", *state, next);
            *state = next;
        }
    }
}

/// Wrap a factory or injector error. A cycle reached through
/// `Dependencies::get` is passed up unchanged.
fn resolution_error(key: ServiceKey, source: ServiceError) -> ContainerError {
    match source {
        ServiceError::Dependency(inner)
            if matches!(*inner, ContainerError::CircularDependency { .. }) =>
        {
            *inner
        }
        source => ContainerError::ResolutionFailure { key, source },
    }
}

fn dispose_instance(key: &ServiceKey, lifecycle: &dyn Service) {
    match std::panic::catch_unwind(AssertUnwindSafe(|| lifecycle.dispose())) {
        Ok(()) => debug!("[Container] Disposed {}", key),
        Err(panic) => error!(
            "[Container] ✗ {} panicked during dispose: {}",
            key,
            panic_message(panic.as_ref())
        ),
    }
}

fn lifetime_label(lifetime: Lifetime) -> &'static str {
    match lifetime {
        Lifetime::Singleton => "singleton",
        Lifetime::Transient => "transient",
        Lifetime::Scoped => "scoped",
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
