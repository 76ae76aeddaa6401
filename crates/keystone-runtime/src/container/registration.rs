//! # Registration Builder
//!
//! Services declare their dependencies explicitly when they are registered:
//!
//! ```rust,ignore
//! container.register(
//!     Registration::<dyn Wallet>::singleton(|deps| {
//!         let publisher = deps.get::<dyn EventPublisher>()?;
//!         let wallet = Arc::new(LedgerWallet::new(publisher));
//!         Ok(Constructed::new(wallet.clone(), wallet))
//!     })
//!     .depends_on::<dyn EventPublisher>()
//!     .implemented_by::<LedgerWallet>()
//!     .priority(10),
//! );
//! ```
//!
//! `depends_on` edges are resolved before the factory runs. `inject` adds an
//! edge plus a post-construction step that hands the dependency to the
//! freshly built instance (property/method-style injection).

use super::ServiceContainer;
use keystone_types::{ContainerError, Lifetime, NoLifecycle, Service, ServiceError, ServiceKey};
use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// Type-erased interface handle. Always holds an `Arc<I>` for the key's `I`.
pub(crate) type ErasedInstance = Arc<dyn Any + Send + Sync>;

pub(crate) type ErasedFactory =
    Arc<dyn Fn(&Dependencies<'_>) -> Result<BuiltInstance, ServiceError> + Send + Sync>;

pub(crate) type ErasedInjector =
    Arc<dyn Fn(&ErasedInstance, &Dependencies<'_>) -> Result<(), ServiceError> + Send + Sync>;

/// Output of a type-erased factory.
#[derive(Clone)]
pub(crate) struct BuiltInstance {
    pub interface: ErasedInstance,
    pub lifecycle: Arc<dyn Service>,
}

/// A freshly constructed service: the interface handle callers resolve plus
/// the lifecycle handle the container drives.
pub struct Constructed<I: ?Sized> {
    interface: Arc<I>,
    lifecycle: Arc<dyn Service>,
}

impl<I: ?Sized> Constructed<I> {
    /// Interface and lifecycle handles, usually two views of one `Arc`.
    pub fn new(interface: Arc<I>, lifecycle: Arc<dyn Service>) -> Self {
        Self {
            interface,
            lifecycle,
        }
    }

    /// A value without lifecycle hooks.
    pub fn plain(interface: Arc<I>) -> Self {
        Self {
            interface,
            lifecycle: Arc::new(NoLifecycle),
        }
    }
}

impl<I: Service> Constructed<I> {
    /// A concrete service registered under its own type.
    pub fn service(instance: Arc<I>) -> Self {
        Self {
            lifecycle: instance.clone(),
            interface: instance,
        }
    }
}

/// Descriptor builder for one interface.
pub struct Registration<I: ?Sized + Send + Sync + 'static> {
    pub(crate) key: ServiceKey,
    pub(crate) implementation: &'static str,
    pub(crate) lifetime: Lifetime,
    pub(crate) priority: i32,
    pub(crate) dependencies: Vec<ServiceKey>,
    pub(crate) factory: ErasedFactory,
    pub(crate) injectors: Vec<ErasedInjector>,
    _interface: PhantomData<fn() -> Arc<I>>,
}

impl<I: ?Sized + Send + Sync + 'static> Registration<I> {
    /// Registration with an explicit lifetime.
    pub fn new<F>(lifetime: Lifetime, factory: F) -> Self
    where
        F: Fn(&Dependencies<'_>) -> Result<Constructed<I>, ServiceError> + Send + Sync + 'static,
    {
        let factory: ErasedFactory = Arc::new(move |deps| {
            let constructed = factory(deps)?;
            Ok(BuiltInstance {
                interface: Arc::new(constructed.interface),
                lifecycle: constructed.lifecycle,
            })
        });
        let key = ServiceKey::of::<I>();
        Self {
            key,
            implementation: key.name(),
            lifetime,
            priority: 0,
            dependencies: Vec::new(),
            factory,
            injectors: Vec::new(),
            _interface: PhantomData,
        }
    }

    pub fn singleton<F>(factory: F) -> Self
    where
        F: Fn(&Dependencies<'_>) -> Result<Constructed<I>, ServiceError> + Send + Sync + 'static,
    {
        Self::new(Lifetime::Singleton, factory)
    }

    pub fn transient<F>(factory: F) -> Self
    where
        F: Fn(&Dependencies<'_>) -> Result<Constructed<I>, ServiceError> + Send + Sync + 'static,
    {
        Self::new(Lifetime::Transient, factory)
    }

    pub fn scoped<F>(factory: F) -> Self
    where
        F: Fn(&Dependencies<'_>) -> Result<Constructed<I>, ServiceError> + Send + Sync + 'static,
    {
        Self::new(Lifetime::Scoped, factory)
    }

    /// Declare a constructor dependency.
    #[must_use]
    pub fn depends_on<D: ?Sized + 'static>(mut self) -> Self {
        self.add_dependency(ServiceKey::of::<D>());
        self
    }

    /// Declare a dependency delivered after construction.
    #[must_use]
    pub fn inject<D, F>(mut self, apply: F) -> Self
    where
        D: ?Sized + Send + Sync + 'static,
        F: Fn(&I, Arc<D>) -> Result<(), ServiceError> + Send + Sync + 'static,
    {
        let key = self.key;
        self.add_dependency(ServiceKey::of::<D>());
        self.injectors.push(Arc::new(move |instance, deps| {
            let target = instance.downcast_ref::<Arc<I>>().ok_or_else(|| {
                ServiceError::Construction(ContainerError::DowncastFailed(key).to_string())
            })?;
            let dependency = deps.get::<D>()?;
            apply(target.as_ref(), dependency)
        }));
        self
    }

    /// Lower values initialize and report first among independent services.
    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Record the concrete implementation type for logs and descriptors.
    #[must_use]
    pub fn implemented_by<T: ?Sized + 'static>(mut self) -> Self {
        self.implementation = std::any::type_name::<T>();
        self
    }

    fn add_dependency(&mut self, key: ServiceKey) {
        if !self.dependencies.contains(&key) {
            self.dependencies.push(key);
        }
    }
}

/// Dependencies handed to a factory or injector.
///
/// Declared edges that were registered are resolved before the factory runs;
/// anything else is resolved on demand.
pub struct Dependencies<'a> {
    container: &'a ServiceContainer,
    resolved: HashMap<ServiceKey, ErasedInstance>,
    path: Vec<ServiceKey>,
}

impl<'a> Dependencies<'a> {
    pub(crate) fn new(
        container: &'a ServiceContainer,
        resolved: HashMap<ServiceKey, ErasedInstance>,
        path: Vec<ServiceKey>,
    ) -> Self {
        Self {
            container,
            resolved,
            path,
        }
    }

    /// Fetch a dependency by interface.
    pub fn get<D: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<D>, ContainerError> {
        let key = ServiceKey::of::<D>();
        let erased = match self.resolved.get(&key) {
            Some(erased) => erased.clone(),
            None => self.container.resolve_erased(key, &self.path)?.interface,
        };
        downcast::<D>(key, &erased)
    }

    /// Like [`get`](Self::get) but treats any failure as absence.
    pub fn try_get<D: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<D>> {
        self.get::<D>().ok()
    }

    /// Keys resolved ahead of the factory call.
    #[must_use]
    pub fn resolved_keys(&self) -> Vec<ServiceKey> {
        self.resolved.keys().copied().collect()
    }
}

pub(crate) fn downcast<D: ?Sized + Send + Sync + 'static>(
    key: ServiceKey,
    erased: &ErasedInstance,
) -> Result<Arc<D>, ContainerError> {
    erased
        .downcast_ref::<Arc<D>>()
        .cloned()
        .ok_or(ContainerError::DowncastFailed(key))
}
