//! # Service Lifecycle Flows
//!
//! Registration through disposal, driven only through the public container
//! API:
//!
//! ```text
//! register ──→ initialize_all ──→ resolve ──→ clear
//!                   │                            │
//!            topological order           reverse creation order
//! ```

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;

    use keystone_runtime::{
        Constructed, ContainerConfig, ContainerState, Registration, ServiceContainer,
    };
    use keystone_types::{ContainerError, Service, ServiceError, ServiceKey};

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    type Journal = Arc<Mutex<Vec<String>>>;

    /// A service that writes its lifecycle calls into a shared journal.
    struct Tracked {
        label: &'static str,
        journal: Journal,
    }

    impl Service for Tracked {
        fn initialize(&self) -> Result<(), ServiceError> {
            self.journal.lock().push(format!("init:{}", self.label));
            Ok(())
        }

        fn dispose(&self) {
            self.journal.lock().push(format!("dispose:{}", self.label));
        }
    }

    trait Storage: Send + Sync {
        fn label(&self) -> &'static str;
    }

    trait Catalog: Send + Sync {
        fn storage(&self) -> Arc<dyn Storage>;
    }

    trait Storefront: Send + Sync {}

    struct DiskStorage(Tracked);

    impl Storage for DiskStorage {
        fn label(&self) -> &'static str {
            self.0.label
        }
    }

    impl Service for DiskStorage {
        fn initialize(&self) -> Result<(), ServiceError> {
            self.0.initialize()
        }

        fn dispose(&self) {
            self.0.dispose();
        }
    }

    struct ItemCatalog {
        tracked: Tracked,
        storage: Arc<dyn Storage>,
    }

    impl Catalog for ItemCatalog {
        fn storage(&self) -> Arc<dyn Storage> {
            self.storage.clone()
        }
    }

    impl Service for ItemCatalog {
        fn initialize(&self) -> Result<(), ServiceError> {
            self.tracked.initialize()
        }

        fn dispose(&self) {
            self.tracked.dispose();
        }
    }

    struct Shop(Tracked);

    impl Storefront for Shop {}

    impl Service for Shop {
        fn initialize(&self) -> Result<(), ServiceError> {
            self.0.initialize()
        }

        fn dispose(&self) {
            self.0.dispose();
        }
    }

    fn container() -> ServiceContainer {
        ServiceContainer::new(ContainerConfig::default())
    }

    /// Storefront -> Catalog -> Storage, registered in reverse order.
    fn register_chain(container: &ServiceContainer, journal: &Journal) {
        let j = journal.clone();
        container.register(
            Registration::<dyn Storefront>::singleton(move |deps| {
                deps.get::<dyn Catalog>()?;
                let shop = Arc::new(Shop(Tracked {
                    label: "shop",
                    journal: j.clone(),
                }));
                Ok(Constructed::new(shop.clone() as Arc<dyn Storefront>, shop))
            })
            .depends_on::<dyn Catalog>(),
        );

        let j = journal.clone();
        container.register(
            Registration::<dyn Catalog>::singleton(move |deps| {
                let catalog = Arc::new(ItemCatalog {
                    tracked: Tracked {
                        label: "catalog",
                        journal: j.clone(),
                    },
                    storage: deps.get::<dyn Storage>()?,
                });
                Ok(Constructed::new(catalog.clone() as Arc<dyn Catalog>, catalog))
            })
            .depends_on::<dyn Storage>(),
        );

        let j = journal.clone();
        container.register(Registration::<dyn Storage>::singleton(move |_| {
            let storage = Arc::new(DiskStorage(Tracked {
                label: "storage",
                journal: j.clone(),
            }));
            Ok(Constructed::new(storage.clone() as Arc<dyn Storage>, storage))
        }));
    }

    // =============================================================================
    // RESOLUTION
    // =============================================================================

    #[test]
    fn test_singleton_resolves_to_one_instance() {
        let container = container();
        let journal = Journal::default();
        register_chain(&container, &journal);

        let first = container.resolve::<dyn Catalog>().unwrap();
        let second = container.resolve::<dyn Catalog>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        // The catalog holds the same storage the container hands out.
        let storage = container.resolve::<dyn Storage>().unwrap();
        assert!(Arc::ptr_eq(&first.storage(), &storage));
        assert_eq!(storage.label(), "storage");
    }

    #[test]
    fn test_transient_resolves_fresh_instances() {
        let container = container();
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        container.register(Registration::<dyn Storage>::transient(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            let storage = Arc::new(DiskStorage(Tracked {
                label: "scratch",
                journal: Journal::default(),
            }));
            Ok(Constructed::new(storage.clone() as Arc<dyn Storage>, storage))
        }));

        let first = container.resolve::<dyn Storage>().unwrap();
        let second = container.resolve::<dyn Storage>().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(built.load(Ordering::SeqCst), 2);
        assert_eq!(container.instance_count(), 0);
    }

    #[test]
    fn test_unregistered_interface_is_an_error() {
        let container = container();
        let err = container.resolve::<dyn Catalog>().err().unwrap();
        assert!(matches!(err, ContainerError::ServiceNotRegistered(_)));
        assert!(err.mentions(&ServiceKey::of::<dyn Catalog>()));
        assert!(container.try_resolve::<dyn Catalog>().is_none());
    }

    // =============================================================================
    // INITIALIZATION ORDER
    // =============================================================================

    #[test]
    fn test_initialize_all_follows_dependencies() {
        let container = container();
        let journal = Journal::default();
        register_chain(&container, &journal);

        let order = container.initialize_all().unwrap();
        assert_eq!(
            order,
            vec![
                ServiceKey::of::<dyn Storage>(),
                ServiceKey::of::<dyn Catalog>(),
                ServiceKey::of::<dyn Storefront>(),
            ]
        );
        assert_eq!(
            *journal.lock(),
            vec!["init:storage", "init:catalog", "init:shop"]
        );
        assert_eq!(container.state(), ContainerState::Ready);
    }

    #[test]
    fn test_clear_disposes_in_reverse_creation_order() {
        let container = container();
        let journal = Journal::default();
        register_chain(&container, &journal);
        container.initialize_all().unwrap();
        journal.lock().clear();

        container.clear();

        assert_eq!(
            *journal.lock(),
            vec!["dispose:shop", "dispose:catalog", "dispose:storage"]
        );
        assert_eq!(container.state(), ContainerState::Cleared);
        assert!(container.registered_keys().is_empty());
        assert_eq!(container.instance_count(), 0);
    }

    // =============================================================================
    // CYCLES
    // =============================================================================

    #[test]
    fn test_cycle_names_both_services_and_builds_nothing() {
        let container = container();
        let built = Arc::new(AtomicUsize::new(0));

        let counter = built.clone();
        container.register(
            Registration::<dyn Catalog>::singleton(move |deps| {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ServiceError::Construction("unreachable".into()))
            })
            .depends_on::<dyn Storage>(),
        );
        let counter = built.clone();
        container.register(
            Registration::<dyn Storage>::singleton(move |deps| {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ServiceError::Construction("unreachable".into()))
            })
            .depends_on::<dyn Catalog>(),
        );

        let err = container.initialize_all().unwrap_err();
        assert!(matches!(err, ContainerError::CircularDependency { .. }));
        assert!(err.mentions(&ServiceKey::of::<dyn Catalog>()));
        assert!(err.mentions(&ServiceKey::of::<dyn Storage>()));
        assert_eq!(built.load(Ordering::SeqCst), 0);
        assert_eq!(container.instance_count(), 0);
        assert_eq!(container.state(), ContainerState::Failed);

        // Resolution is refused until the container is cleared.
        assert!(matches!(
            container.resolve::<dyn Catalog>().err().unwrap(),
            ContainerError::InvalidState { .. }
        ));
        container.clear();
        assert_eq!(container.state(), ContainerState::Cleared);
    }

    #[test]
    fn test_direct_resolve_detects_cycle() {
        let container = container();
        container.register(
            Registration::<dyn Catalog>::singleton(|deps| {
                deps.get::<dyn Storage>()?;
                Err(ServiceError::Construction("unreachable".into()))
            })
            .depends_on::<dyn Storage>(),
        );
        container.register(
            Registration::<dyn Storage>::singleton(|deps| {
                deps.get::<dyn Catalog>()?;
                Err(ServiceError::Construction("unreachable".into()))
            })
            .depends_on::<dyn Catalog>(),
        );

        let err = container.resolve::<dyn Catalog>().err().unwrap();
        match err {
            ContainerError::CircularDependency { path, .. } => {
                assert_eq!(path.first(), path.last());
                assert!(path.contains(&ServiceKey::of::<dyn Storage>()));
            }
            other => panic!("expected a cycle, got {other}"),
        }
    }

    // =============================================================================
    // FAILURE AND RETRY
    // =============================================================================

    struct Flaky {
        attempts: Arc<AtomicUsize>,
    }

    impl Service for Flaky {
        fn initialize(&self) -> Result<(), ServiceError> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ServiceError::Initialization("cold cache".into()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_failed_initialize_is_not_cached() {
        let container = container();
        let attempts = Arc::new(AtomicUsize::new(0));
        let shared = attempts.clone();
        container.register_singleton(move |_| {
            Ok(Flaky {
                attempts: shared.clone(),
            })
        });

        let err = container.initialize_all().unwrap_err();
        assert!(matches!(err, ContainerError::ResolutionFailure { .. }));
        assert_eq!(container.state(), ContainerState::Uninitialized);
        assert_eq!(container.instance_count(), 0);

        container.initialize_all().unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(container.instance_count(), 1);
    }

    #[test]
    fn test_reregistration_replaces_and_disposes() {
        let container = container();
        let journal = Journal::default();

        let j = journal.clone();
        container.register(Registration::<dyn Storage>::singleton(move |_| {
            let storage = Arc::new(DiskStorage(Tracked {
                label: "v1",
                journal: j.clone(),
            }));
            Ok(Constructed::new(storage.clone() as Arc<dyn Storage>, storage))
        }));
        assert_eq!(container.resolve::<dyn Storage>().unwrap().label(), "v1");

        let j = journal.clone();
        container.register(Registration::<dyn Storage>::singleton(move |_| {
            let storage = Arc::new(DiskStorage(Tracked {
                label: "v2",
                journal: j.clone(),
            }));
            Ok(Constructed::new(storage.clone() as Arc<dyn Storage>, storage))
        }));

        assert!(journal.lock().contains(&"dispose:v1".to_string()));
        assert_eq!(container.resolve::<dyn Storage>().unwrap().label(), "v2");
        assert_eq!(container.registered_keys().len(), 1);
    }
}
