//! # Service Registry
//!
//! Descriptor storage keyed by interface. The registry only stores
//! descriptions of how to build services; instances live in the container's
//! singleton cache.

use super::registration::{ErasedFactory, ErasedInjector, Registration};
use chrono::{DateTime, Utc};
use keystone_types::{Lifetime, ServiceKey};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Registered description of one service.
#[derive(Clone)]
pub struct ServiceDescriptor {
    pub key: ServiceKey,
    pub implementation: &'static str,
    pub lifetime: Lifetime,
    pub priority: i32,
    /// Declared dependencies, in declaration order.
    pub dependencies: Vec<ServiceKey>,
    pub registered_at: DateTime<Utc>,
    /// Position in the registration sequence. Re-registering takes a new one.
    pub sequence: u64,
    pub(crate) factory: ErasedFactory,
    pub(crate) injectors: Vec<ErasedInjector>,
}

impl ServiceDescriptor {
    pub(crate) fn from_registration<I: ?Sized + Send + Sync + 'static>(
        registration: Registration<I>,
        sequence: u64,
    ) -> Self {
        Self {
            key: registration.key,
            implementation: registration.implementation,
            lifetime: registration.lifetime,
            priority: registration.priority,
            dependencies: registration.dependencies,
            registered_at: Utc::now(),
            sequence,
            factory: registration.factory,
            injectors: registration.injectors,
        }
    }

    /// Serializable view for diagnostics.
    #[must_use]
    pub fn summary(&self) -> DescriptorSummary {
        DescriptorSummary {
            key: self.key.to_string(),
            implementation: keystone_types::short_type_name(self.implementation),
            lifetime: self.lifetime,
            priority: self.priority,
            dependencies: self.dependencies.iter().map(ToString::to_string).collect(),
            registered_at: self.registered_at,
        }
    }
}

impl std::fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("key", &self.key)
            .field("implementation", &self.implementation)
            .field("lifetime", &self.lifetime)
            .field("priority", &self.priority)
            .field("dependencies", &self.dependencies)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DescriptorSummary {
    pub key: String,
    pub implementation: String,
    pub lifetime: Lifetime,
    pub priority: i32,
    pub dependencies: Vec<String>,
    pub registered_at: DateTime<Utc>,
}

/// Descriptors by key.
#[derive(Default)]
pub struct ServiceRegistry {
    descriptors: HashMap<ServiceKey, Arc<ServiceDescriptor>>,
    next_sequence: u64,
}

impl ServiceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a registration, returning the descriptor it replaced.
    pub(crate) fn insert<I: ?Sized + Send + Sync + 'static>(
        &mut self,
        registration: Registration<I>,
    ) -> (Arc<ServiceDescriptor>, Option<Arc<ServiceDescriptor>>) {
        self.next_sequence += 1;
        let descriptor = Arc::new(ServiceDescriptor::from_registration(
            registration,
            self.next_sequence,
        ));
        let previous = self.descriptors.insert(descriptor.key, descriptor.clone());
        (descriptor, previous)
    }

    pub fn remove(&mut self, key: &ServiceKey) -> Option<Arc<ServiceDescriptor>> {
        self.descriptors.remove(key)
    }

    #[must_use]
    pub fn get(&self, key: &ServiceKey) -> Option<Arc<ServiceDescriptor>> {
        self.descriptors.get(key).cloned()
    }

    #[must_use]
    pub fn contains(&self, key: &ServiceKey) -> bool {
        self.descriptors.contains_key(key)
    }

    /// Descriptors ordered by priority, then registration sequence.
    #[must_use]
    pub fn ordered(&self) -> Vec<Arc<ServiceDescriptor>> {
        let mut descriptors: Vec<_> = self.descriptors.values().cloned().collect();
        descriptors.sort_by_key(|d| (d.priority, d.sequence));
        descriptors
    }

    #[must_use]
    pub fn keys(&self) -> Vec<ServiceKey> {
        self.ordered().iter().map(|d| d.key).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn clear(&mut self) {
        self.descriptors.clear();
    }
}
