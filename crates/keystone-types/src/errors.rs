//! # Error Types
//!
//! Errors raised by service factories and by the container itself.

use crate::key::ServiceKey;
use thiserror::Error;

/// Errors a service reports from its factory or lifecycle hooks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The factory could not build the instance.
    #[error("Construction failed: {0}")]
    Construction(String),

    /// `initialize` or `initialize_async` failed.
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// A dependency could not be supplied. Keeps the container error so a
    /// cycle found below a factory still surfaces as a cycle.
    #[error("Dependency unavailable: {0}")]
    Dependency(Box<ContainerError>),

    /// Health check failed.
    #[error("Unhealthy: {0}")]
    Unhealthy(String),
}

impl From<ContainerError> for ServiceError {
    fn from(err: ContainerError) -> Self {
        Self::Dependency(Box::new(err))
    }
}

/// Errors raised by registration, resolution and container lifecycle calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContainerError {
    /// A key was registered twice. Only ever logged; the overwrite proceeds.
    #[error("Registration conflict: {key} re-registered, replacing {previous}")]
    RegistrationConflict {
        key: ServiceKey,
        previous: &'static str,
    },

    /// Resolve was called for a key with no descriptor.
    #[error("Service not registered: {0}")]
    ServiceNotRegistered(ServiceKey),

    /// The dependency graph contains a cycle through `key`.
    #[error("Circular dependency detected at {key}: {}", format_path(.path))]
    CircularDependency {
        key: ServiceKey,
        path: Vec<ServiceKey>,
    },

    /// The factory, an injector or `initialize` failed.
    #[error("Failed to resolve {key}: {source}")]
    ResolutionFailure {
        key: ServiceKey,
        #[source]
        source: ServiceError,
    },

    /// Scoped services have no scope boundary to live in.
    #[error("Scoped service {0} cannot be resolved: no scope is active")]
    ScopeUnavailable(ServiceKey),

    /// The container state does not allow the operation.
    #[error("Container is {state}, cannot {operation}")]
    InvalidState {
        state: &'static str,
        operation: &'static str,
    },

    /// A stored instance did not match the requested interface.
    #[error("Stored instance for {0} has an unexpected type")]
    DowncastFailed(ServiceKey),
}

impl ContainerError {
    /// Whether this error names `key` (directly or inside a cycle path).
    #[must_use]
    pub fn mentions(&self, key: &ServiceKey) -> bool {
        match self {
            Self::RegistrationConflict { key: k, .. }
            | Self::ResolutionFailure { key: k, .. }
            | Self::ServiceNotRegistered(k)
            | Self::ScopeUnavailable(k)
            | Self::DowncastFailed(k) => k == key,
            Self::CircularDependency { key: k, path } => k == key || path.contains(key),
            Self::InvalidState { .. } => false,
        }
    }
}

fn format_path(path: &[ServiceKey]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}
