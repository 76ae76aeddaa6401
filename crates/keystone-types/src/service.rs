//! # Service Lifecycle Trait
//!
//! Defines the contract that managed services implement to take part in
//! container initialization, health checks and disposal.
//!
//! ## Lifecycle
//!
//! ```text
//! factory ──► initialize() ──► [initialize_async() on the scheduler]
//!                   │
//!                   ▼
//!            health_check() (every health interval)
//!                   │
//!                   ▼
//!               dispose()   (explicit dispose / container clear)
//! ```
//!
//! ## Example Implementation
//!
//! ```rust,ignore
//! use keystone_types::{Service, ServiceError};
//! use async_trait::async_trait;
//!
//! pub struct Ledger { /* ... */ }
//!
//! #[async_trait]
//! impl Service for Ledger {
//!     fn initialize(&self) -> Result<(), ServiceError> { Ok(()) }
//! }
//! ```

use crate::errors::ServiceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse health of a managed service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceStatus {
    /// Check passed within the configured service timeout.
    Healthy,
    /// Check failed, resolution failed or the check was too slow.
    Unhealthy,
}

impl ServiceStatus {
    /// Map a boolean health flag to a status.
    #[must_use]
    pub fn from_healthy(healthy: bool) -> Self {
        if healthy {
            Self::Healthy
        } else {
            Self::Unhealthy
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "Healthy"),
            Self::Unhealthy => write!(f, "Unhealthy"),
        }
    }
}

/// The lifecycle hooks a managed service exposes.
///
/// Every hook has a default, so a plain value type only needs
/// `impl Service for T {}`.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Human-readable name used in logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Synchronous initializer, invoked once right after construction.
    ///
    /// An error here discards the freshly built instance.
    fn initialize(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Whether `initialize_async` should be scheduled after `initialize`.
    fn has_async_initializer(&self) -> bool {
        false
    }

    /// Asynchronous initializer, run as a supervised unit on the scheduler.
    async fn initialize_async(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Liveness check used by the health monitor.
    fn health_check(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    /// Release resources. Called when the container drops the instance.
    fn dispose(&self) {}
}

/// Lifecycle stand-in for values that carry no hooks of their own.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLifecycle;

impl Service for NoLifecycle {
    fn name(&self) -> &'static str {
        "NoLifecycle"
    }
}
