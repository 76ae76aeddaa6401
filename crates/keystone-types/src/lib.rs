//! # Keystone Types Crate
//!
//! Shared vocabulary for the keystone service container and event bus.
//!
//! ## Contents
//!
//! - [`ServiceKey`] / [`Lifetime`]: how an interface is named and reused
//! - [`Service`]: the lifecycle hooks (`initialize`, `initialize_async`,
//!   `health_check`, `dispose`)
//! - [`ServiceHealth`] / [`ServiceStatus`]: health-check records
//! - [`ContainerError`] / [`ServiceError`]: the error taxonomy

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod errors;
pub mod health;
pub mod key;
pub mod service;

pub use errors::{ContainerError, ServiceError};
pub use health::ServiceHealth;
pub use key::{short_type_name, Lifetime, ServiceKey};
pub use service::{NoLifecycle, Service, ServiceStatus};
