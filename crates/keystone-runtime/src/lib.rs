//! # Keystone Runtime Library
//!
//! Service container, health monitor and cooperative scheduler. The
//! `keystone` binary in `main.rs` is a runnable demo built on top.
//!
//! ## Architecture
//!
//! ```text
//!            ┌──────────────────── KeystoneRuntime ────────────────────┐
//!            │                                                         │
//!  register  │  ┌──────────────────┐  resolve   ┌──────────────────┐   │
//!  ─────────►│  │ ServiceContainer │◄───────────│  HealthMonitor   │   │
//!            │  └────────┬─────────┘            └────────┬─────────┘   │
//!            │           │ async init                    │ health      │
//!            │           ▼                               ▼ changes     │
//!            │  ┌──────────────────┐  handlers  ┌──────────────────┐   │
//!            │  │    Supervisor    │◄───────────│     EventBus     │   │
//!            │  └────────▲─────────┘            └────────▲─────────┘   │
//!            │           │ advance                       │ drain       │
//!            │           └────────── Scheduler ──────────┘             │
//!            └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Patterns
//!
//! - **Explicit dependencies**: services declare what they need at
//!   registration; nothing is discovered by reflection
//! - **Interface keys**: services are resolved as `Arc<dyn Trait>` (or a
//!   concrete type) keyed by `TypeId`
//! - **One driver**: all deferred work advances on the scheduler tick

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::type_complexity)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod config;
pub mod container;
pub mod health;
pub mod runtime;
pub mod scheduler;
pub mod wiring;

pub use config::{ConfigError, ContainerConfig, HealthConfig, RuntimeConfig, SchedulerConfig};
pub use container::{
    AsyncInitStatus, Constructed, ContainerState, Dependencies, DependencyGraph, Registration,
    ResolvedService, ServiceContainer, ServiceDescriptor,
};
pub use health::{HealthMonitor, HealthReport};
pub use runtime::{KeystoneRuntime, RuntimeStatus};
pub use scheduler::{CooperativeScheduler, TickReport};
