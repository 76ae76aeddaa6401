//! # Keystone Bus - Event Dispatch Between Services
//!
//! Typed publish/subscribe for the services wired by the keystone container.
//!
//! ## Dispatch Model
//!
//! ```text
//! ┌──────────────┐                    ┌──────────────┐
//! │  Service A   │                    │  Service B   │
//! │              │    publish()       │   handler    │
//! │              │ ──────┐            │  (priority)  │
//! └──────────────┘       │            └──────────────┘
//!                        ▼                    ↑ sync, inline
//!                  ┌──────────────┐          │
//!                  │  Event Bus   │ ─────────┤
//!                  │              │          │ async, via Supervisor
//!                  └──────────────┘          ↓ (timeout-bounded)
//!                                     ┌──────────────┐
//!                                     │  Service C   │
//!                                     └──────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - Sync handlers run in ascending priority, ties in registration order,
//!   before `publish` returns.
//! - A failing handler never stops the rest of the fan-out; failures reach
//!   every error callback exactly once.
//! - Async handlers never block dispatch. A handler that outlives its
//!   timeout is reported as timed out and its cancellation token fires.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod bus;
pub mod config;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod history;
pub mod performance;
pub mod supervisor;

// Re-export main types
pub use bus::{EventBus, EventPublisher, HandlerCompletion, HandlerFailure};
pub use config::BusConfig;
pub use errors::{BusError, HandlerError};
pub use events::{Event, EventDomain, EventKind};
pub use handlers::{HandlerId, HandlerRegistry};
pub use history::EventHistoryRecord;
pub use performance::{EventStatistics, PerformanceMetric};
pub use supervisor::{Supervisor, UnitFuture, UnitOrigin, UnitOutcome, UnitReport};

/// Default capacity of the event history ring.
pub const DEFAULT_MAX_HISTORY: usize = 100;

/// Default timeout for async handlers, in milliseconds.
pub const DEFAULT_HANDLER_TIMEOUT_MS: u64 = 5000;
