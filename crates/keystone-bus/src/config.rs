//! Event bus configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for history, async handler timeouts and payload validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Capacity of the event history ring buffer.
    pub max_history: usize,

    /// Timeout applied to async handlers subscribed without an explicit one.
    pub default_handler_timeout_ms: u64,

    /// Reject events whose payload snapshot is null.
    pub validate_payloads: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_history: crate::DEFAULT_MAX_HISTORY,
            default_handler_timeout_ms: crate::DEFAULT_HANDLER_TIMEOUT_MS,
            validate_payloads: true,
        }
    }
}

impl BusConfig {
    #[must_use]
    pub fn default_handler_timeout(&self) -> Duration {
        Duration::from_millis(self.default_handler_timeout_ms)
    }
}
