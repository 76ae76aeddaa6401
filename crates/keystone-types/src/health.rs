//! Health record kept per registered service.

use crate::key::ServiceKey;
use crate::service::ServiceStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcome of the most recent health check for one service.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub service_key: ServiceKey,
    pub is_healthy: bool,
    pub last_checked: Option<DateTime<Utc>>,
    pub response_time_ms: f64,
    /// Failed checks since the monitor started tracking the service.
    pub error_count: u64,
    pub last_error: Option<String>,
}

impl ServiceHealth {
    /// A record that has not been checked yet.
    #[must_use]
    pub fn new(service_key: ServiceKey) -> Self {
        Self {
            service_key,
            is_healthy: true,
            last_checked: None,
            response_time_ms: 0.0,
            error_count: 0,
            last_error: None,
        }
    }

    #[must_use]
    pub fn status(&self) -> ServiceStatus {
        ServiceStatus::from_healthy(self.is_healthy)
    }

    /// Record a passing check.
    pub fn mark_healthy(&mut self, response_time_ms: f64) {
        self.is_healthy = true;
        self.response_time_ms = response_time_ms;
        self.last_checked = Some(Utc::now());
    }

    /// Record a failing check.
    pub fn mark_unhealthy(&mut self, response_time_ms: f64, error: impl Into<String>) {
        self.is_healthy = false;
        self.response_time_ms = response_time_ms;
        self.error_count += 1;
        self.last_error = Some(error.into());
        self.last_checked = Some(Utc::now());
    }
}
