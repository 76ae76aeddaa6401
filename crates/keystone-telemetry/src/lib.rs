//! # Keystone Telemetry
//!
//! Observability for the keystone runtime.
//!
//! ## Components
//!
//! - **Logs**: `tracing` with an `EnvFilter`, pretty or JSON output
//! - **Metrics**: Prometheus counters, gauges and histograms for the bus,
//!   the container, health checks and the scheduler tick
//!
//! ## Usage
//!
//! ```rust,ignore
//! use keystone_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() {
//!     let config = TelemetryConfig::from_env();
//!     let _guard = init_telemetry(&config).expect("Failed to init telemetry");
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `KEYSTONE_LOG_LEVEL` | `info` | Log level filter (`RUST_LOG` also honoured) |
//! | `KEYSTONE_JSON_LOGS` | `false` | JSON log lines |
//! | `KEYSTONE_METRICS` | `true` | Register Prometheus metrics |

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::{init_logging, LoggingHandle};
pub use metrics::{
    encode_metrics, register_metrics, MetricsHandle, ASYNC_HANDLER_COMPLETIONS, DISPATCH_DURATION,
    EVENTS_PUBLISHED, HANDLER_FAILURES, SERVICES_RESOLVED, SERVICES_UNHEALTHY, TICK_DURATION,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),
}

/// Initialize logging and, when enabled, metric registration.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let metrics = if config.metrics_enabled {
        Some(register_metrics()?)
    } else {
        None
    };
    let logging = init_logging(config)?;

    Ok(TelemetryGuard {
        _logging: logging,
        _metrics: metrics,
    })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    _logging: LoggingHandle,
    _metrics: Option<MetricsHandle>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!("Shutting down telemetry...");
    }
}

/// Convenience macro for recording a metric increment.
#[macro_export]
macro_rules! metric_inc {
    ($metric:expr) => {
        $metric.inc()
    };
    ($metric:expr, $labels:expr) => {
        $metric.with_label_values($labels).inc()
    };
}

/// Convenience macro for recording a metric with a value.
#[macro_export]
macro_rules! metric_observe {
    ($metric:expr, $value:expr) => {
        $metric.observe($value)
    };
    ($metric:expr, $labels:expr, $value:expr) => {
        $metric.with_label_values($labels).observe($value)
    };
}
