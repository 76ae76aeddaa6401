//! Telemetry configuration from environment variables.

use std::env;

/// Configuration for logging and metrics output.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name stamped on log lines
    pub service_name: String,

    /// Log level filter (trace, debug, info, warn, error)
    pub log_level: String,

    /// Whether to enable console output
    pub console_output: bool,

    /// Whether to enable JSON formatted logs
    pub json_logs: bool,

    /// Whether Prometheus metrics are registered at startup
    pub metrics_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "keystone".to_string(),
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
            metrics_enabled: true,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `KEYSTONE_SERVICE_NAME`: Service name (default: keystone)
    /// - `KEYSTONE_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `KEYSTONE_CONSOLE_OUTPUT`: Enable console output (default: true)
    /// - `KEYSTONE_JSON_LOGS`: Enable JSON logs (default: false, true in containers)
    /// - `KEYSTONE_METRICS`: Register Prometheus metrics (default: true)
    pub fn from_env() -> Self {
        let is_container =
            env::var("KUBERNETES_SERVICE_HOST").is_ok() || env::var("DOCKER_CONTAINER").is_ok();

        Self {
            service_name: env::var("KEYSTONE_SERVICE_NAME")
                .unwrap_or_else(|_| "keystone".to_string()),

            log_level: env::var("KEYSTONE_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            console_output: env::var("KEYSTONE_CONSOLE_OUTPUT")
                .map(|v| parse_flag(&v, true))
                .unwrap_or(true),

            json_logs: env::var("KEYSTONE_JSON_LOGS")
                .map(|v| parse_flag(&v, false))
                .unwrap_or(is_container),

            metrics_enabled: env::var("KEYSTONE_METRICS")
                .map(|v| parse_flag(&v, true))
                .unwrap_or(true),
        }
    }

    /// Configuration for a named component, e.g. a demo binary.
    pub fn for_service(service_name: &str) -> Self {
        let mut config = Self::from_env();
        config.service_name = service_name.to_string();
        config
    }
}

/// Parse a boolean-ish environment value, falling back to `default` for
/// anything unrecognised.
pub(crate) fn parse_flag(value: &str, default: bool) -> bool {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}
