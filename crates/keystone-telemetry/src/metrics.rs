//! Prometheus metrics for the keystone runtime.
//!
//! All metrics follow the naming convention: `keystone_<area>_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: Monotonically increasing value (e.g., events_published_total)
//! - **Gauge**: Value that can go up or down (e.g., services_unhealthy)
//! - **Histogram**: Distribution of values (e.g., tick_duration_seconds)

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, IntCounterVec,
    Opts, Registry, TextEncoder,
};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // EVENT BUS METRICS
    // =========================================================================

    /// Events dispatched by the bus
    pub static ref EVENTS_PUBLISHED: IntCounterVec = IntCounterVec::new(
        Opts::new("keystone_bus_events_published_total", "Events dispatched by the event bus"),
        &["event_kind"]
    ).expect("metric creation failed");

    /// Handler failures by event kind and reason
    pub static ref HANDLER_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("keystone_bus_handler_failures_total", "Handler invocations that failed"),
        &["event_kind", "reason"]  // reason: error/panic/timeout
    ).expect("metric creation failed");

    /// Async handler units that completed successfully
    pub static ref ASYNC_HANDLER_COMPLETIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("keystone_bus_async_completions_total", "Async handler units that completed"),
        &["event_kind"]
    ).expect("metric creation failed");

    /// Wall-clock duration of handler fan-out per event
    pub static ref DISPATCH_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "keystone_bus_dispatch_duration_seconds",
            "Time spent invoking synchronous handlers for one event"
        ).buckets(exponential_buckets(0.00001, 2.0, 16).expect("bucket layout is valid"))
    ).expect("metric creation failed");

    // =========================================================================
    // CONTAINER METRICS
    // =========================================================================

    /// Instances built by the container
    pub static ref SERVICES_RESOLVED: CounterVec = CounterVec::new(
        Opts::new("keystone_container_instances_created_total", "Service instances constructed"),
        &["lifetime"]  // lifetime: singleton/transient
    ).expect("metric creation failed");

    /// Services whose latest health check failed
    pub static ref SERVICES_UNHEALTHY: Gauge = Gauge::new(
        "keystone_health_services_unhealthy",
        "Number of services currently reported unhealthy"
    ).expect("metric creation failed");

    // =========================================================================
    // SCHEDULER METRICS
    // =========================================================================

    /// Duration of one cooperative tick
    pub static ref TICK_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "keystone_scheduler_tick_duration_seconds",
            "Time spent in one scheduler tick"
        ).buckets(exponential_buckets(0.0001, 2.0, 14).expect("bucket layout is valid"))
    ).expect("metric creation failed");
}

/// Handle proving the metrics were registered.
#[derive(Debug)]
pub struct MetricsHandle {
    pub collectors: usize,
}

/// Register all metrics with the global registry.
///
/// Metrics work whether or not they are registered; registration only makes
/// them visible to [`encode_metrics`].
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Event bus
        Box::new(EVENTS_PUBLISHED.clone()),
        Box::new(HANDLER_FAILURES.clone()),
        Box::new(ASYNC_HANDLER_COMPLETIONS.clone()),
        Box::new(DISPATCH_DURATION.clone()),
        // Container
        Box::new(SERVICES_RESOLVED.clone()),
        Box::new(SERVICES_UNHEALTHY.clone()),
        // Scheduler
        Box::new(TICK_DURATION.clone()),
    ];

    let collectors = metrics.len();
    for metric in metrics {
        REGISTRY
            .register(metric)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    }

    Ok(MetricsHandle { collectors })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start a new timer for the given histogram.
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.observe(duration);
    }
}

/// Start timing for a histogram. Observation happens on drop.
#[macro_export]
macro_rules! time_histogram {
    ($histogram:expr) => {
        $crate::metrics::HistogramTimer::new(&$histogram)
    };
}
