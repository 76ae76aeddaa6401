//! Per-event and per-operation timing statistics.

use crate::events::EventKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// Running timing statistics for one event kind or operation name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceMetric {
    pub name: String,
    pub count: u64,
    pub total_duration: Duration,
    /// Always `total_duration / count`.
    pub avg_duration: Duration,
    pub min_duration: Duration,
    pub max_duration: Duration,
    pub last_timestamp: Option<DateTime<Utc>>,
}

impl PerformanceMetric {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            count: 0,
            total_duration: Duration::ZERO,
            avg_duration: Duration::ZERO,
            min_duration: Duration::ZERO,
            max_duration: Duration::ZERO,
            last_timestamp: None,
        }
    }

    /// Fold one observation in.
    pub fn record(&mut self, elapsed: Duration) {
        if self.count == 0 || elapsed < self.min_duration {
            self.min_duration = elapsed;
        }
        if elapsed > self.max_duration {
            self.max_duration = elapsed;
        }
        self.count += 1;
        self.total_duration += elapsed;
        self.avg_duration = average(self.total_duration, self.count);
        self.last_timestamp = Some(Utc::now());
    }
}

fn average(total: Duration, count: u64) -> Duration {
    match u32::try_from(count) {
        Ok(0) => Duration::ZERO,
        Ok(n) => total / n,
        Err(_) => total.div_f64(count as f64),
    }
}

/// Metrics keyed by name.
#[derive(Debug, Default)]
pub struct PerformanceTracker {
    metrics: HashMap<String, PerformanceMetric>,
}

impl PerformanceTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, name: &str, elapsed: Duration) {
        self.metrics
            .entry(name.to_string())
            .or_insert_with(|| PerformanceMetric::new(name))
            .record(elapsed);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<PerformanceMetric> {
        self.metrics.get(name).cloned()
    }

    /// Every metric, sorted by name.
    #[must_use]
    pub fn all(&self) -> Vec<PerformanceMetric> {
        let mut all: Vec<_> = self.metrics.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn clear(&mut self) {
        self.metrics.clear();
    }
}

/// Metric name used for async completions of a kind.
#[must_use]
pub fn async_metric_name(kind: EventKind) -> String {
    format!("async:{}", kind.as_str())
}

/// Per-kind counters reported by `EventBus::statistics`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventStatistics {
    pub kind: Option<EventKind>,
    pub sync_subscribers: usize,
    pub async_subscribers: usize,
    pub published: u64,
    pub handler_failures: u64,
    pub timeouts: u64,
    pub async_completed: u64,
    pub last_published: Option<DateTime<Utc>>,
}
