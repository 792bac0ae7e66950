//! Recording helpers over the registered telemetry metrics.
//!
//! Recording is a no-op until [`init_metrics`](super::init_metrics) has run,
//! so library users who never initialise telemetry pay nothing for it.

use super::registry::telemetry;

fn outcome(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}

/// Records train-manager's own activity.
#[derive(Debug, Clone, Default)]
pub struct TelemetryCollector;

impl TelemetryCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record a container lifecycle operation (`build`, `create`, `remove`).
    pub fn record_container_op(&self, operation: &str, success: bool) {
        if let Some(t) = telemetry() {
            t.container_operations
                .with_label_values(&[operation, outcome(success)])
                .inc();
        }

        tracing::trace!(operation, success, "Recorded container operation");
    }

    /// Record one range query for a metric kind.
    pub fn record_metric_query(&self, kind: &str, success: bool) {
        if let Some(t) = telemetry() {
            t.metric_queries.with_label_values(&[kind, outcome(success)]).inc();
        }
    }

    /// Record how long a completion wait took.
    pub fn observe_wait(&self, seconds: f64, success: bool) {
        if let Some(t) = telemetry() {
            t.wait_seconds
                .with_label_values(&[outcome(success)])
                .observe(seconds);
        }
    }
}
