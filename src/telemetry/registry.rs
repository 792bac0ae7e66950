//! Prometheus registration and export for train-manager's own counters.
//!
//! These describe what the tool itself did (containers created, queries
//! issued); they are unrelated to the container metrics read back from the
//! metrics backend.

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// The registry together with every metric registered on it.
#[derive(Debug)]
pub struct Telemetry {
    pub registry: Registry,
    /// Container lifecycle operations, labeled by operation and outcome.
    pub container_operations: CounterVec,
    /// Range queries against the metrics backend, labeled by metric kind and outcome.
    pub metric_queries: CounterVec,
    /// Time spent waiting for containers to finish, labeled by outcome.
    pub wait_seconds: HistogramVec,
}

impl Telemetry {
    fn build() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let container_operations = CounterVec::new(
            Opts::new(
                "train_manager_container_operations_total",
                "Container lifecycle operations",
            ),
            &["operation", "outcome"],
        )?;

        let metric_queries = CounterVec::new(
            Opts::new(
                "train_manager_metric_queries_total",
                "Range queries issued to the metrics backend",
            ),
            &["kind", "outcome"],
        )?;

        let wait_seconds = HistogramVec::new(
            HistogramOpts::new(
                "train_manager_container_wait_seconds",
                "Time spent polling containers to completion",
            )
            .buckets(vec![10.0, 60.0, 300.0, 900.0, 1800.0, 3600.0, 14400.0]),
            &["outcome"],
        )?;

        registry.register(Box::new(container_operations.clone()))?;
        registry.register(Box::new(metric_queries.clone()))?;
        registry.register(Box::new(wait_seconds.clone()))?;

        Ok(Self {
            registry,
            container_operations,
            metric_queries,
            wait_seconds,
        })
    }
}

static TELEMETRY: OnceLock<Telemetry> = OnceLock::new();

/// Returns the process telemetry, if [`init_metrics`] has run.
pub fn telemetry() -> Option<&'static Telemetry> {
    TELEMETRY.get()
}

/// Initialize all metrics and register them with the registry.
///
/// Calling this more than once is harmless. Concurrent callers may each
/// build a set, but only one is installed and every caller sees that one.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if TELEMETRY.get().is_some() {
        return Ok(());
    }

    let built = Telemetry::build()?;
    if TELEMETRY.set(built).is_ok() {
        tracing::debug!("Telemetry registry initialized");
    }

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
pub fn export_metrics() -> String {
    let Some(telemetry) = TELEMETRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = telemetry.registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
