//! Prometheus self-instrumentation for train-manager.
//!
//! # Example
//!
//! ```ignore
//! use train_manager::telemetry::{export_metrics, init_metrics, TelemetryCollector};
//!
//! init_metrics()?;
//! TelemetryCollector::new().record_container_op("create", true);
//! std::fs::write("telemetry.prom", export_metrics())?;
//! ```

pub mod collectors;
pub mod registry;

pub use collectors::TelemetryCollector;
pub use registry::{export_metrics, init_metrics, telemetry, Telemetry};
