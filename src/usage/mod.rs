//! Per-task resource usage reports.
//!
//! Usage is read back from a Prometheus-compatible backend scraping cAdvisor
//! and reduced to one figure (or pair of figures) per metric kind.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use train_manager::usage::{ExportConfig, PrometheusClient, UsageExporter};
//!
//! let config = ExportConfig::default();
//! let backend = Arc::new(PrometheusClient::new(&config.prometheus_url, config.request_timeout)?);
//! let exporter = UsageExporter::new(backend, config);
//! let (report, path) = exporter.export_task_metrics("task-123", "train-task-task-123", 1).await?;
//! ```

pub mod backend;
pub mod exporter;
pub mod reduce;
pub mod report;

pub use backend::{
    parse_query_range, parse_response, MetricsBackend, PrometheusClient, RangeQuery,
    DEFAULT_PROMETHEUS_URL,
};
pub use exporter::{cpu_sentence, ExportConfig, UsageExporter, DEFAULT_EXPORT_DIR};
pub use reduce::{reduce, round_to, MetricKind, MetricSeries, MetricSummary, Sample};
pub use report::{TaskInfo, TaskReport};
