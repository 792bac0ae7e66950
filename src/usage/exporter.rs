//! Task-level usage export.
//!
//! [`UsageExporter`] queries each [`MetricKind`] for one container, reduces
//! the returned series and writes a [`TaskReport`]. A failed metric is
//! recorded in the report under `<kind>_error` and the remaining metrics are
//! still queried; a partial report is the normal outcome, not a failure.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::{ExportError, MetricsError};
use crate::telemetry::TelemetryCollector;
use crate::usage::backend::{MetricsBackend, RangeQuery, DEFAULT_PROMETHEUS_URL};
use crate::usage::reduce::{reduce, round_to, MetricKind, MetricSummary};
use crate::usage::report::{TaskInfo, TaskReport};

/// Default directory reports are written to.
pub const DEFAULT_EXPORT_DIR: &str = "./metrics_export";

/// Configuration for usage export.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Base URL of the metrics backend.
    pub prometheus_url: String,
    /// Directory reports are written to.
    pub export_dir: PathBuf,
    /// Sampling step for range queries.
    pub step: Duration,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            prometheus_url: DEFAULT_PROMETHEUS_URL.to_string(),
            export_dir: PathBuf::from(DEFAULT_EXPORT_DIR),
            step: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ExportConfig {
    /// Sets the metrics backend URL.
    pub fn with_prometheus_url(mut self, url: impl Into<String>) -> Self {
        self.prometheus_url = url.into();
        self
    }

    /// Sets the report directory.
    pub fn with_export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.export_dir = dir.into();
        self
    }

    /// Sets the query step.
    pub fn with_step(mut self, step: Duration) -> Self {
        self.step = step;
        self
    }

    /// Sets the HTTP timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Human-readable CPU sentence stored next to the raw total.
pub fn cpu_sentence(total_core_seconds: f64) -> String {
    format!(
        "Total CPU: {total_core_seconds:.4} core-seconds (equivalent to one core busy for {total_core_seconds:.2} s)"
    )
}

/// Builds usage reports from a metrics backend.
pub struct UsageExporter {
    backend: Arc<dyn MetricsBackend>,
    config: ExportConfig,
    telemetry: TelemetryCollector,
}

impl UsageExporter {
    pub fn new(backend: Arc<dyn MetricsBackend>, config: ExportConfig) -> Self {
        Self {
            backend,
            config,
            telemetry: TelemetryCollector::new(),
        }
    }

    /// Summarises the last `time_range_hours` of a container and writes the
    /// report.
    ///
    /// Individual metric failures never fail the call; only writing the
    /// report can.
    pub async fn export_task_metrics(
        &self,
        task_id: &str,
        container_name: &str,
        time_range_hours: u32,
    ) -> Result<(TaskReport, PathBuf), ExportError> {
        self.export_at(task_id, container_name, time_range_hours, Utc::now())
            .await
    }

    /// [`export_task_metrics`](Self::export_task_metrics) with an explicit
    /// window end.
    pub async fn export_at(
        &self,
        task_id: &str,
        container_name: &str,
        time_range_hours: u32,
        end: DateTime<Utc>,
    ) -> Result<(TaskReport, PathBuf), ExportError> {
        let report = self
            .collect(task_id, container_name, time_range_hours, end)
            .await;

        let path = report.write_to(&self.config.export_dir)?;
        info!(task_id, path = %path.display(), "Usage report written");

        Ok((report, path))
    }

    /// Queries every metric kind and assembles the report without writing it.
    pub async fn collect(
        &self,
        task_id: &str,
        container_name: &str,
        time_range_hours: u32,
        end: DateTime<Utc>,
    ) -> TaskReport {
        let end_ts = end.timestamp();
        let start_ts = end_ts - i64::from(time_range_hours) * 3600;

        let mut report = TaskReport::new(TaskInfo {
            task_id: task_id.to_string(),
            container_name: container_name.to_string(),
            time_range: format!("{time_range_hours}h"),
            query_time: end
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
        });

        for kind in MetricKind::ALL {
            let query = RangeQuery {
                query: kind.selector(container_name),
                start: start_ts,
                end: end_ts,
                step: self.config.step.as_secs().max(1),
            };

            let result = self.summarize(kind, &query).await;
            self.telemetry
                .record_metric_query(kind.as_str(), result.is_ok());

            match result {
                Ok(entries) => {
                    info!(task_id, metric = %kind, "Metric summarised");
                    report.metrics_summary.extend(entries);
                }
                Err(e) => {
                    let message = format!("metric {kind} failed: {e}");
                    warn!(task_id, metric = %kind, error = %e, "Metric summary failed");
                    report
                        .metrics_summary
                        .insert(kind.error_key(), Value::String(message));
                }
            }
        }

        report
    }

    async fn summarize(
        &self,
        kind: MetricKind,
        query: &RangeQuery,
    ) -> Result<Vec<(String, Value)>, MetricsError> {
        let series = self.backend.query_range(query).await?;

        let Some(first) = series.first() else {
            return Err(MetricsError::NoData(query.query.clone()));
        };

        let entries = match kind {
            MetricKind::Cpu => {
                // Counters from every matching instance add up.
                let total = series
                    .iter()
                    .filter_map(|s| reduce(&s.samples, kind).as_scalar())
                    .sum::<f64>();
                let total = round_to(total, 4);
                vec![
                    ("cpu_total_core_seconds".to_string(), json!(total)),
                    ("cpu_summary".to_string(), json!(cpu_sentence(total))),
                ]
            }
            MetricKind::Memory => match reduce(&first.samples, kind) {
                MetricSummary::Memory { peak_mb, avg_mb } => vec![
                    ("memory_peak_mb".to_string(), json!(peak_mb)),
                    ("memory_avg_mb".to_string(), json!(avg_mb)),
                ],
                MetricSummary::Scalar(_) => Vec::new(),
            },
            MetricKind::Disk | MetricKind::NetworkRx | MetricKind::NetworkTx => {
                let key = match kind {
                    MetricKind::Disk => "disk_usage_mb",
                    MetricKind::NetworkRx => "network_rx_total_mb",
                    _ => "network_tx_total_mb",
                };
                let value = reduce(&first.samples, kind).as_scalar().unwrap_or(0.0);
                vec![(key.to_string(), json!(value))]
            }
        };

        Ok(entries)
    }
}
