//! Reduction of raw metric series into task-level summaries.
//!
//! | kind       | treated as | summary                   | unit, rounding   |
//! |------------|------------|---------------------------|------------------|
//! | cpu        | counter    | last - first              | seconds, 4 dp    |
//! | mem        | gauge      | peak and mean             | MB, 2 dp         |
//! | disk       | gauge      | last                      | MB, 4 dp         |
//! | network_*  | counter    | last - first              | MB, 4 dp         |
//!
//! Fewer than two samples always reduce to the kind's zero value.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// The container metrics a usage report covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Cpu,
    #[serde(rename = "mem")]
    Memory,
    Disk,
    NetworkRx,
    NetworkTx,
}

impl MetricKind {
    /// Every kind, in report order.
    pub const ALL: [MetricKind; 5] = [
        MetricKind::Cpu,
        MetricKind::Memory,
        MetricKind::Disk,
        MetricKind::NetworkRx,
        MetricKind::NetworkTx,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Cpu => "cpu",
            MetricKind::Memory => "mem",
            MetricKind::Disk => "disk",
            MetricKind::NetworkRx => "network_rx",
            MetricKind::NetworkTx => "network_tx",
        }
    }

    /// cAdvisor metric backing this kind.
    pub fn metric_name(&self) -> &'static str {
        match self {
            MetricKind::Cpu => "container_cpu_usage_seconds_total",
            MetricKind::Memory => "container_memory_usage_bytes",
            MetricKind::Disk => "container_fs_usage_bytes",
            MetricKind::NetworkRx => "container_network_receive_bytes_total",
            MetricKind::NetworkTx => "container_network_transmit_bytes_total",
        }
    }

    /// PromQL selector scoped to one container name.
    pub fn selector(&self, container_name: &str) -> String {
        let escaped = container_name.replace('\\', "\\\\").replace('\'', "\\'");
        format!("{}{{name='{}'}}", self.metric_name(), escaped)
    }

    /// Report key recording a failure for this kind.
    pub fn error_key(&self) -> String {
        format!("{}_error", self.as_str())
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `(timestamp, value)` sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: f64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Samples for one instance over the query window, ascending by timestamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    /// Label set identifying the instance.
    pub labels: BTreeMap<String, String>,
    pub samples: Vec<Sample>,
}

impl MetricSeries {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self {
            labels: BTreeMap::new(),
            samples,
        }
    }
}

/// Reduced value for one metric kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricSummary {
    Scalar(f64),
    Memory { peak_mb: f64, avg_mb: f64 },
}

impl MetricSummary {
    /// The value reported when there is not enough data.
    pub fn zero(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Memory => MetricSummary::Memory {
                peak_mb: 0.0,
                avg_mb: 0.0,
            },
            _ => MetricSummary::Scalar(0.0),
        }
    }

    /// The scalar value, or `None` for memory summaries.
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            MetricSummary::Scalar(v) => Some(*v),
            MetricSummary::Memory { .. } => None,
        }
    }
}

/// Rounds half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Reduces one series to the summary for `kind`.
pub fn reduce(samples: &[Sample], kind: MetricKind) -> MetricSummary {
    let (first, last) = match samples {
        [first, .., last] => (first.value, last.value),
        _ => return MetricSummary::zero(kind),
    };

    match kind {
        MetricKind::Cpu => MetricSummary::Scalar(round_to(last - first, 4)),
        MetricKind::Memory => {
            let peak = samples
                .iter()
                .map(|s| s.value)
                .fold(f64::NEG_INFINITY, f64::max);
            let avg = samples.iter().map(|s| s.value).sum::<f64>() / samples.len() as f64;
            MetricSummary::Memory {
                peak_mb: round_to(peak / BYTES_PER_MB, 2),
                avg_mb: round_to(avg / BYTES_PER_MB, 2),
            }
        }
        MetricKind::Disk => MetricSummary::Scalar(round_to(last / BYTES_PER_MB, 4)),
        MetricKind::NetworkRx | MetricKind::NetworkTx => {
            MetricSummary::Scalar(round_to((last - first) / BYTES_PER_MB, 4))
        }
    }
}
