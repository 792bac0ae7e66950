//! Persisted per-task usage reports.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ExportError;

/// Identifies the task and query window a report covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_id: String,
    pub container_name: String,
    /// Query window, e.g. `"1h"`.
    pub time_range: String,
    /// Local time the report was assembled, `%Y-%m-%d %H:%M:%S`.
    pub query_time: String,
}

/// Usage summary for one task.
///
/// `metrics_summary` maps report keys (`memory_peak_mb`, ...) to values, and
/// `<kind>_error` keys to the message of a failed metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub task_info: TaskInfo,
    pub metrics_summary: Map<String, Value>,
}

impl TaskReport {
    pub fn new(task_info: TaskInfo) -> Self {
        Self {
            task_info,
            metrics_summary: Map::new(),
        }
    }

    /// File name a task's report is written under.
    pub fn file_name(task_id: &str) -> String {
        format!("train_task_{task_id}_summary.json")
    }

    /// Keys of failed metrics.
    pub fn error_keys(&self) -> Vec<&str> {
        self.metrics_summary
            .keys()
            .filter(|key| key.ends_with("_error"))
            .map(String::as_str)
            .collect()
    }

    /// Looks up a numeric summary value.
    pub fn number(&self, key: &str) -> Option<f64> {
        self.metrics_summary.get(key).and_then(Value::as_f64)
    }

    /// Writes the report into `dir` as pretty-printed JSON.
    ///
    /// The directory is created if needed and an existing report for the
    /// same task is overwritten.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, ExportError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(Self::file_name(&self.task_info.task_id));
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json)?;
        Ok(path)
    }

    /// Reads a report previously written by [`write_to`](Self::write_to).
    pub fn read_from(path: &Path) -> Result<Self, ExportError> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}
