//! train-manager: Docker lifecycle management for training tasks.
//!
//! This library builds the training image, runs one resource-limited
//! container per task, waits for it to finish and summarises the task's
//! resource usage from a Prometheus server scraping cAdvisor.

pub mod cli;
pub mod error;
pub mod execution;
pub mod pipeline;
pub mod telemetry;
pub mod usage;

// Re-export commonly used types
pub use error::{DockerError, ExportError, MetricsError};
pub use execution::{ContainerManager, DockerClient, ManagerConfig, ResourceLimits, WaitOptions};
pub use pipeline::{RunOptions, TrainingRun};
pub use usage::{ExportConfig, PrometheusClient, TaskReport, UsageExporter};
