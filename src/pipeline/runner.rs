//! End-to-end training run.
//!
//! A run builds the image, starts the task's container, follows its output,
//! waits for it to finish, exports its usage and finally sweeps stale
//! containers. Only the build and creation steps can fail the run; the later
//! steps degrade to warnings so a report is still produced.

use std::path::PathBuf;

use tracing::{info, warn};

use crate::error::DockerError;
use crate::execution::{
    CleanupReport, ContainerManager, ContainerState, ResourceLimits, WaitOptions,
    DEFAULT_CPU_PERIOD, DEFAULT_CPU_QUOTA, DEFAULT_MEM_LIMIT,
};
use crate::usage::{TaskReport, UsageExporter};

/// Options for a single training run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub task_id: String,
    /// Request every available GPU.
    pub use_gpu: bool,
    /// Limits the container is created with.
    pub limits: ResourceLimits,
    /// Stream container output while it runs.
    pub follow_logs: bool,
    pub wait: WaitOptions,
    /// Window of the usage report, in hours.
    pub export_hours: u32,
    /// Age threshold for the post-run sweep, in hours.
    pub cleanup_hours: u32,
}

impl RunOptions {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            use_gpu: false,
            limits: ResourceLimits {
                cpu_quota: Some(DEFAULT_CPU_QUOTA),
                cpu_period: Some(DEFAULT_CPU_PERIOD),
                cpu_shares: None,
                mem_limit: Some(DEFAULT_MEM_LIMIT.to_string()),
            },
            follow_logs: true,
            wait: WaitOptions::default(),
            export_hours: 1,
            cleanup_hours: 1,
        }
    }

    /// Enables or disables the GPU request.
    pub fn with_gpu(mut self, use_gpu: bool) -> Self {
        self.use_gpu = use_gpu;
        self
    }

    /// Sets the container limits.
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Enables or disables log following.
    pub fn with_follow_logs(mut self, follow: bool) -> Self {
        self.follow_logs = follow;
        self
    }

    /// Sets how completion is polled.
    pub fn with_wait(mut self, wait: WaitOptions) -> Self {
        self.wait = wait;
        self
    }

    /// Sets the usage report window.
    pub fn with_export_hours(mut self, hours: u32) -> Self {
        self.export_hours = hours;
        self
    }

    /// Sets the post-run cleanup threshold.
    pub fn with_cleanup_hours(mut self, hours: u32) -> Self {
        self.cleanup_hours = hours;
        self
    }
}

/// What a finished run produced.
///
/// `None` in an optional field means that step failed and was logged.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub container_name: String,
    pub container_id: String,
    pub final_state: Option<ContainerState>,
    pub report: Option<TaskReport>,
    pub report_path: Option<PathBuf>,
    pub cleanup: Option<CleanupReport>,
}

/// Drives one task through build, execution and export.
pub struct TrainingRun {
    manager: ContainerManager,
    exporter: UsageExporter,
}

impl TrainingRun {
    pub fn new(manager: ContainerManager, exporter: UsageExporter) -> Self {
        Self { manager, exporter }
    }

    /// Executes the run, passing each container output line to `on_log`.
    ///
    /// # Errors
    ///
    /// Returns the `DockerError` of a failed image build or container
    /// creation. Nothing after creation fails the run.
    pub async fn execute(
        &self,
        options: &RunOptions,
        on_log: impl FnMut(&str) + Send,
    ) -> Result<RunOutcome, DockerError> {
        let task_id = options.task_id.as_str();
        info!(task_id, gpu = options.use_gpu, "Starting training run");

        self.manager.build_image().await?;

        let container_id = self
            .manager
            .create(task_id, Some(options.limits.clone()), options.use_gpu)
            .await?;
        let container_name = self.manager.container_name(task_id);

        if options.follow_logs {
            if let Err(e) = self
                .manager
                .stream_logs(&container_name, true, on_log)
                .await
            {
                warn!(container = %container_name, error = %e, "Log streaming stopped");
            }
        }

        let final_state = match self
            .manager
            .wait_until_complete(&container_name, options.wait)
            .await
        {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(container = %container_name, error = %e, "Waiting for completion failed");
                None
            }
        };

        let (report, report_path) = match self
            .exporter
            .export_task_metrics(task_id, &container_name, options.export_hours)
            .await
        {
            Ok((report, path)) => (Some(report), Some(path)),
            Err(e) => {
                warn!(task_id, error = %e, "Usage report could not be written");
                (None, None)
            }
        };

        let cleanup = match self.manager.cleanup_older_than(options.cleanup_hours).await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "Post-run cleanup failed");
                None
            }
        };

        info!(task_id, container = %container_name, "Training run finished");

        Ok(RunOutcome {
            container_name,
            container_id,
            final_state,
            report,
            report_path,
            cleanup,
        })
    }
}
