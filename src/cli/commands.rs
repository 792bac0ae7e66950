//! CLI command definitions for train-manager.
//!
//! Each subcommand maps onto one library operation; `run` chains them into a
//! full training run.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde_json::Value;
use tracing::{info, warn};

use crate::execution::{
    ContainerHandle, ContainerManager, DockerClient, ManagerConfig, ResourceLimits, WaitOptions,
    CONTAINER_NAME_PREFIX, DEFAULT_CPU_PERIOD, DEFAULT_CPU_QUOTA, DEFAULT_IMAGE, DEFAULT_MEM_LIMIT,
    DEFAULT_NETWORK,
};
use crate::pipeline::{RunOptions, TrainingRun};
use crate::telemetry;
use crate::usage::{ExportConfig, PrometheusClient, TaskReport, UsageExporter, DEFAULT_EXPORT_DIR, DEFAULT_PROMETHEUS_URL};

/// Training container manager with per-task usage reports.
#[derive(Parser)]
#[command(name = "train-manager")]
#[command(about = "Run training tasks in Docker containers and export their resource usage")]
#[command(version)]
#[command(
    long_about = "train-manager builds the training image, runs one container per task under CPU/memory limits, waits for it to finish and writes a JSON usage summary from Prometheus.\n\nExample usage:\n  train-manager run --task-id 42 --use-gpu\n  train-manager export --task-id 42 --hours 2"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Write train-manager's own Prometheus metrics to this file on exit.
    #[arg(long, global = true, env = "TRAIN_TELEMETRY_OUT")]
    pub telemetry_out: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Build, run, wait for and report on one training task.
    Run(RunArgs),

    /// Build the training image.
    Build(BuildArgs),

    /// List training containers.
    #[command(alias = "ls")]
    List(ListArgs),

    /// Remove training containers created before a cutoff.
    Cleanup(CleanupArgs),

    /// Export the usage summary of a task.
    Export(ExportArgs),
}

/// Container runtime settings shared by subcommands.
#[derive(clap::Args, Debug, Clone)]
pub struct DockerArgs {
    /// Image tag to build and run.
    #[arg(long, env = "TRAIN_IMAGE", default_value = DEFAULT_IMAGE)]
    pub image: String,

    /// Docker network the containers join.
    #[arg(long, env = "TRAIN_NETWORK", default_value = DEFAULT_NETWORK)]
    pub network: String,

    /// Directory holding the Dockerfile.
    #[arg(long, env = "TRAIN_BUILD_CONTEXT", default_value = "./")]
    pub context: PathBuf,

    /// Seconds to wait for a graceful stop before killing.
    #[arg(long, default_value = "10")]
    pub stop_grace: u64,
}

impl DockerArgs {
    fn manager_config(&self) -> ManagerConfig {
        ManagerConfig::default()
            .with_image(&self.image)
            .with_network(&self.network)
            .with_build_context(&self.context)
            .with_stop_grace(Duration::from_secs(self.stop_grace))
    }
}

/// Metrics backend settings shared by subcommands.
#[derive(clap::Args, Debug, Clone)]
pub struct MetricsArgs {
    /// Base URL of the Prometheus server.
    #[arg(long, env = "PROMETHEUS_URL", default_value = DEFAULT_PROMETHEUS_URL)]
    pub prometheus_url: String,

    /// Directory usage reports are written to.
    #[arg(long, env = "METRICS_EXPORT_DIR", default_value = DEFAULT_EXPORT_DIR)]
    pub export_dir: PathBuf,

    /// Range query step in seconds.
    #[arg(long, default_value = "10")]
    pub step: u64,

    /// HTTP timeout for metric queries in seconds.
    #[arg(long, default_value = "30")]
    pub request_timeout: u64,
}

impl MetricsArgs {
    fn export_config(&self) -> ExportConfig {
        ExportConfig::default()
            .with_prometheus_url(&self.prometheus_url)
            .with_export_dir(&self.export_dir)
            .with_step(Duration::from_secs(self.step))
            .with_request_timeout(Duration::from_secs(self.request_timeout))
    }
}

/// Arguments for `train-manager run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Task identifier, passed to the container as its argument.
    #[arg(short = 't', long)]
    pub task_id: String,

    /// Request every available GPU.
    #[arg(long)]
    pub use_gpu: bool,

    /// CPU cores granted to the container.
    #[arg(long, default_value_t = DEFAULT_CPU_QUOTA as f64 / DEFAULT_CPU_PERIOD as f64)]
    pub cpus: f64,

    /// Memory ceiling, e.g. 512m or 8g.
    #[arg(long, default_value = DEFAULT_MEM_LIMIT)]
    pub memory: String,

    /// Seconds between completion checks.
    #[arg(long, default_value = "5")]
    pub poll_interval: u64,

    /// Give up waiting after this many seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Do not stream container output.
    #[arg(long)]
    pub no_follow: bool,

    /// Hours of usage covered by the report.
    #[arg(long, default_value = "1")]
    pub hours: u32,

    /// Remove training containers older than this many hours after the run.
    #[arg(long, default_value = "1")]
    pub cleanup_hours: u32,

    #[command(flatten)]
    pub docker: DockerArgs,

    #[command(flatten)]
    pub metrics: MetricsArgs,
}

impl RunArgs {
    fn run_options(&self) -> RunOptions {
        let mut wait =
            WaitOptions::default().with_poll_interval(Duration::from_secs(self.poll_interval));
        if let Some(secs) = self.timeout {
            wait = wait.with_timeout(Duration::from_secs(secs));
        }

        RunOptions::new(&self.task_id)
            .with_gpu(self.use_gpu)
            .with_limits(
                ResourceLimits::unbounded()
                    .with_cpus(self.cpus)
                    .with_mem_limit(&self.memory),
            )
            .with_follow_logs(!self.no_follow)
            .with_wait(wait)
            .with_export_hours(self.hours)
            .with_cleanup_hours(self.cleanup_hours)
    }
}

/// Arguments for `train-manager build`.
#[derive(Parser, Debug)]
pub struct BuildArgs {
    #[command(flatten)]
    pub docker: DockerArgs,
}

/// Arguments for `train-manager list`.
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Output as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,

    #[command(flatten)]
    pub docker: DockerArgs,
}

/// Arguments for `train-manager cleanup`.
#[derive(Parser, Debug)]
pub struct CleanupArgs {
    /// Remove containers created before this many hours ago.
    #[arg(long, default_value = "24")]
    pub hours: u32,

    #[command(flatten)]
    pub docker: DockerArgs,
}

/// Arguments for `train-manager export`.
#[derive(Parser, Debug)]
pub struct ExportArgs {
    /// Task identifier.
    #[arg(short = 't', long)]
    pub task_id: String,

    /// Hours of usage covered by the report.
    #[arg(long, default_value = "1")]
    pub hours: u32,

    /// Container name to query. Defaults to the task's container name.
    #[arg(long)]
    pub container_name: Option<String>,

    /// Print the report as JSON instead of a summary.
    #[arg(short = 'j', long)]
    pub json: bool,

    #[command(flatten)]
    pub metrics: MetricsArgs,
}

/// Parse CLI arguments and return the Cli struct.
///
/// Split from [`run_with_cli`] so that logging can be set up from
/// `--log-level` before any command runs.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    if let Err(e) = telemetry::init_metrics() {
        warn!(error = %e, "Telemetry registry unavailable");
    }

    let result = match cli.command {
        Commands::Run(args) => run_run_command(args).await,
        Commands::Build(args) => run_build_command(args).await,
        Commands::List(args) => run_list_command(args).await,
        Commands::Cleanup(args) => run_cleanup_command(args).await,
        Commands::Export(args) => run_export_command(args).await,
    };

    if let Some(path) = &cli.telemetry_out {
        std::fs::write(path, telemetry::export_metrics())
            .with_context(|| format!("Failed to write telemetry to {}", path.display()))?;
        info!(path = %path.display(), "Telemetry written");
    }

    result
}

fn connect(docker: &DockerArgs) -> anyhow::Result<ContainerManager> {
    let client = DockerClient::new().context("Failed to connect to the Docker daemon")?;
    Ok(ContainerManager::new(Arc::new(client), docker.manager_config()))
}

fn exporter(metrics: &MetricsArgs) -> anyhow::Result<UsageExporter> {
    let config = metrics.export_config();
    let backend = PrometheusClient::new(&config.prometheus_url, config.request_timeout)
        .context("Failed to create Prometheus client")?;
    Ok(UsageExporter::new(Arc::new(backend), config))
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn run_run_command(args: RunArgs) -> anyhow::Result<()> {
    let options = args.run_options();
    let run = TrainingRun::new(connect(&args.docker)?, exporter(&args.metrics)?);

    println!("Starting training task {}", args.task_id);
    let outcome = run
        .execute(&options, |line| println!("{line}"))
        .await
        .with_context(|| format!("Training task {} failed to start", args.task_id))?;

    match &outcome.final_state {
        Some(state) => println!("Container {} finished ({state})", outcome.container_name),
        None => println!("Container {} did not report completion", outcome.container_name),
    }

    if let Some(report) = &outcome.report {
        print_report_summary(report);
    }
    if let Some(path) = &outcome.report_path {
        println!("Report written to {}", path.display());
    }
    if let Some(cleanup) = &outcome.cleanup {
        println!("Cleanup removed {} container(s)", cleanup.removed.len());
    }

    Ok(())
}

async fn run_build_command(args: BuildArgs) -> anyhow::Result<()> {
    let manager = connect(&args.docker)?;
    manager.build_image().await.context("Image build failed")?;
    println!("Built {}", manager.config().image);
    Ok(())
}

async fn run_list_command(args: ListArgs) -> anyhow::Result<()> {
    let manager = connect(&args.docker)?;
    let containers = manager.list().await.context("Failed to list containers")?;

    if args.json {
        let rows: Vec<Value> = containers.iter().map(container_json).collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if containers.is_empty() {
        println!("No training containers.");
        return Ok(());
    }

    println!(
        "{:<32} {:<10} {:<12} {:<24} CREATED",
        "NAME", "ID", "STATUS", "IMAGE"
    );
    for handle in &containers {
        println!("{}", container_row(handle));
    }
    Ok(())
}

async fn run_cleanup_command(args: CleanupArgs) -> anyhow::Result<()> {
    let manager = connect(&args.docker)?;
    let report = manager
        .cleanup_older_than(args.hours)
        .await
        .context("Cleanup failed")?;

    for name in &report.removed {
        println!("Removed {name}");
    }
    for (name, reason) in &report.failed {
        println!("Failed to remove {name}: {reason}");
    }
    println!(
        "Removed {}, failed {}, kept {}",
        report.removed.len(),
        report.failed.len(),
        report.kept
    );
    Ok(())
}

async fn run_export_command(args: ExportArgs) -> anyhow::Result<()> {
    let exporter = exporter(&args.metrics)?;
    let container_name = args
        .container_name
        .clone()
        .unwrap_or_else(|| format!("{CONTAINER_NAME_PREFIX}{}", args.task_id));

    let (report, path) = exporter
        .export_task_metrics(&args.task_id, &container_name, args.hours)
        .await
        .context("Failed to write usage report")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report_summary(&report);
        println!("Report written to {}", path.display());
    }
    Ok(())
}

fn container_json(handle: &ContainerHandle) -> Value {
    serde_json::json!({
        "name": handle.name,
        "id": handle.short_id(),
        "status": handle.status.to_string(),
        "image": handle.image_ref,
        "created_at": handle.created_at.map(|t| t.to_rfc3339()),
    })
}

fn container_row(handle: &ContainerHandle) -> String {
    let created = handle
        .created_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{:<32} {:<10} {:<12} {:<24} {}",
        handle.name,
        handle.short_id(),
        handle.status.to_string(),
        handle.image_ref,
        created
    )
}

fn print_report_summary(report: &TaskReport) {
    println!(
        "Usage for task {} ({}, last {})",
        report.task_info.task_id, report.task_info.container_name, report.task_info.time_range
    );
    for (key, value) in &report.metrics_summary {
        match value {
            Value::String(text) => println!("  {key}: {text}"),
            other => println!("  {key}: {other}"),
        }
    }
}
