//! Docker API wrapper using the bollard crate.
//!
//! [`DockerClient`] is the production [`ContainerRuntime`]. It is built once
//! per process and shared by reference; nothing here keeps a global
//! connection.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::BuildImageOptions;
use bollard::models::{ContainerInspectResponse, ContainerSummary, DeviceRequest, HostConfig};
use bollard::Docker;
use chrono::{DateTime, Utc};
use futures::StreamExt;

use crate::error::DockerError;
use crate::execution::runtime::{ContainerHandle, ContainerRuntime, ContainerState, RunSpec};

/// Docker client wrapper for container operations.
#[derive(Clone)]
pub struct DockerClient {
    docker: Docker,
}

impl DockerClient {
    /// Creates a new Docker client connecting to the local Docker daemon.
    ///
    /// # Errors
    ///
    /// Returns `DockerError::DaemonUnavailable` if the Docker daemon is not accessible.
    pub fn new() -> Result<Self, DockerError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| DockerError::DaemonUnavailable(format!("Failed to connect: {e}")))?;

        Ok(Self { docker })
    }

    /// Checks that the daemon answers.
    pub async fn ping(&self) -> Result<(), DockerError> {
        self.docker
            .ping()
            .await
            .map_err(|e| DockerError::DaemonUnavailable(e.to_string()))?;
        Ok(())
    }
}

/// Maps a bollard error, keeping 404 distinct from every other failure.
fn map_error(operation: &'static str, name: &str, err: BollardError) -> DockerError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } => DockerError::ContainerNotFound {
            name: name.to_string(),
        },
        other => DockerError::operation(operation, name, other),
    }
}

/// Packs a build context directory into an in-memory tar archive.
fn archive_context(context: &Path) -> Result<Vec<u8>, DockerError> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);
    builder.append_dir_all(".", context)?;
    Ok(builder.into_inner()?)
}

fn parse_created(created: Option<&str>) -> Option<DateTime<Utc>> {
    created
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn strip_name(name: &str) -> String {
    name.trim_start_matches('/').to_string()
}

fn handle_from_inspect(name: &str, info: ContainerInspectResponse) -> ContainerHandle {
    let status = info
        .state
        .as_ref()
        .and_then(|state| state.status.as_ref())
        .map(|s| ContainerState::from_status(&s.to_string()))
        .unwrap_or_else(|| ContainerState::Unknown(String::new()));

    ContainerHandle {
        id: info.id.unwrap_or_default(),
        name: info
            .name
            .as_deref()
            .map(strip_name)
            .unwrap_or_else(|| name.to_string()),
        status,
        image_ref: info
            .config
            .and_then(|config| config.image)
            .or(info.image)
            .unwrap_or_default(),
        created_at: parse_created(info.created.as_deref()),
    }
}

fn handle_from_summary(summary: ContainerSummary) -> Option<ContainerHandle> {
    let name = summary.names.as_ref()?.first().map(|n| strip_name(n))?;
    Some(ContainerHandle {
        id: summary.id.unwrap_or_default(),
        name,
        status: summary
            .state
            .as_deref()
            .map(ContainerState::from_status)
            .unwrap_or_else(|| ContainerState::Unknown(String::new())),
        image_ref: summary.image.unwrap_or_default(),
        created_at: summary
            .created
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
    })
}

/// Hands the text of an output frame to `on_chunk`. Stdin echoes are dropped.
fn forward_output(output: LogOutput, on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send)) {
    match output {
        LogOutput::StdOut { message }
        | LogOutput::StdErr { message }
        | LogOutput::Console { message } => on_chunk(&String::from_utf8_lossy(&message)),
        LogOutput::StdIn { .. } => {}
    }
}

fn host_config(spec: &RunSpec) -> HostConfig {
    let limits = &spec.limits;

    let device_requests = if limits.gpu_requested {
        Some(vec![DeviceRequest {
            count: Some(-1),
            capabilities: Some(vec![vec!["gpu".to_string()]]),
            ..Default::default()
        }])
    } else {
        None
    };

    HostConfig {
        cpu_quota: limits.cpu_quota,
        cpu_period: limits.cpu_period,
        cpu_shares: Some(limits.cpu_shares),
        memory: limits.memory_bytes,
        network_mode: Some(spec.network.clone()),
        auto_remove: Some(spec.auto_remove),
        device_requests,
        ..Default::default()
    }
}

#[async_trait]
impl ContainerRuntime for DockerClient {
    async fn build_image(&self, context: &Path, tag: &str) -> Result<(), DockerError> {
        let context = context.to_path_buf();
        let tarball = tokio::task::spawn_blocking(move || archive_context(&context))
            .await
            .map_err(|e| DockerError::BuildFailed(format!("Build context task failed: {e}")))?
            .map_err(|e| DockerError::BuildFailed(format!("Failed to pack build context: {e}")))?;

        let options = BuildImageOptions {
            t: tag.to_string(),
            rm: true,
            ..Default::default()
        };

        let mut stream = self
            .docker
            .build_image(options, None, Some(tarball.into()));

        while let Some(progress) = stream.next().await {
            let info =
                progress.map_err(|e| DockerError::BuildFailed(format!("Build stream error: {e}")))?;

            if let Some(error) = info.error {
                return Err(DockerError::BuildFailed(error));
            }
            if let Some(line) = info.stream.as_deref().map(str::trim_end) {
                if !line.is_empty() {
                    tracing::debug!(image = tag, "{}", line);
                }
            }
        }

        Ok(())
    }

    async fn inspect(&self, name: &str) -> Result<ContainerHandle, DockerError> {
        let info = self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
            .map_err(|e| map_error("inspect", name, e))?;

        Ok(handle_from_inspect(name, info))
    }

    async fn run_detached(&self, spec: &RunSpec) -> Result<String, DockerError> {
        let creation_failed = |reason: String| DockerError::CreationFailed {
            name: spec.name.clone(),
            reason,
        };

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            host_config: Some(host_config(spec)),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| creation_failed(e.to_string()))?;

        if let Err(e) = self
            .docker
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await
        {
            // A created-but-unstarted container would block the name.
            let _ = self
                .docker
                .remove_container(
                    &response.id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await;
            return Err(creation_failed(format!("start failed: {e}")));
        }

        Ok(response.id)
    }

    async fn stop(&self, name: &str, grace: Duration) -> Result<(), DockerError> {
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };

        match self.docker.stop_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            // Already stopped.
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(map_error("stop", name, e)),
        }
    }

    async fn remove(&self, name: &str, force: bool) -> Result<(), DockerError> {
        let options = RemoveContainerOptions {
            force,
            v: true,
            ..Default::default()
        };

        match self.docker.remove_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            // auto_remove got there first
            Err(BollardError::DockerResponseServerError {
                status_code: 409,
                message,
            }) if message.contains("already in progress") => Ok(()),
            Err(e) => Err(map_error("remove", name, e)),
        }
    }

    async fn list(&self, name_prefix: &str) -> Result<Vec<ContainerHandle>, DockerError> {
        let options = ListContainersOptions::<String> {
            all: true,
            filters: HashMap::from([("name".to_string(), vec![name_prefix.to_string()])]),
            ..Default::default()
        };

        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| DockerError::operation("list", name_prefix, e))?;

        // The daemon's name filter is a substring match.
        Ok(summaries
            .into_iter()
            .filter_map(handle_from_summary)
            .filter(|handle| handle.name.starts_with(name_prefix))
            .collect())
    }

    async fn logs(
        &self,
        name: &str,
        follow: bool,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<(), DockerError> {
        let options = LogsOptions::<String> {
            follow,
            stdout: true,
            stderr: true,
            timestamps: false,
            ..Default::default()
        };

        let mut logs = self.docker.logs(name, Some(options));

        while let Some(chunk) = logs.next().await {
            let output = chunk.map_err(|e| map_error("logs", name, e))?;
            forward_output(output, on_chunk);
        }

        Ok(())
    }
}
