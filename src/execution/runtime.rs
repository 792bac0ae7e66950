//! The container runtime seam.
//!
//! [`ContainerRuntime`] lists the verbs the lifecycle manager needs from a
//! container engine. [`DockerClient`](super::DockerClient) implements it on
//! top of bollard; tests implement it in memory.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DockerError;
use crate::execution::resources::ResolvedLimits;

/// State of a container as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    /// The runtime no longer knows the container.
    Removed,
    Unknown(String),
}

impl ContainerState {
    /// Maps a runtime status string (`"running"`, `"exited"`, ...) to a state.
    pub fn from_status(status: &str) -> Self {
        match status {
            "created" => ContainerState::Created,
            "running" => ContainerState::Running,
            "paused" => ContainerState::Paused,
            "restarting" => ContainerState::Restarting,
            "removing" => ContainerState::Removing,
            "exited" => ContainerState::Exited,
            "dead" => ContainerState::Dead,
            other => ContainerState::Unknown(other.to_string()),
        }
    }

    /// Returns true only for a running container.
    pub fn is_running(&self) -> bool {
        matches!(self, ContainerState::Running)
    }

    /// Exited and removed containers never change state again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ContainerState::Exited | ContainerState::Dead | ContainerState::Removed
        )
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerState::Created => write!(f, "created"),
            ContainerState::Running => write!(f, "running"),
            ContainerState::Paused => write!(f, "paused"),
            ContainerState::Restarting => write!(f, "restarting"),
            ContainerState::Removing => write!(f, "removing"),
            ContainerState::Exited => write!(f, "exited"),
            ContainerState::Dead => write!(f, "dead"),
            ContainerState::Removed => write!(f, "removed"),
            ContainerState::Unknown(s) => write!(f, "{}", s),
        }
    }
}

/// Snapshot of a container fetched from the runtime.
///
/// The runtime owns the container; a handle is only valid at the moment it
/// was fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
    pub status: ContainerState,
    pub image_ref: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// First eight characters of a container id.
pub fn short_id(id: &str) -> &str {
    let end = id
        .char_indices()
        .nth(8)
        .map(|(idx, _)| idx)
        .unwrap_or(id.len());
    &id[..end]
}

impl ContainerHandle {
    /// First eight characters of the container id.
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }
}

/// Everything the runtime needs to start a detached container.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    /// Named network the container joins.
    pub network: String,
    /// Let the runtime delete the container once its process exits.
    pub auto_remove: bool,
    pub limits: ResolvedLimits,
}

/// Verbs required from a container engine.
///
/// Lookups by name must report a missing container as
/// [`DockerError::ContainerNotFound`], never as a generic failure.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Builds `tag` from the directory at `context`.
    async fn build_image(&self, context: &Path, tag: &str) -> Result<(), DockerError>;

    /// Fetches the current state of a container by name or id.
    async fn inspect(&self, name: &str) -> Result<ContainerHandle, DockerError>;

    /// Creates and starts a container, returning its id.
    async fn run_detached(&self, spec: &RunSpec) -> Result<String, DockerError>;

    /// Stops a container, killing it once `grace` has elapsed.
    async fn stop(&self, name: &str, grace: Duration) -> Result<(), DockerError>;

    /// Removes a container.
    async fn remove(&self, name: &str, force: bool) -> Result<(), DockerError>;

    /// Lists every container, stopped ones included, whose name starts with `name_prefix`.
    async fn list(&self, name_prefix: &str) -> Result<Vec<ContainerHandle>, DockerError>;

    /// Reads container output, handing each chunk to `on_chunk`.
    ///
    /// With `follow` set the call only returns once the runtime closes the
    /// stream, typically when the container exits.
    async fn logs(
        &self,
        name: &str,
        follow: bool,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<(), DockerError>;
}
