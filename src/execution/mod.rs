//! Docker execution layer for training tasks.
//!
//! This module drives training containers through the bollard crate:
//! image build, creation under resource limits, log streaming, polling to
//! completion, and cleanup of stale containers.
//!
//! # Architecture
//!
//! Container states follow this lifecycle:
//! ```text
//! created → running → exited (auto-removed) | removed (stop_and_remove)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use train_manager::execution::{ContainerManager, DockerClient, ManagerConfig, WaitOptions};
//!
//! let client = Arc::new(DockerClient::new()?);
//! let manager = ContainerManager::new(client, ManagerConfig::default());
//!
//! manager.build_image().await?;
//! manager.create("task-123", None, false).await?;
//! manager.wait_until_complete("train-task-task-123", WaitOptions::default()).await?;
//! ```

pub mod docker_client;
pub mod manager;
pub mod resources;
pub mod runtime;

pub use docker_client::DockerClient;
pub use manager::{
    is_expired, CleanupReport, ContainerManager, ManagerConfig, Teardown, WaitOptions,
    CONTAINER_NAME_PREFIX, DEFAULT_IMAGE, DEFAULT_NETWORK,
};
pub use resources::{
    parse_memory_limit, ResolvedLimits, ResourceLimits, DEFAULT_CPU_PERIOD, DEFAULT_CPU_QUOTA,
    DEFAULT_CPU_SHARES, DEFAULT_MEM_LIMIT,
};
pub use runtime::{short_id, ContainerHandle, ContainerRuntime, ContainerState, RunSpec};
