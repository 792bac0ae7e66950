//! Container lifecycle management for training tasks.
//!
//! A task's container is addressed by a name derived from its task id. The
//! manager never caches container state: every call asks the runtime again.
//!
//! ```text
//! created → running → exited (runtime auto-removes)
//!                   → removed (stop_and_remove)
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::DockerError;
use crate::execution::resources::ResourceLimits;
use crate::execution::runtime::{
    short_id, ContainerHandle, ContainerRuntime, ContainerState, RunSpec,
};
use crate::telemetry::TelemetryCollector;

/// Prefix shared by every training container name.
pub const CONTAINER_NAME_PREFIX: &str = "train-task-";

/// Default image tag for training containers.
pub const DEFAULT_IMAGE: &str = "train-task:latest";

/// Default operator-managed network shared with the monitoring stack.
pub const DEFAULT_NETWORK: &str = "docker-monitor-demo_monitor-network";

/// Configuration for the container manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Image tag to build and run.
    pub image: String,
    /// Named network the containers join.
    pub network: String,
    /// Prefix prepended to task ids to form container names.
    pub name_prefix: String,
    /// Directory holding the Dockerfile.
    pub build_context: PathBuf,
    /// Grace period before a stop escalates to a kill.
    pub stop_grace: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            network: DEFAULT_NETWORK.to_string(),
            name_prefix: CONTAINER_NAME_PREFIX.to_string(),
            build_context: PathBuf::from("./"),
            stop_grace: Duration::from_secs(10),
        }
    }
}

impl ManagerConfig {
    /// Sets the image tag.
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Sets the network containers are attached to.
    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = network.into();
        self
    }

    /// Sets the build context directory.
    pub fn with_build_context(mut self, path: impl Into<PathBuf>) -> Self {
        self.build_context = path.into();
        self
    }

    /// Sets the stop grace period.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }
}

/// How to poll a container until it stops running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub poll_interval: Duration,
    /// Give up after this long. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            timeout: None,
        }
    }
}

impl WaitOptions {
    /// Sets the delay between status checks.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets an upper bound on the wait.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Outcome of a successful teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// The container existed and has been removed.
    Removed,
    /// There was nothing to remove.
    AlreadyAbsent,
}

/// Result of a cleanup sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Names of containers that were removed.
    pub removed: Vec<String>,
    /// Containers that could not be removed, with the reason.
    pub failed: Vec<(String, String)>,
    /// Number of matching containers left alone.
    pub kept: usize,
}

/// Returns true when a container created at `created` is due for cleanup.
///
/// Only calendar dates are compared: the creation date must fall strictly
/// before the date of `now - hours`. A container created earlier on the
/// cutoff's own date is kept, however many hours old it is.
pub fn is_expired(created: DateTime<Utc>, now: DateTime<Utc>, hours: u32) -> bool {
    let cutoff = now - chrono::Duration::hours(i64::from(hours));
    created.date_naive() < cutoff.date_naive()
}

/// Splits streamed log chunks into whole lines.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    fn push(&mut self, chunk: &str, emit: &mut impl FnMut(&str)) {
        self.pending.push_str(chunk);
        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            emit(line.trim_end_matches(['\n', '\r']));
        }
    }

    fn finish(&mut self, emit: &mut impl FnMut(&str)) {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            emit(rest.trim_end_matches('\r'));
        }
    }
}

/// Creates, watches and tears down training containers.
pub struct ContainerManager {
    runtime: Arc<dyn ContainerRuntime>,
    config: ManagerConfig,
    telemetry: TelemetryCollector,
}

impl ContainerManager {
    /// Creates a manager on top of an already connected runtime.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: ManagerConfig) -> Self {
        Self {
            runtime,
            config,
            telemetry: TelemetryCollector::new(),
        }
    }

    /// Returns the manager configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Container name for a task id.
    pub fn container_name(&self, task_id: &str) -> String {
        format!("{}{}", self.config.name_prefix, task_id)
    }

    /// Builds the training image from the configured context.
    pub async fn build_image(&self) -> Result<(), DockerError> {
        info!(
            image = %self.config.image,
            context = %self.config.build_context.display(),
            "Building training image"
        );

        let result = self
            .runtime
            .build_image(&self.config.build_context, &self.config.image)
            .await;
        self.telemetry.record_container_op("build", result.is_ok());
        result?;

        info!(image = %self.config.image, "Training image built");
        Ok(())
    }

    /// Checks whether a container with this name exists.
    ///
    /// Absence is `Ok(false)`; only other runtime failures are errors.
    pub async fn exists(&self, name: &str) -> Result<bool, DockerError> {
        match self.runtime.inspect(name).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Starts a fresh container for `task_id` and returns its id.
    ///
    /// Any container already holding the task's name is stopped and removed
    /// first. `limits` replaces the default limits wholesale when given.
    ///
    /// # Errors
    ///
    /// Returns `DockerError::CreationFailed` if the old container cannot be
    /// removed or the runtime rejects the new one, and
    /// `DockerError::InvalidLimits` for malformed limits.
    pub async fn create(
        &self,
        task_id: &str,
        limits: Option<ResourceLimits>,
        gpu: bool,
    ) -> Result<String, DockerError> {
        let name = self.container_name(task_id);
        let resolved = ResourceLimits::resolve(limits, gpu)?;

        let existing = self.exists(&name).await.map_err(|e| DockerError::CreationFailed {
            name: name.clone(),
            reason: format!("existence check failed: {e}"),
        })?;
        if existing {
            info!(container = %name, "Container already exists, removing it first");
            self.stop_and_remove(&name)
                .await
                .map_err(|e| DockerError::CreationFailed {
                    name: name.clone(),
                    reason: format!("existing container could not be removed: {e}"),
                })?;
        }

        let spec = RunSpec {
            name: name.clone(),
            image: self.config.image.clone(),
            command: vec![task_id.to_string()],
            network: self.config.network.clone(),
            auto_remove: true,
            limits: resolved,
        };

        let result = self.runtime.run_detached(&spec).await;
        self.telemetry.record_container_op("create", result.is_ok());

        let id = result.map_err(|e| match e {
            DockerError::CreationFailed { .. } => e,
            other => DockerError::CreationFailed {
                name: name.clone(),
                reason: other.to_string(),
            },
        })?;

        info!(
            container = %name,
            id = %short_id(&id),
            gpu = spec.limits.gpu_requested,
            cpu_cores = ?spec.limits.cpu_cores(),
            memory_bytes = ?spec.limits.memory_bytes,
            "Container started"
        );

        Ok(id)
    }

    /// Stops the container if it is running, then force-removes it.
    ///
    /// A container that is already gone counts as success.
    pub async fn stop_and_remove(&self, name: &str) -> Result<Teardown, DockerError> {
        let result = self.teardown(name).await;
        self.telemetry.record_container_op("remove", result.is_ok());

        match &result {
            Ok(Teardown::Removed) => info!(container = %name, "Container removed"),
            Ok(Teardown::AlreadyAbsent) => info!(container = %name, "Container does not exist"),
            Err(e) => warn!(container = %name, error = %e, "Container teardown failed"),
        }

        result
    }

    async fn teardown(&self, name: &str) -> Result<Teardown, DockerError> {
        let handle = match self.runtime.inspect(name).await {
            Ok(handle) => handle,
            Err(e) if e.is_not_found() => return Ok(Teardown::AlreadyAbsent),
            Err(e) => return Err(e),
        };

        if handle.status.is_running() {
            match self.runtime.stop(name, self.config.stop_grace).await {
                Ok(()) => info!(container = %name, "Container stopped"),
                Err(e) if e.is_not_found() => return Ok(Teardown::Removed),
                Err(e) => return Err(e),
            }
        }

        match self.runtime.remove(name, true).await {
            Ok(()) => Ok(Teardown::Removed),
            // Stopping an auto-remove container can delete it before we get here.
            Err(e) if e.is_not_found() => Ok(Teardown::Removed),
            Err(e) => Err(e),
        }
    }

    /// Polls the container until it is no longer running.
    ///
    /// Returns the first non-running state seen. A container that has
    /// disappeared (auto-removed on exit) yields `ContainerState::Removed`.
    ///
    /// # Errors
    ///
    /// Any other lookup failure ends the wait immediately, and
    /// `DockerError::WaitTimeout` is returned once `options.timeout` elapses.
    pub async fn wait_until_complete(
        &self,
        name: &str,
        options: WaitOptions,
    ) -> Result<ContainerState, DockerError> {
        let started = Instant::now();

        let outcome = loop {
            let state = match self.runtime.inspect(name).await {
                Ok(handle) => handle.status,
                Err(e) if e.is_not_found() => ContainerState::Removed,
                Err(e) => break Err(e),
            };

            if !state.is_running() {
                info!(container = %name, status = %state, "Container finished");
                break Ok(state);
            }

            if let Some(timeout) = options.timeout {
                if started.elapsed() >= timeout {
                    break Err(DockerError::WaitTimeout {
                        name: name.to_string(),
                        timeout,
                    });
                }
            }

            debug!(container = %name, "Container still running");
            tokio::time::sleep(options.poll_interval).await;
        };

        self.telemetry
            .observe_wait(started.elapsed().as_secs_f64(), outcome.is_ok());
        outcome
    }

    /// Reads the container's output.
    ///
    /// With `follow` set, `emit` is called once per line as output arrives
    /// and the call returns when the runtime closes the stream. Otherwise
    /// the buffered output is read once and passed to `emit` as one piece.
    pub async fn stream_logs(
        &self,
        name: &str,
        follow: bool,
        mut emit: impl FnMut(&str) + Send,
    ) -> Result<(), DockerError> {
        if !follow {
            let text = self.read_logs(name).await?;
            emit(&text);
            return Ok(());
        }

        let mut lines = LineBuffer::default();
        let mut on_chunk = |chunk: &str| lines.push(chunk, &mut emit);
        self.runtime.logs(name, true, &mut on_chunk).await?;
        lines.finish(&mut emit);
        Ok(())
    }

    /// Returns the container's output so far as one string.
    pub async fn read_logs(&self, name: &str) -> Result<String, DockerError> {
        let mut text = String::new();
        let mut on_chunk = |chunk: &str| text.push_str(chunk);
        self.runtime.logs(name, false, &mut on_chunk).await?;
        Ok(text)
    }

    /// Lists all training containers, stopped ones included.
    pub async fn list(&self) -> Result<Vec<ContainerHandle>, DockerError> {
        self.runtime.list(&self.config.name_prefix).await
    }

    /// Removes training containers created before the cutoff date.
    ///
    /// See [`is_expired`] for the comparison rule.
    pub async fn cleanup_older_than(&self, hours: u32) -> Result<CleanupReport, DockerError> {
        self.cleanup_older_than_at(hours, Utc::now()).await
    }

    /// [`cleanup_older_than`](Self::cleanup_older_than) with an explicit clock.
    pub async fn cleanup_older_than_at(
        &self,
        hours: u32,
        now: DateTime<Utc>,
    ) -> Result<CleanupReport, DockerError> {
        info!(hours, "Cleaning up old training containers");

        let mut report = CleanupReport::default();
        for handle in self.list().await? {
            let Some(created) = handle.created_at else {
                warn!(container = %handle.name, "Container has no creation time, skipping");
                report.kept += 1;
                continue;
            };

            if !is_expired(created, now, hours) {
                report.kept += 1;
                continue;
            }

            match self.stop_and_remove(&handle.name).await {
                Ok(_) => report.removed.push(handle.name),
                Err(e) => report.failed.push((handle.name, e.to_string())),
            }
        }

        info!(
            removed = report.removed.len(),
            failed = report.failed.len(),
            kept = report.kept,
            "Cleanup finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::{HashMap, HashSet};
    use std::path::Path;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    struct MockContainer {
        id: String,
        status: ContainerState,
        created_at: DateTime<Utc>,
        auto_remove: bool,
        /// Inspections left before a running container exits.
        polls_until_exit: Option<u32>,
        logs: Vec<String>,
    }

    /// In-memory runtime that mimics the daemon's name registry.
    #[derive(Default)]
    struct MockRuntime {
        containers: Mutex<HashMap<String, MockContainer>>,
        next_id: Mutex<u64>,
        failing_removals: Mutex<HashSet<String>>,
        fail_inspect: Mutex<bool>,
        reject_runs: Mutex<bool>,
        specs: Mutex<Vec<RunSpec>>,
        builds: Mutex<Vec<String>>,
        id_prefix: Mutex<Option<String>>,
    }

    impl MockRuntime {
        fn insert(&self, name: &str, status: ContainerState, created_at: DateTime<Utc>) -> String {
            let mut next = self.next_id.lock().expect("lock poisoned");
            *next += 1;
            let prefix = self.id_prefix.lock().expect("lock poisoned").clone();
            let id = format!("{}{:016x}", prefix.unwrap_or_default(), *next);
            self.containers.lock().expect("lock poisoned").insert(
                name.to_string(),
                MockContainer {
                    id: id.clone(),
                    status,
                    created_at,
                    auto_remove: false,
                    polls_until_exit: None,
                    logs: Vec::new(),
                },
            );
            id
        }

        fn get(&self, name: &str) -> Option<MockContainer> {
            self.containers.lock().expect("lock poisoned").get(name).cloned()
        }

        fn update(&self, name: &str, f: impl FnOnce(&mut MockContainer)) {
            if let Some(c) = self.containers.lock().expect("lock poisoned").get_mut(name) {
                f(c);
            }
        }

        fn not_found(name: &str) -> DockerError {
            DockerError::ContainerNotFound {
                name: name.to_string(),
            }
        }
    }

    #[async_trait]
    impl ContainerRuntime for MockRuntime {
        async fn build_image(&self, _context: &Path, tag: &str) -> Result<(), DockerError> {
            self.builds.lock().expect("lock poisoned").push(tag.to_string());
            Ok(())
        }

        async fn inspect(&self, name: &str) -> Result<ContainerHandle, DockerError> {
            if *self.fail_inspect.lock().expect("lock poisoned") {
                return Err(DockerError::operation("inspect", name, "daemon hung up"));
            }

            let mut containers = self.containers.lock().expect("lock poisoned");
            let container = containers.get_mut(name).ok_or_else(|| Self::not_found(name))?;

            if container.status.is_running() {
                match container.polls_until_exit {
                    Some(0) => {
                        container.status = ContainerState::Exited;
                        if container.auto_remove {
                            containers.remove(name);
                            return Err(Self::not_found(name));
                        }
                    }
                    Some(n) => container.polls_until_exit = Some(n - 1),
                    None => {}
                }
            }

            let container = containers.get(name).ok_or_else(|| Self::not_found(name))?;
            Ok(ContainerHandle {
                id: container.id.clone(),
                name: name.to_string(),
                status: container.status.clone(),
                image_ref: "train-task:latest".to_string(),
                created_at: Some(container.created_at),
            })
        }

        async fn run_detached(&self, spec: &RunSpec) -> Result<String, DockerError> {
            if *self.reject_runs.lock().expect("lock poisoned") {
                return Err(DockerError::CreationFailed {
                    name: spec.name.clone(),
                    reason: "insufficient memory".to_string(),
                });
            }
            if self.get(&spec.name).is_some() {
                return Err(DockerError::CreationFailed {
                    name: spec.name.clone(),
                    reason: "name already in use".to_string(),
                });
            }

            self.specs.lock().expect("lock poisoned").push(spec.clone());
            let id = self.insert(&spec.name, ContainerState::Running, Utc::now());
            self.update(&spec.name, |c| c.auto_remove = spec.auto_remove);
            Ok(id)
        }

        async fn stop(&self, name: &str, _grace: Duration) -> Result<(), DockerError> {
            let auto_remove = self.get(name).ok_or_else(|| Self::not_found(name))?.auto_remove;
            if auto_remove {
                self.containers.lock().expect("lock poisoned").remove(name);
            } else {
                self.update(name, |c| c.status = ContainerState::Exited);
            }
            Ok(())
        }

        async fn remove(&self, name: &str, _force: bool) -> Result<(), DockerError> {
            if self.failing_removals.lock().expect("lock poisoned").contains(name) {
                return Err(DockerError::operation("remove", name, "device or resource busy"));
            }
            self.containers
                .lock()
                .expect("lock poisoned")
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| Self::not_found(name))
        }

        async fn list(&self, name_prefix: &str) -> Result<Vec<ContainerHandle>, DockerError> {
            let containers = self.containers.lock().expect("lock poisoned");
            let mut handles: Vec<ContainerHandle> = containers
                .iter()
                .filter(|(name, _)| name.starts_with(name_prefix))
                .map(|(name, c)| ContainerHandle {
                    id: c.id.clone(),
                    name: name.clone(),
                    status: c.status.clone(),
                    image_ref: "train-task:latest".to_string(),
                    created_at: Some(c.created_at),
                })
                .collect();
            handles.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(handles)
        }

        async fn logs(
            &self,
            name: &str,
            _follow: bool,
            on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
        ) -> Result<(), DockerError> {
            let container = self.get(name).ok_or_else(|| Self::not_found(name))?;
            for chunk in &container.logs {
                on_chunk(chunk);
            }
            Ok(())
        }
    }

    fn manager() -> (Arc<MockRuntime>, ContainerManager) {
        let runtime = Arc::new(MockRuntime::default());
        let manager = ContainerManager::new(runtime.clone(), ManagerConfig::default());
        (runtime, manager)
    }

    fn fast_wait() -> WaitOptions {
        WaitOptions::default().with_poll_interval(Duration::from_millis(5))
    }

    #[test]
    fn test_container_name() {
        let (_, manager) = manager();
        assert_eq!(manager.container_name("abc"), "train-task-abc");
    }

    #[test]
    fn test_manager_config_builder() {
        let config = ManagerConfig::default()
            .with_image("trainer:v2")
            .with_network("metrics-net")
            .with_build_context("/srv/trainer")
            .with_stop_grace(Duration::from_secs(3));

        assert_eq!(config.image, "trainer:v2");
        assert_eq!(config.network, "metrics-net");
        assert_eq!(config.build_context, PathBuf::from("/srv/trainer"));
        assert_eq!(config.stop_grace, Duration::from_secs(3));
        assert_eq!(config.name_prefix, CONTAINER_NAME_PREFIX);
    }

    #[tokio::test]
    async fn test_exists() {
        let (runtime, manager) = manager();
        runtime.insert("train-task-1", ContainerState::Running, Utc::now());

        assert!(manager.exists("train-task-1").await.unwrap());
        assert!(!manager.exists("train-task-2").await.unwrap());

        *runtime.fail_inspect.lock().unwrap() = true;
        assert!(manager.exists("train-task-1").await.is_err());
    }

    #[tokio::test]
    async fn test_build_image_uses_configured_tag() {
        let (runtime, manager) = manager();
        manager.build_image().await.unwrap();
        assert_eq!(*runtime.builds.lock().unwrap(), vec![DEFAULT_IMAGE.to_string()]);
    }

    #[tokio::test]
    async fn test_create_applies_defaults() {
        let (runtime, manager) = manager();
        let id = manager.create("42", None, false).await.unwrap();

        assert!(!id.is_empty());
        let specs = runtime.specs.lock().unwrap();
        let spec = &specs[0];
        assert_eq!(spec.name, "train-task-42");
        assert_eq!(spec.image, DEFAULT_IMAGE);
        assert_eq!(spec.command, vec!["42".to_string()]);
        assert_eq!(spec.network, DEFAULT_NETWORK);
        assert!(spec.auto_remove);
        assert_eq!(spec.limits.cpu_quota, Some(200_000));
        assert_eq!(spec.limits.cpu_period, Some(100_000));
        assert_eq!(spec.limits.cpu_shares, 1024);
        assert_eq!(spec.limits.memory_bytes, Some(8 * 1024 * 1024 * 1024));
        assert!(!spec.limits.gpu_requested);
    }

    #[tokio::test]
    async fn test_create_accepts_multibyte_container_id() {
        let (runtime, manager) = manager();
        *runtime.id_prefix.lock().unwrap() = Some("容器容器".to_string());

        let id = manager.create("utf8", None, false).await.unwrap();
        assert!(id.starts_with("容器容器"));
        assert_eq!(short_id(&id), "容器容器0000");
    }

    #[tokio::test]
    async fn test_create_with_explicit_limits_and_gpu() {
        let (runtime, manager) = manager();
        let limits = ResourceLimits::unbounded().with_mem_limit("2g");
        manager.create("gpu-job", Some(limits), true).await.unwrap();

        let specs = runtime.specs.lock().unwrap();
        assert_eq!(specs[0].limits.memory_bytes, Some(2 * 1024 * 1024 * 1024));
        assert_eq!(specs[0].limits.cpu_quota, None);
        assert!(specs[0].limits.gpu_requested);
    }

    #[tokio::test]
    async fn test_create_replaces_existing_container() {
        let (runtime, manager) = manager();
        let first = manager.create("7", None, false).await.unwrap();
        let second = manager.create("7", None, false).await.unwrap();

        assert_ne!(first, second);
        let current = runtime.get("train-task-7").expect("container exists");
        assert_eq!(current.id, second);
        assert_eq!(runtime.specs.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_create_fails_when_old_container_cannot_be_removed() {
        let (runtime, manager) = manager();
        runtime.insert("train-task-9", ContainerState::Exited, Utc::now());
        runtime
            .failing_removals
            .lock()
            .unwrap()
            .insert("train-task-9".to_string());

        let err = manager.create("9", None, false).await.unwrap_err();
        assert!(matches!(err, DockerError::CreationFailed { .. }));
        assert!(runtime.specs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_propagates_runtime_rejection() {
        let (runtime, manager) = manager();
        *runtime.reject_runs.lock().unwrap() = true;

        let err = manager.create("oom", None, false).await.unwrap_err();
        match err {
            DockerError::CreationFailed { name, reason } => {
                assert_eq!(name, "train-task-oom");
                assert!(reason.contains("insufficient memory"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_limits() {
        let (runtime, manager) = manager();
        let limits = ResourceLimits::unbounded().with_mem_limit("lots");

        let err = manager.create("bad", Some(limits), false).await.unwrap_err();
        assert!(matches!(err, DockerError::InvalidLimits(_)));
        assert!(runtime.specs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_and_remove_nonexistent_is_success() {
        let (_, manager) = manager();
        let outcome = manager.stop_and_remove("nonexistent").await.unwrap();
        assert_eq!(outcome, Teardown::AlreadyAbsent);
    }

    #[tokio::test]
    async fn test_stop_and_remove_running_container() {
        let (runtime, manager) = manager();
        runtime.insert("train-task-r", ContainerState::Running, Utc::now());

        let outcome = manager.stop_and_remove("train-task-r").await.unwrap();
        assert_eq!(outcome, Teardown::Removed);
        assert!(runtime.get("train-task-r").is_none());
    }

    #[tokio::test]
    async fn test_stop_and_remove_auto_removed_during_stop() {
        let (runtime, manager) = manager();
        manager.create("auto", None, false).await.unwrap();

        let outcome = manager.stop_and_remove("train-task-auto").await.unwrap();
        assert_eq!(outcome, Teardown::Removed);
        assert!(!manager.exists("train-task-auto").await.unwrap());
        assert!(runtime.get("train-task-auto").is_none());
    }

    #[tokio::test]
    async fn test_stop_and_remove_reports_runtime_failure() {
        let (runtime, manager) = manager();
        runtime.insert("train-task-busy", ContainerState::Exited, Utc::now());
        runtime
            .failing_removals
            .lock()
            .unwrap()
            .insert("train-task-busy".to_string());

        let err = manager.stop_and_remove("train-task-busy").await.unwrap_err();
        assert!(matches!(err, DockerError::OperationFailed { .. }));
    }

    #[tokio::test]
    async fn test_wait_until_complete_returns_exit_state() {
        let (runtime, manager) = manager();
        runtime.insert("train-task-w", ContainerState::Running, Utc::now());
        runtime.update("train-task-w", |c| c.polls_until_exit = Some(3));

        let state = manager
            .wait_until_complete("train-task-w", fast_wait())
            .await
            .unwrap();
        assert_eq!(state, ContainerState::Exited);
    }

    #[tokio::test]
    async fn test_wait_until_complete_treats_auto_removal_as_done() {
        let (runtime, manager) = manager();
        manager.create("gone", None, false).await.unwrap();
        runtime.update("train-task-gone", |c| c.polls_until_exit = Some(1));

        let state = manager
            .wait_until_complete("train-task-gone", fast_wait())
            .await
            .unwrap();
        assert_eq!(state, ContainerState::Removed);
    }

    #[tokio::test]
    async fn test_wait_until_complete_abandons_on_lookup_error() {
        let (runtime, manager) = manager();
        runtime.insert("train-task-e", ContainerState::Running, Utc::now());
        *runtime.fail_inspect.lock().unwrap() = true;

        let err = manager
            .wait_until_complete("train-task-e", fast_wait())
            .await
            .unwrap_err();
        assert!(matches!(err, DockerError::OperationFailed { .. }));
    }

    #[tokio::test]
    async fn test_wait_until_complete_times_out() {
        let (runtime, manager) = manager();
        runtime.insert("train-task-hang", ContainerState::Running, Utc::now());

        let options = fast_wait().with_timeout(Duration::from_millis(30));
        let err = manager
            .wait_until_complete("train-task-hang", options)
            .await
            .unwrap_err();
        assert!(matches!(err, DockerError::WaitTimeout { .. }));
        assert!(err.to_string().ends_with("after 30ms"), "{err}");
    }

    #[tokio::test]
    async fn test_stream_logs_follow_splits_lines() {
        let (runtime, manager) = manager();
        runtime.insert("train-task-l", ContainerState::Running, Utc::now());
        runtime.update("train-task-l", |c| {
            c.logs = vec![
                "epoch 1\nepo".to_string(),
                "ch 2\r\n".to_string(),
                "done".to_string(),
            ]
        });

        let mut lines = Vec::new();
        manager
            .stream_logs("train-task-l", true, |line| lines.push(line.to_string()))
            .await
            .unwrap();

        assert_eq!(lines, vec!["epoch 1", "epoch 2", "done"]);
    }

    #[tokio::test]
    async fn test_stream_logs_buffered_is_single_read() {
        let (runtime, manager) = manager();
        runtime.insert("train-task-b", ContainerState::Exited, Utc::now());
        runtime.update("train-task-b", |c| {
            c.logs = vec!["a\n".to_string(), "b\n".to_string()]
        });

        let mut reads = Vec::new();
        manager
            .stream_logs("train-task-b", false, |text| reads.push(text.to_string()))
            .await
            .unwrap();

        assert_eq!(reads, vec!["a\nb\n".to_string()]);
    }

    #[tokio::test]
    async fn test_stream_logs_missing_container() {
        let (_, manager) = manager();
        let err = manager
            .stream_logs("train-task-none", true, |_| {})
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_only_returns_training_containers() {
        let (runtime, manager) = manager();
        runtime.insert("train-task-a", ContainerState::Running, Utc::now());
        runtime.insert("train-task-b", ContainerState::Exited, Utc::now());
        runtime.insert("prometheus", ContainerState::Running, Utc::now());

        let names: Vec<String> = manager.list().await.unwrap().into_iter().map(|h| h.name).collect();
        assert_eq!(names, vec!["train-task-a", "train-task-b"]);
    }

    #[test]
    fn test_is_expired_compares_dates_only() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();

        // Earlier on the same day: never reclaimed.
        let this_morning = Utc.with_ymd_and_hms(2024, 5, 10, 1, 0, 0).unwrap();
        assert!(!is_expired(this_morning, now, 1));

        let yesterday = Utc.with_ymd_and_hms(2024, 5, 9, 23, 59, 0).unwrap();
        assert!(is_expired(yesterday, now, 1));

        // Shortly after midnight the cutoff falls on the previous day.
        let just_after_midnight = Utc.with_ymd_and_hms(2024, 5, 10, 0, 30, 0).unwrap();
        assert!(!is_expired(yesterday, just_after_midnight, 1));

        let two_days_ago = Utc.with_ymd_and_hms(2024, 5, 8, 12, 0, 0).unwrap();
        assert!(is_expired(two_days_ago, just_after_midnight, 1));
    }

    #[tokio::test]
    async fn test_cleanup_older_than() {
        let (runtime, manager) = manager();
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();

        runtime.insert(
            "train-task-old",
            ContainerState::Exited,
            Utc.with_ymd_and_hms(2024, 5, 8, 9, 0, 0).unwrap(),
        );
        runtime.insert(
            "train-task-today",
            ContainerState::Exited,
            Utc.with_ymd_and_hms(2024, 5, 10, 2, 0, 0).unwrap(),
        );
        runtime.insert(
            "unrelated",
            ContainerState::Exited,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        );

        let report = manager.cleanup_older_than_at(1, now).await.unwrap();

        assert_eq!(report.removed, vec!["train-task-old".to_string()]);
        assert!(report.failed.is_empty());
        assert_eq!(report.kept, 1);
        assert!(runtime.get("train-task-today").is_some());
        assert!(runtime.get("unrelated").is_some());
    }

    #[tokio::test]
    async fn test_cleanup_continues_past_failures() {
        let (runtime, manager) = manager();
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        let old = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();

        runtime.insert("train-task-a", ContainerState::Exited, old);
        runtime.insert("train-task-b", ContainerState::Running, old);
        runtime
            .failing_removals
            .lock()
            .unwrap()
            .insert("train-task-a".to_string());

        let report = manager.cleanup_older_than_at(1, now).await.unwrap();

        assert_eq!(report.removed, vec!["train-task-b".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "train-task-a");
        assert!(runtime.get("train-task-b").is_none());
    }
}
