//! Container execution backend driven through the runtime CLI.
//!
//! Each task payload is a shell command run in a fresh container of the
//! configured image. Resource limits are resolved for the image on every
//! launch. When a service port is configured the container is started
//! detached with the port published on a unique host port, and the task
//! succeeds once the service answers the readiness check. The container is
//! removed afterwards either way.

use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::readiness::ReadinessCheck;
use super::resources::ResourceResolver;
use super::{truncate, Executor};
use crate::config::ForgeConfig;
use crate::environment::{ContainerDetector, DetectionSource};
use crate::error::{ExecutionError, InitError};
use crate::sanitize::{
    sanitize_container_id, sanitize_image_name, sanitize_shell_command, ContainerId, ImageName,
    ShellCommand,
};

/// Prefix of every container name launched by this backend.
pub const CONTAINER_NAME_PREFIX: &str = "eval-forge";

const MAX_OUTPUT_BYTES: usize = 64 * 1024;
const MAX_STDERR_BYTES: usize = 2_000;

static NEXT_HOST_PORT: AtomicU16 = AtomicU16::new(20_000);

/// Allocates a host port no other concurrent launch in this process holds.
/// Wraps from 60_000 back to 20_000.
fn allocate_host_port() -> u16 {
    loop {
        let current = NEXT_HOST_PORT.load(Ordering::Relaxed);
        let next = if current >= 60_000 { 20_000 } else { current + 1 };
        if NEXT_HOST_PORT
            .compare_exchange(current, next, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            return current;
        }
    }
}

/// Generates a fresh container name that passes [`sanitize_container_id`].
pub fn new_container_name() -> Option<ContainerId> {
    sanitize_container_id(&format!(
        "{}-{}",
        CONTAINER_NAME_PREFIX,
        uuid::Uuid::new_v4().simple()
    ))
}

/// Runs task commands inside containers.
pub struct ContainerExecutor {
    runtime: String,
    image: ImageName,
    resolver: ResourceResolver,
    service_port: Option<u16>,
    readiness_timeout: Duration,
    readiness_interval: Duration,
    allow_nested: bool,
    environment: Option<DetectionSource>,
}

impl ContainerExecutor {
    /// Creates an executor for `image` using the `docker` CLI.
    pub fn new(image: ImageName, resolver: ResourceResolver) -> Self {
        Self {
            runtime: "docker".to_string(),
            image,
            resolver,
            service_port: None,
            readiness_timeout: Duration::from_secs(30),
            readiness_interval: Duration::from_millis(500),
            allow_nested: false,
            environment: None,
        }
    }

    /// Builds an executor from the run configuration and checks the current
    /// process environment for nesting.
    pub fn from_config(config: &ForgeConfig) -> Result<Self, InitError> {
        let settings = &config.container;
        let raw_image = settings.image.as_deref().ok_or_else(|| {
            InitError::InvalidConfig("container backend requires an image".to_string())
        })?;
        let image = sanitize_image_name(raw_image).ok_or_else(|| {
            InitError::InvalidConfig(format!("invalid container image {:?}", raw_image))
        })?;

        let mut executor = Self::new(image, ResourceResolver::from_config(config))
            .with_runtime(settings.runtime.clone())
            .with_readiness(
                Duration::from_millis(settings.readiness_timeout_ms),
                Duration::from_millis(settings.readiness_interval_ms),
            )
            .allow_nested(settings.allow_nested)
            .with_environment(ContainerDetector::default().detect());
        executor.service_port = settings.port;
        Ok(executor)
    }

    /// Uses a different runtime binary, e.g. `podman`.
    pub fn with_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = runtime.into();
        self
    }

    /// Publishes `port` and waits for the service behind it on every launch.
    pub fn with_service_port(mut self, port: u16) -> Self {
        self.service_port = Some(port);
        self
    }

    pub fn with_readiness(mut self, timeout: Duration, interval: Duration) -> Self {
        self.readiness_timeout = timeout;
        self.readiness_interval = interval;
        self
    }

    pub fn allow_nested(mut self, allow: bool) -> Self {
        self.allow_nested = allow;
        self
    }

    /// Records the result of container environment detection.
    pub fn with_environment(mut self, detected: Option<DetectionSource>) -> Self {
        self.environment = detected;
        self
    }

    pub fn image(&self) -> &ImageName {
        &self.image
    }

    /// Arguments for a foreground run that removes the container on exit.
    pub fn run_args(&self, name: &ContainerId, command: &ShellCommand) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            name.to_string(),
        ];
        self.push_tail(&mut args, command);
        args
    }

    /// Arguments for a detached run publishing `container_port` on `host_port`.
    pub fn service_args(
        &self,
        name: &ContainerId,
        command: &ShellCommand,
        host_port: u16,
        container_port: u16,
    ) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            name.to_string(),
            "-p".to_string(),
            format!("{}:{}", host_port, container_port),
        ];
        self.push_tail(&mut args, command);
        args
    }

    fn push_tail(&self, args: &mut Vec<String>, command: &ShellCommand) {
        args.extend(self.resolver.resolve(self.image.as_str()).docker_args());
        args.push(self.image.to_string());
        args.push("sh".to_string());
        args.push("-c".to_string());
        args.push(command.to_string());
    }

    async fn run_runtime(&self, args: &[String]) -> Result<std::process::Output, ExecutionError> {
        Command::new(&self.runtime)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| ExecutionError::Spawn {
                program: self.runtime.clone(),
                source,
            })
    }

    async fn run_foreground(
        &self,
        name: &ContainerId,
        command: &ShellCommand,
    ) -> Result<String, ExecutionError> {
        let output = self.run_runtime(&self.run_args(name, command)).await?;
        if !output.status.success() {
            return Err(non_zero_exit(&output));
        }
        Ok(truncate(
            &String::from_utf8_lossy(&output.stdout),
            MAX_OUTPUT_BYTES,
        ))
    }

    async fn run_service(
        &self,
        name: &ContainerId,
        command: &ShellCommand,
        container_port: u16,
    ) -> Result<String, ExecutionError> {
        let host_port = allocate_host_port();
        let output = self
            .run_runtime(&self.service_args(name, command, host_port, container_port))
            .await?;
        if !output.status.success() {
            return Err(non_zero_exit(&output));
        }
        debug!(container = %name, host_port, container_port, "Service container started");

        let readiness = ReadinessCheck::new(host_port, self.readiness_timeout, self.readiness_interval)
            .wait()
            .await;
        self.remove(name).await;
        readiness?;

        Ok(format!(
            "service in {} ready on host port {}",
            name, host_port
        ))
    }

    async fn remove(&self, name: &ContainerId) {
        let result = Command::new(&self.runtime)
            .args(["rm", "-f", name.as_str()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match result {
            Ok(status) if status.success() => debug!(container = %name, "Container removed"),
            Ok(status) => warn!(container = %name, code = ?status.code(), "Container removal failed"),
            Err(e) => warn!(container = %name, error = %e, "Failed to run container removal"),
        }
    }
}

fn non_zero_exit(output: &std::process::Output) -> ExecutionError {
    ExecutionError::NonZeroExit {
        code: output.status.code().unwrap_or(-1),
        stderr: truncate(
            String::from_utf8_lossy(&output.stderr).trim(),
            MAX_STDERR_BYTES,
        ),
    }
}

#[async_trait]
impl Executor for ContainerExecutor {
    fn kind(&self) -> &'static str {
        "container"
    }

    async fn initialize(&self) -> Result<(), InitError> {
        if let Some(source) = &self.environment {
            if !self.allow_nested {
                return Err(InitError::NestedContainer(source.to_string()));
            }
            warn!(detected = %source, "Running inside a container; nested launches allowed");
        }

        let output = Command::new(&self.runtime)
            .arg("version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| InitError::RuntimeUnavailable {
                runtime: self.runtime.clone(),
                reason: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(InitError::RuntimeUnavailable {
                runtime: self.runtime.clone(),
                reason: truncate(
                    String::from_utf8_lossy(&output.stderr).trim(),
                    MAX_STDERR_BYTES,
                ),
            });
        }

        let limits = self.resolver.resolve(self.image.as_str());
        info!(
            runtime = %self.runtime,
            image = %self.image,
            memory = limits.memory().unwrap_or("unlimited"),
            cpus = limits.cpus().unwrap_or("unlimited"),
            service_port = ?self.service_port,
            "Container executor ready"
        );
        Ok(())
    }

    async fn execute(&self, payload: &str) -> Result<String, ExecutionError> {
        let command = sanitize_shell_command(payload).ok_or_else(|| ExecutionError::Rejected {
            kind: "shell command",
            value: truncate(payload, 200),
        })?;
        let name = new_container_name().ok_or_else(|| ExecutionError::Rejected {
            kind: "container name",
            value: CONTAINER_NAME_PREFIX.to_string(),
        })?;

        match self.service_port {
            Some(port) => self.run_service(&name, &command, port).await,
            None => self.run_foreground(&name, &command).await,
        }
    }
}
