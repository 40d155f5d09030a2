// ABOUTME: Provider trait and value types for sandbox execution backends
// ABOUTME: Defines the executor capability (create, inspect, exec, file copy, teardown) the core orchestrates

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

pub mod archive;
pub mod docker;

pub use docker::DockerProvider;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// The environment (or the requested path inside it) no longer exists
    #[error("Not found: {0}")]
    NotFound(String),

    /// The executor answered with an error status; usually transient
    #[error("API error: {0}")]
    Api(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProviderError {
    /// Errors that warrant refreshing the sandbox handle and trying once more
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::NotFound(_) | ProviderError::Api(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Container configuration for creating sandboxes
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerConfig {
    pub image: String,
    pub name: String,
    /// Long-lived idle command keeping the sandbox resident
    pub command: Vec<String>,
    pub working_dir: String,
    pub memory_mb: u64,
    /// CPU share in cores (can be fractional, e.g., 0.5)
    pub cpu_cores: f64,
    pub network_enabled: bool,
    pub gpu_enabled: bool,
    /// Remove the container as soon as it stops
    pub auto_remove: bool,
    pub volumes: Vec<VolumeMount>,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VolumeMount {
    pub host_path: String,
    pub container_path: String,
    pub readonly: bool,
}

/// Container runtime information
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub status: ContainerStatus,
    pub labels: HashMap<String, String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Stopped,
    Removing,
    Dead,
    Unknown(String),
}

impl ContainerStatus {
    /// Map an engine state string ("running", "exited", ...) to a status
    pub fn from_state(state: &str) -> Self {
        match state.to_lowercase().as_str() {
            "created" => ContainerStatus::Created,
            "running" => ContainerStatus::Running,
            "paused" => ContainerStatus::Paused,
            "restarting" => ContainerStatus::Restarting,
            "removing" => ContainerStatus::Removing,
            "exited" => ContainerStatus::Stopped,
            "dead" => ContainerStatus::Dead,
            other => ContainerStatus::Unknown(other.to_string()),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ContainerStatus::Running)
    }
}

/// Execution result from running a command in a container
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecResult {
    pub exit_code: i64,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Executor capability for sandbox container backends.
///
/// Implementations apply their own network/operation timeouts. Callers never
/// hold locks across these calls.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Check if the provider is reachable and configured correctly
    async fn is_available(&self) -> Result<bool>;

    /// Create and start a new container, returning its id
    async fn create_container(&self, config: &ContainerConfig) -> Result<String>;

    /// Get fresh container information (status, labels)
    async fn get_container_info(&self, container_id: &str) -> Result<ContainerInfo>;

    /// Start a stopped container
    async fn start_container(&self, container_id: &str) -> Result<()>;

    /// Stop a running container, killing it after `timeout_secs`
    async fn stop_container(&self, container_id: &str, timeout_secs: u64) -> Result<()>;

    /// Execute a command with separate stdout/stderr capture
    async fn exec_command(
        &self,
        container_id: &str,
        command: Vec<String>,
        working_dir: Option<&str>,
    ) -> Result<ExecResult>;

    /// Extract a tar archive into `dest_dir` inside the container
    async fn put_archive(&self, container_id: &str, dest_dir: &str, archive: Vec<u8>)
        -> Result<()>;

    /// Read `path` from the container as a tar archive
    async fn get_archive(&self, container_id: &str, path: &str) -> Result<Vec<u8>>;

    /// List containers (running or stopped) carrying all of the given labels
    async fn list_containers(&self, labels: &HashMap<String, String>)
        -> Result<Vec<ContainerInfo>>;
}
