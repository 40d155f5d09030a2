// ABOUTME: Docker provider implementation for per-session execution sandboxes
// ABOUTME: Uses bollard to create, inspect, exec into, copy files with, and stop containers

use super::{
    ContainerConfig, ContainerInfo, ContainerStatus, ExecResult, Provider, ProviderError, Result,
};
use crate::settings::memory_limit_bytes;
use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, DownloadFromContainerOptions, ListContainersOptions,
        LogOutput, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
        UploadToContainerOptions,
    },
    errors::Error as BollardError,
    exec::{CreateExecOptions, StartExecResults},
    image::CreateImageOptions,
    models::{DeviceRequest, HostConfig},
    Docker,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct DockerProvider {
    client: Docker,
    /// Timeout for image pull operations (default: 10 minutes)
    pull_timeout: Duration,
}

impl DockerProvider {
    /// Create a new Docker provider with default timeout (10 minutes)
    pub fn new() -> Result<Self> {
        Self::with_pull_timeout(Duration::from_secs(600))
    }

    /// Create a new Docker provider with custom pull timeout
    pub fn with_pull_timeout(timeout: Duration) -> Result<Self> {
        let client = Docker::connect_with_defaults()
            .map_err(|e| ProviderError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            pull_timeout: timeout,
        })
    }

    /// Create with a specific Docker connection and default timeout
    pub fn with_client(client: Docker) -> Self {
        Self {
            client,
            pull_timeout: Duration::from_secs(600),
        }
    }

    /// Convert our config to bollard config
    fn to_bollard_config(config: &ContainerConfig) -> Config<String> {
        let binds: Vec<String> = config
            .volumes
            .iter()
            .map(|v| {
                format!(
                    "{}:{}:{}",
                    v.host_path,
                    v.container_path,
                    if v.readonly { "ro" } else { "rw" }
                )
            })
            .collect();

        let device_requests = config.gpu_enabled.then(|| {
            vec![DeviceRequest {
                count: Some(-1),
                capabilities: Some(vec![vec!["gpu".to_string()]]),
                ..Default::default()
            }]
        });

        let host_config = HostConfig {
            binds: if binds.is_empty() { None } else { Some(binds) },
            memory: Some(memory_limit_bytes(config.memory_mb).unwrap_or(i64::MAX)),
            nano_cpus: Some((config.cpu_cores * 1_000_000_000.0) as i64),
            auto_remove: Some(config.auto_remove),
            network_mode: if config.network_enabled {
                None
            } else {
                Some("none".to_string())
            },
            device_requests,
            ..Default::default()
        };

        Config {
            image: Some(config.image.clone()),
            cmd: Some(config.command.clone()),
            working_dir: Some(config.working_dir.clone()),
            labels: Some(config.labels.clone()),
            network_disabled: Some(!config.network_enabled),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.client.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(ProviderError::Image(e.to_string())),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        info!(
            "Pulling image: {} (timeout: {:?})",
            image, self.pull_timeout
        );

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let stream = self.client.create_image(Some(options), None, None);

        let result = tokio::time::timeout(self.pull_timeout, async {
            let mut stream = stream;
            let mut last_status = String::new();

            while let Some(result) = stream.next().await {
                match result {
                    Ok(info) => {
                        if let Some(status) = &info.status {
                            if status != &last_status {
                                debug!("Pull status: {}", status);
                                last_status = status.clone();
                            }
                        }
                        if let Some(error) = info.error {
                            return Err(ProviderError::Image(format!(
                                "Failed to pull image {}: {}",
                                image, error
                            )));
                        }
                    }
                    Err(e) => {
                        return Err(ProviderError::Image(format!(
                            "Failed to pull image {}: {}",
                            image, e
                        )));
                    }
                }
            }

            Ok(())
        })
        .await;

        match result {
            Ok(Ok(())) => {
                info!("Successfully pulled image: {}", image);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ProviderError::Image(format!(
                "Timeout pulling image {} after {:?}",
                image, self.pull_timeout
            ))),
        }
    }
}

/// Classify a bollard error: 404 means the target is gone, other server
/// responses are API errors, everything else is a transport failure
/// A finished exec must report its status; a missing one is never a success
fn require_exit_code(container_id: &str, exit_code: Option<i64>) -> Result<i64> {
    exit_code.ok_or_else(|| {
        ProviderError::Internal(format!(
            "Exec in container {} finished without an exit code",
            container_id
        ))
    })
}

fn map_docker_error(target: &str, err: BollardError) -> ProviderError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => ProviderError::NotFound(format!("{}: {}", target, message)),
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => ProviderError::Api(format!("{} ({}): {}", target, status_code, message)),
        other => ProviderError::Connection(other.to_string()),
    }
}

#[async_trait]
impl Provider for DockerProvider {
    async fn is_available(&self) -> Result<bool> {
        match self.client.ping().await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("Docker not available: {}", e);
                Ok(false)
            }
        }
    }

    async fn create_container(&self, config: &ContainerConfig) -> Result<String> {
        info!("Creating container: {}", config.name);

        if !self.image_exists(&config.image).await? {
            self.pull_image(&config.image).await?;
        }

        let options = CreateContainerOptions {
            name: config.name.clone(),
            platform: None,
        };

        let container = self
            .client
            .create_container(Some(options), Self::to_bollard_config(config))
            .await
            .map_err(|e| map_docker_error(&config.name, e))?;

        debug!("Created container: {}", container.id);

        if let Err(e) = self.start_container(&container.id).await {
            // A created-but-never-started container is not auto-removed
            let options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            if let Err(remove_err) = self
                .client
                .remove_container(&container.id, Some(options))
                .await
            {
                warn!(
                    "Failed to remove unstarted container {}: {}",
                    container.id, remove_err
                );
            }
            return Err(e);
        }

        Ok(container.id)
    }

    async fn get_container_info(&self, container_id: &str) -> Result<ContainerInfo> {
        let inspect = self
            .client
            .inspect_container(container_id, None)
            .await
            .map_err(|e| map_docker_error(container_id, e))?;

        let status = inspect
            .state
            .as_ref()
            .and_then(|state| state.status.as_ref())
            .map(|s| ContainerStatus::from_state(s.as_ref()))
            .unwrap_or_else(|| ContainerStatus::Unknown("unknown".to_string()));

        let created_at = inspect
            .created
            .as_ref()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(chrono::Utc::now);

        Ok(ContainerInfo {
            id: inspect.id.unwrap_or_else(|| container_id.to_string()),
            name: inspect
                .name
                .unwrap_or_else(|| container_id.to_string())
                .trim_start_matches('/')
                .to_string(),
            status,
            labels: inspect.config.and_then(|c| c.labels).unwrap_or_default(),
            created_at,
        })
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        info!("Starting container: {}", container_id);

        self.client
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| map_docker_error(container_id, e))
    }

    async fn stop_container(&self, container_id: &str, timeout_secs: u64) -> Result<()> {
        info!(
            "Stopping container: {} (timeout: {}s)",
            container_id, timeout_secs
        );

        let options = StopContainerOptions {
            t: timeout_secs as i64,
        };

        match self.client.stop_container(container_id, Some(options)).await {
            Ok(()) => Ok(()),
            // Already stopped
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(map_docker_error(container_id, e)),
        }
    }

    async fn exec_command(
        &self,
        container_id: &str,
        command: Vec<String>,
        working_dir: Option<&str>,
    ) -> Result<ExecResult> {
        debug!(
            "Executing command in container {}: {:?}",
            container_id, command
        );

        let exec_config = CreateExecOptions {
            cmd: Some(command),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            working_dir: working_dir.map(str::to_string),
            ..Default::default()
        };

        let exec = self
            .client
            .create_exec(container_id, exec_config)
            .await
            .map_err(|e| map_docker_error(container_id, e))?;

        let start_result = self
            .client
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| map_docker_error(container_id, e))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        match start_result {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(msg) = output.next().await {
                    match msg {
                        Ok(LogOutput::StdOut { message }) => stdout.extend_from_slice(&message),
                        Ok(LogOutput::StdErr { message }) => stderr.extend_from_slice(&message),
                        Ok(LogOutput::Console { message }) => stdout.extend_from_slice(&message),
                        Ok(_) => {}
                        Err(e) => return Err(map_docker_error(container_id, e)),
                    }
                }
            }
            StartExecResults::Detached => {
                return Err(ProviderError::Internal(
                    "Exec was detached unexpectedly".to_string(),
                ))
            }
        }

        let exec_inspect = self
            .client
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| map_docker_error(container_id, e))?;

        Ok(ExecResult {
            exit_code: require_exit_code(container_id, exec_inspect.exit_code)?,
            stdout,
            stderr,
        })
    }

    async fn put_archive(
        &self,
        container_id: &str,
        dest_dir: &str,
        archive: Vec<u8>,
    ) -> Result<()> {
        debug!("Uploading archive to container {}:{}", container_id, dest_dir);

        let options = UploadToContainerOptions {
            path: dest_dir.to_string(),
            ..Default::default()
        };

        self.client
            .upload_to_container(container_id, Some(options), archive.into())
            .await
            .map_err(|e| map_docker_error(container_id, e))
    }

    async fn get_archive(&self, container_id: &str, path: &str) -> Result<Vec<u8>> {
        debug!("Downloading {}:{}", container_id, path);

        let options = DownloadFromContainerOptions {
            path: path.to_string(),
        };

        let mut stream = self
            .client
            .download_from_container(container_id, Some(options));

        let mut data = Vec::new();
        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| map_docker_error(path, e))?;
            data.extend_from_slice(&bytes);
        }

        Ok(data)
    }

    async fn list_containers(
        &self,
        labels: &HashMap<String, String>,
    ) -> Result<Vec<ContainerInfo>> {
        let filters = HashMap::from([(
            "label".to_string(),
            labels
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>(),
        )]);

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self
            .client
            .list_containers(Some(options))
            .await
            .map_err(|e| map_docker_error("list", e))?;

        Ok(containers
            .into_iter()
            .filter_map(|summary| {
                let id = summary.id?;
                let name = summary
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_else(|| id.clone());
                let created_at = summary
                    .created
                    .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
                    .unwrap_or_else(chrono::Utc::now);

                Some(ContainerInfo {
                    id,
                    name,
                    status: ContainerStatus::from_state(summary.state.as_deref().unwrap_or("")),
                    labels: summary.labels.unwrap_or_default(),
                    created_at,
                })
            })
            .collect())
    }
}
