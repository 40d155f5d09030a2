// ABOUTME: Session manager orchestrating sandbox lifecycle, code execution and file transfer
// ABOUTME: Get-or-create with optimistic caching, capacity admission, retry-once execution, recovery and reaping

use crate::error::{Result, SessionError};
use crate::ids::{generate_public_id, sanitize_filename, sanitize_id};
use crate::providers::archive::{pack_single_file, unpack_first_file};
use crate::providers::{ContainerConfig, ContainerStatus, ExecResult, Provider, VolumeMount};
use crate::registry::{SandboxHandle, SessionRegistry};
use crate::settings::{SandboxSettings, StorageMode};
use crate::wrap::wrap_code;
use serde::Serialize;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Label carrying the ownership marker used by recovery
pub const MANAGED_BY_LABEL: &str = "managed_by";
/// Label carrying the internal session id of a sandbox
pub const SESSION_ID_LABEL: &str = "session_id";

/// Directory inside the sandbox receiving per-invocation scripts
const SCRIPT_DIR: &str = "/tmp";

/// Captured outcome of one code submission
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

impl From<ExecResult> for ExecutionResult {
    fn from(result: ExecResult) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&result.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&result.stderr).into_owned(),
            exit_code: result.exit_code,
        }
    }
}

/// A file in a session workspace with its public id
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileDescriptor {
    pub id: String,
    pub name: String,
}

/// Maps logical sessions onto sandboxes supplied by a [`Provider`]
pub struct SessionManager {
    provider: Arc<dyn Provider>,
    settings: SandboxSettings,
    registry: SessionRegistry,
}

impl SessionManager {
    pub fn new(provider: Arc<dyn Provider>, settings: SandboxSettings) -> Self {
        Self {
            provider,
            settings,
            registry: SessionRegistry::new(),
        }
    }

    pub fn settings(&self) -> &SandboxSettings {
        &self.settings
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Fresh internal id for a request that did not name a session
    pub fn new_session_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Return a usable sandbox for `internal_id`, creating one if absent.
    ///
    /// Without `force_refresh` a cached handle is returned as-is; liveness is
    /// only checked when a caller has seen it fail.
    pub async fn get_or_create(
        &self,
        internal_id: &str,
        force_refresh: bool,
    ) -> Result<SandboxHandle> {
        ensure_valid_id(internal_id)?;

        if !force_refresh {
            if let Some(handle) = self.registry.touch(internal_id) {
                return Ok(handle);
            }
            return self.create(internal_id).await;
        }

        let Some(handle) = self.registry.handle(internal_id) else {
            return self.create(internal_id).await;
        };

        let evicted = match self.provider.get_container_info(&handle.id).await {
            Ok(info) if info.status.is_running() => {
                if let Some(current) = self.registry.touch(internal_id) {
                    return Ok(current);
                }
                false
            }
            Ok(info) => {
                info!(
                    session_id = %internal_id,
                    container_id = %handle.id,
                    status = ?info.status,
                    "Sandbox not running, starting it"
                );
                match self.provider.start_container(&handle.id).await {
                    Ok(()) => {
                        if let Some(current) = self.registry.touch(internal_id) {
                            return Ok(current);
                        }
                        false
                    }
                    Err(e) => {
                        warn!(
                            session_id = %internal_id,
                            "Failed to start sandbox {}: {}", handle.id, e
                        );
                        self.registry.evict_handle(internal_id, &handle.id).is_some()
                    }
                }
            }
            Err(e) if e.is_not_found() => {
                info!(session_id = %internal_id, "Sandbox {} vanished, recreating", handle.id);
                self.registry.evict_handle(internal_id, &handle.id).is_some()
            }
            Err(e) => {
                warn!(session_id = %internal_id, "Failed to refresh sandbox {}: {}", handle.id, e);
                let evicted = self.registry.evict_handle(internal_id, &handle.id).is_some();
                if evicted {
                    self.stop_in_background(handle);
                }
                evicted
            }
        };

        let created = self.create(internal_id).await;
        // The session ended with its sandbox; its ids must not outlive it
        if created.is_err() && evicted && self.registry.forget_unregistered(internal_id) {
            info!(session_id = %internal_id, "Session ended after failed re-creation");
        }
        created
    }

    /// Provision and register a new sandbox for `internal_id`.
    ///
    /// Fails with [`SessionError::CapacityExceeded`] when registered plus
    /// provisioning sessions already reach the maximum. The registry is left
    /// unchanged on any failure.
    pub async fn create(&self, internal_id: &str) -> Result<SandboxHandle> {
        ensure_valid_id(internal_id)?;

        let max = self.settings.max_sessions;
        let reservation = self.registry.try_reserve(max).ok_or_else(|| {
            warn!(session_id = %internal_id, "Refusing new session, at capacity ({})", max);
            SessionError::CapacityExceeded { max }
        })?;

        let handle = match self.provision(internal_id).await {
            Ok(handle) => handle,
            Err(e) => {
                error!(session_id = %internal_id, "Failed to provision sandbox: {}", e);
                return Err(SessionError::Provisioning(e.to_string()));
            }
        };

        match self
            .registry
            .register(internal_id, handle.clone(), reservation)
        {
            Ok(handle) => {
                info!(
                    session_id = %internal_id,
                    container_id = %handle.id,
                    "Registered sandbox {}",
                    handle.name
                );
                Ok(handle)
            }
            Err(existing) => {
                info!(
                    session_id = %internal_id,
                    "Session registered concurrently, discarding sandbox {}",
                    handle.id
                );
                self.stop_in_background(handle);
                Ok(existing)
            }
        }
    }

    async fn provision(&self, internal_id: &str) -> Result<SandboxHandle> {
        if let StorageMode::SharedVolume { local_dir, .. } = &self.settings.storage {
            tokio::fs::create_dir_all(local_dir.join(internal_id)).await?;
        }

        let config = self.container_config(internal_id);
        let id = self.provider.create_container(&config).await?;
        let handle = SandboxHandle {
            id,
            name: config.name,
        };

        let mkdir = vec![
            "mkdir".to_string(),
            "-p".to_string(),
            self.settings.workdir.clone(),
        ];
        match self.provider.exec_command(&handle.id, mkdir, None).await {
            Ok(result) if result.exit_code != 0 => warn!(
                container_id = %handle.id,
                "mkdir {} exited with {}",
                self.settings.workdir,
                result.exit_code
            ),
            Ok(_) => {}
            Err(e) => {
                self.stop_in_background(handle);
                return Err(e.into());
            }
        }

        Ok(handle)
    }

    fn container_config(&self, internal_id: &str) -> ContainerConfig {
        let suffix = uuid::Uuid::new_v4().simple().to_string();

        let volumes = match &self.settings.storage {
            StorageMode::SharedVolume { host_dir, .. } => vec![VolumeMount {
                host_path: host_dir.join(internal_id).to_string_lossy().into_owned(),
                container_path: self.settings.workdir.clone(),
                readonly: false,
            }],
            StorageMode::Archive => Vec::new(),
        };

        ContainerConfig {
            image: self.settings.image.clone(),
            name: format!("rce_{}_{}", internal_id, &suffix[..6]),
            command: vec![
                "tail".to_string(),
                "-f".to_string(),
                "/dev/null".to_string(),
            ],
            working_dir: self.settings.workdir.clone(),
            memory_mb: self.settings.memory_mb,
            cpu_cores: self.settings.cpu_cores,
            network_enabled: self.settings.network_enabled,
            gpu_enabled: self.settings.gpu_enabled,
            auto_remove: true,
            volumes,
            labels: HashMap::from([
                (MANAGED_BY_LABEL.to_string(), self.settings.managed_by.clone()),
                (SESSION_ID_LABEL.to_string(), internal_id.to_string()),
            ]),
        }
    }

    /// Run `code` once in the session's sandbox.
    ///
    /// A not-found or transient executor failure refreshes the handle and
    /// retries exactly once. The temporary script is removed from the last
    /// handle used whatever the outcome.
    pub async fn execute(&self, internal_id: &str, code: &str) -> Result<ExecutionResult> {
        let script = wrap_code(code);
        let file_name = format!("exec_{}.py", uuid::Uuid::new_v4().simple());
        let script_path = format!("{}/{}", SCRIPT_DIR, file_name);
        let archive = pack_single_file(&file_name, script.as_bytes())
            .map_err(|e| SessionError::Execution(format!("Failed to pack script: {}", e)))?;

        let mut handle = self.get_or_create(internal_id, false).await?;
        let mut outcome = self.run_script(&handle, &archive, &script_path).await;

        if let Err(e) = &outcome {
            if e.is_retryable() {
                info!(
                    session_id = %internal_id,
                    "Execution failed ({}), retrying with a refreshed sandbox", e
                );
                match self.get_or_create(internal_id, true).await {
                    Ok(fresh) => {
                        handle = fresh;
                        outcome = self.run_script(&handle, &archive, &script_path).await;
                    }
                    Err(refresh_err) => outcome = Err(refresh_err),
                }
            }
        }

        self.remove_script(&handle, &script_path).await;

        match outcome {
            Ok(result) => {
                debug!(
                    session_id = %internal_id,
                    exit_code = result.exit_code,
                    "Execution finished"
                );
                Ok(result.into())
            }
            Err(SessionError::Provider(e)) => {
                error!(session_id = %internal_id, "Execution failed: {}", e);
                Err(SessionError::Execution(e.to_string()))
            }
            Err(e) => {
                error!(session_id = %internal_id, "Execution failed: {}", e);
                Err(e)
            }
        }
    }

    async fn run_script(
        &self,
        handle: &SandboxHandle,
        archive: &[u8],
        script_path: &str,
    ) -> Result<ExecResult> {
        self.provider
            .put_archive(&handle.id, SCRIPT_DIR, archive.to_vec())
            .await?;

        let command = vec![self.settings.interpreter.clone(), script_path.to_string()];
        Ok(self
            .provider
            .exec_command(&handle.id, command, Some(&self.settings.workdir))
            .await?)
    }

    /// Best-effort removal of a temporary script; failures are only logged
    async fn remove_script(&self, handle: &SandboxHandle, script_path: &str) {
        let command = vec!["rm".to_string(), "-f".to_string(), script_path.to_string()];
        match self.provider.exec_command(&handle.id, command, None).await {
            Ok(result) if result.exit_code != 0 => warn!(
                container_id = %handle.id,
                "Cleanup of {} exited with {}", script_path, result.exit_code
            ),
            Ok(_) => {}
            Err(e) => warn!(container_id = %handle.id, "Cleanup of {} failed: {}", script_path, e),
        }
    }

    /// Store `content` as `filename` in the session workspace.
    ///
    /// Only the base name of `filename` is used. Returns the stored name.
    pub async fn upload(
        &self,
        internal_id: &str,
        filename: &str,
        content: &[u8],
    ) -> Result<String> {
        let name = sanitize_filename(filename).ok_or_else(|| invalid_filename(filename))?;
        ensure_valid_id(internal_id)?;

        let handle = self.get_or_create(internal_id, false).await?;

        if let Some(dir) = self.volume_dir(internal_id) {
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::write(dir.join(&name), content).await?;
        } else {
            let archive = pack_single_file(&name, content)?;
            if let Err(e) = self.put_workspace_archive(&handle, archive.clone()).await {
                if !e.is_retryable() {
                    return Err(e);
                }
                info!(
                    session_id = %internal_id,
                    "Upload failed ({}), retrying with a refreshed sandbox", e
                );
                let fresh = self.get_or_create(internal_id, true).await?;
                self.put_workspace_archive(&fresh, archive).await?;
            }
        }

        info!(session_id = %internal_id, "Uploaded {} ({} bytes)", name, content.len());
        Ok(name)
    }

    async fn put_workspace_archive(&self, handle: &SandboxHandle, archive: Vec<u8>) -> Result<()> {
        Ok(self
            .provider
            .put_archive(&handle.id, &self.settings.workdir, archive)
            .await?)
    }

    /// Read `filename` from the session workspace
    pub async fn download(&self, internal_id: &str, filename: &str) -> Result<Vec<u8>> {
        let name = sanitize_filename(filename).ok_or_else(|| invalid_filename(filename))?;
        ensure_valid_id(internal_id)?;

        if let Some(dir) = self.volume_dir(internal_id) {
            return match tokio::fs::read(dir.join(&name)).await {
                Ok(content) => Ok(content),
                Err(e) if e.kind() == ErrorKind::NotFound => Err(SessionError::FileNotFound(name)),
                Err(e) => Err(e.into()),
            };
        }

        let Some(handle) = self.registry.touch(internal_id) else {
            return Err(SessionError::FileNotFound(name));
        };

        let path = format!("{}/{}", self.settings.workdir.trim_end_matches('/'), name);
        let data = match self.provider.get_archive(&handle.id, &path).await {
            Ok(data) => data,
            Err(e) if e.is_not_found() => return Err(SessionError::FileNotFound(name)),
            Err(e) => return Err(e.into()),
        };

        match unpack_first_file(&data)? {
            Some((_, content)) => Ok(content),
            None => Err(SessionError::FileNotFound(name)),
        }
    }

    /// Names of the files in the session workspace; best effort
    pub async fn list_files(&self, internal_id: &str) -> Result<Vec<String>> {
        ensure_valid_id(internal_id)?;

        if let Some(dir) = self.volume_dir(internal_id) {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(e.into()),
            };

            let mut names = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
            names.sort();
            return Ok(names);
        }

        let Some(handle) = self.registry.touch(internal_id) else {
            return Ok(Vec::new());
        };

        let command = vec![
            "ls".to_string(),
            "-1A".to_string(),
            self.settings.workdir.clone(),
        ];
        let result = match self.provider.exec_command(&handle.id, command, None).await {
            Ok(result) => result,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        if result.exit_code != 0 {
            debug!(session_id = %internal_id, exit_code = result.exit_code, "Listing failed");
            return Ok(Vec::new());
        }

        Ok(String::from_utf8_lossy(&result.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Current workspace listing paired with public file ids
    pub async fn describe_files(&self, internal_id: &str) -> Result<Vec<FileDescriptor>> {
        let names = self.list_files(internal_id).await?;
        Ok(names
            .into_iter()
            .map(|name| FileDescriptor {
                id: self.file_id(internal_id, &name),
                name,
            })
            .collect())
    }

    fn volume_dir(&self, internal_id: &str) -> Option<PathBuf> {
        match &self.settings.storage {
            StorageMode::SharedVolume { local_dir, .. } => Some(local_dir.join(internal_id)),
            StorageMode::Archive => None,
        }
    }

    /// Adopt sandboxes left by a previous process.
    ///
    /// Stopped sandboxes are registered as they are and started on next use.
    /// Returns the number of sessions adopted.
    pub async fn recover(&self) -> Result<usize> {
        let filter = HashMap::from([(
            MANAGED_BY_LABEL.to_string(),
            self.settings.managed_by.clone(),
        )]);

        let containers = self.provider.list_containers(&filter).await.map_err(|e| {
            error!("Failed to enumerate sandboxes for recovery: {}", e);
            SessionError::from(e)
        })?;

        let mut adopted = 0;
        for container in containers {
            let Some(session_id) = container.labels.get(SESSION_ID_LABEL) else {
                info!(container_id = %container.id, "Skipping sandbox without session label");
                continue;
            };

            if session_id.is_empty() || sanitize_id(session_id) != *session_id {
                warn!(
                    container_id = %container.id,
                    "Skipping sandbox with invalid session label {:?}", session_id
                );
                continue;
            }

            if matches!(container.status, ContainerStatus::Dead | ContainerStatus::Removing) {
                info!(
                    container_id = %container.id,
                    "Skipping sandbox in state {:?}", container.status
                );
                continue;
            }

            let handle = SandboxHandle {
                id: container.id.clone(),
                name: container.name.clone(),
            };
            if self.registry.adopt(session_id, handle.clone()) {
                info!(session_id = %session_id, container_id = %container.id, "Recovered session");
                adopted += 1;
            } else if self
                .registry
                .handle(session_id)
                .is_some_and(|tracked| tracked.id != handle.id)
            {
                // A second sandbox for a tracked session could never be reaped
                warn!(
                    session_id = %session_id,
                    container_id = %container.id,
                    "Stopping duplicate sandbox for tracked session"
                );
                self.stop_in_background(handle);
            }
        }

        info!("Recovered {} session(s)", adopted);
        Ok(adopted)
    }

    /// Tear down sessions idle for longer than the configured TTL.
    ///
    /// Bookkeeping is removed before the executor is asked to stop anything,
    /// so a stuck sandbox never keeps its registry slot. Returns the number of
    /// sessions reaped.
    pub async fn cleanup_sessions(&self) -> usize {
        let now = Instant::now();
        let ttl = self.settings.session_ttl;
        let mut reaped = 0;

        for internal_id in self.registry.expired(now, ttl) {
            let Some(entry) = self.registry.remove_expired(&internal_id, now, ttl) else {
                continue;
            };
            reaped += 1;
            info!(
                session_id = %internal_id,
                container_id = %entry.handle.id,
                "Reaping idle session"
            );

            if let Some(dir) = self.volume_dir(&internal_id) {
                match tokio::fs::remove_dir_all(&dir).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => error!("Error cleaning up session {}: {}", internal_id, e),
                }
            }

            if let Err(e) = self
                .provider
                .stop_container(&entry.handle.id, self.settings.stop_timeout_secs)
                .await
            {
                if e.is_not_found() {
                    debug!(session_id = %internal_id, "Sandbox already gone");
                } else {
                    error!("Error cleaning up session {}: {}", internal_id, e);
                }
            }
        }

        reaped
    }

    fn stop_in_background(&self, handle: SandboxHandle) {
        let provider = Arc::clone(&self.provider);
        let timeout = self.settings.stop_timeout_secs;
        tokio::spawn(async move {
            if let Err(e) = provider.stop_container(&handle.id, timeout).await {
                if !e.is_not_found() {
                    warn!(container_id = %handle.id, "Failed to stop discarded sandbox: {}", e);
                }
            }
        });
    }

    /// Public id for a session, minted on first exposure
    pub fn public_session_id(&self, internal_id: &str) -> String {
        self.registry
            .with_identity(|ids| ids.public_session_id(internal_id, generate_public_id))
    }

    /// Internal id for a public or internal session id.
    ///
    /// Unknown ids are treated as internal ids after sanitization.
    pub fn resolve_session_id(&self, session_ref: &str) -> String {
        let sanitized = sanitize_id(session_ref);
        self.registry
            .with_identity(|ids| ids.internal_session_id(&sanitized).map(str::to_string))
            .unwrap_or(sanitized)
    }

    /// Public id for a file within a session, minted on first use
    pub fn file_id(&self, internal_id: &str, filename: &str) -> String {
        self.registry
            .with_identity(|ids| ids.file_id(internal_id, filename, generate_public_id))
    }

    /// Real filename for a file id, or the base name of `file_ref` itself
    /// when it is not a known id
    pub fn resolve_file(&self, internal_id: &str, file_ref: &str) -> Result<String> {
        let mapped = self
            .registry
            .with_identity(|ids| ids.filename(internal_id, file_ref).map(str::to_string));

        match mapped {
            Some(name) => Ok(name),
            None => sanitize_filename(file_ref).ok_or_else(|| invalid_filename(file_ref)),
        }
    }
}

fn invalid_filename(filename: &str) -> SessionError {
    SessionError::InvalidInput(format!("Invalid filename: {:?}", filename))
}

fn ensure_valid_id(internal_id: &str) -> Result<()> {
    if internal_id.is_empty() || sanitize_id(internal_id) != internal_id {
        return Err(SessionError::InvalidInput(format!(
            "Invalid session id: {:?}",
            internal_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderError;

    #[test]
    fn test_execution_result_decodes_lossily() {
        let result: ExecutionResult = ExecResult {
            exit_code: 1,
            stdout: b"2\n".to_vec(),
            stderr: vec![0xff, b'x'],
        }
        .into();

        assert_eq!(result.stdout, "2\n");
        assert_eq!(result.stderr, "\u{fffd}x");
        assert_eq!(result.exit_code, 1);
    }

    #[test]
    fn test_ensure_valid_id() {
        assert!(ensure_valid_id("session-1_A").is_ok());
        assert!(matches!(
            ensure_valid_id("../x"),
            Err(SessionError::InvalidInput(_))
        ));
        assert!(ensure_valid_id("").is_err());
    }

    #[test]
    fn test_provider_errors_convert() {
        let err: SessionError = ProviderError::NotFound("c1".to_string()).into();
        assert!(err.is_retryable());
    }
}
