// ABOUTME: In-memory recording provider for exercising orchestration without Docker
// ABOUTME: Simulates containers and their files, logs every call and replays scripted failures

use crate::providers::archive::{pack_single_file, unpack_first_file};
use crate::providers::{
    ContainerConfig, ContainerInfo, ContainerStatus, ExecResult, Provider, ProviderError, Result,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Provider operations that can be observed or made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Create,
    Info,
    Start,
    Stop,
    /// Any exec that is not an interpreter run
    Exec,
    /// Exec of the configured interpreter
    Run,
    PutArchive,
    GetArchive,
    List,
}

/// One recorded provider call
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub op: Op,
    pub container_id: String,
    pub args: Vec<String>,
}

type Responder = Arc<dyn Fn(&str) -> ExecResult + Send + Sync>;

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub name: String,
    pub status: ContainerStatus,
    pub labels: HashMap<String, String>,
    pub auto_remove: bool,
    /// Absolute path -> content
    pub files: BTreeMap<String, Vec<u8>>,
}

#[derive(Default)]
struct FakeState {
    calls: Vec<Call>,
    configs: Vec<ContainerConfig>,
    containers: HashMap<String, FakeContainer>,
    failures: HashMap<Op, VecDeque<ProviderError>>,
    next_id: usize,
}

/// [`Provider`] double keeping containers in memory.
///
/// Interpreter runs (`[interpreter, script]`) are answered by a responder
/// that receives the script source; everything else (`mkdir`, `rm`, `ls`)
/// acts on the simulated filesystem.
pub struct RecordingProvider {
    state: Mutex<FakeState>,
    interpreter: String,
    responder: Mutex<Responder>,
    create_delay: Mutex<Option<Duration>>,
}

impl Default for RecordingProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingProvider {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            interpreter: "python3".to_string(),
            responder: Mutex::new(Arc::new(|_| ExecResult::default())),
            create_delay: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Answer interpreter runs with `responder(script_source)`
    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&str) -> ExecResult + Send + Sync + 'static,
    {
        *self.responder.lock().unwrap_or_else(|p| p.into_inner()) = Arc::new(responder);
    }

    /// Make `create_container` wait before answering
    pub fn delay_create(&self, delay: Duration) {
        *self.create_delay.lock().unwrap_or_else(|p| p.into_inner()) = Some(delay);
    }

    /// Fail the next call of `op` with `error`; queued failures are used in order
    pub fn fail_next(&self, op: Op, error: ProviderError) {
        self.lock().failures.entry(op).or_default().push_back(error);
    }

    /// Remove a container behind the manager's back
    pub fn vanish(&self, container_id: &str) {
        self.lock().containers.remove(container_id);
    }

    /// Mark a container stopped without removing it
    pub fn halt(&self, container_id: &str) {
        if let Some(container) = self.lock().containers.get_mut(container_id) {
            container.status = ContainerStatus::Stopped;
        }
    }

    /// Seed a pre-existing container, as left by a previous process
    pub fn seed(&self, container_id: &str, status: ContainerStatus, labels: &[(&str, &str)]) {
        self.lock().containers.insert(
            container_id.to_string(),
            FakeContainer {
                name: format!("seeded_{}", container_id),
                status,
                labels: labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                auto_remove: true,
                files: BTreeMap::new(),
            },
        );
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn calls_of(&self, op: Op) -> Vec<Call> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.op == op)
            .cloned()
            .collect()
    }

    pub fn count(&self, op: Op) -> usize {
        self.calls_of(op).len()
    }

    /// Exec calls whose argv starts with `program`
    pub fn execs_of(&self, program: &str) -> Vec<Call> {
        self.calls_of(Op::Exec)
            .into_iter()
            .filter(|call| call.args.first().map(String::as_str) == Some(program))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Configs passed to `create_container`, in order
    pub fn created_configs(&self) -> Vec<ContainerConfig> {
        self.lock().configs.clone()
    }

    pub fn container(&self, container_id: &str) -> Option<FakeContainer> {
        self.lock().containers.get(container_id).cloned()
    }

    pub fn running_count(&self) -> usize {
        self.lock()
            .containers
            .values()
            .filter(|c| c.status.is_running())
            .count()
    }

    fn record(&self, op: Op, container_id: &str, args: Vec<String>) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(Call {
            op,
            container_id: container_id.to_string(),
            args,
        });
        match state.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn with_running<T>(
        &self,
        container_id: &str,
        f: impl FnOnce(&mut FakeContainer) -> T,
    ) -> Result<T> {
        let mut state = self.lock();
        let container = state
            .containers
            .get_mut(container_id)
            .ok_or_else(|| ProviderError::NotFound(container_id.to_string()))?;
        if !container.status.is_running() {
            return Err(ProviderError::Api(format!(
                "{} (409): container is not running",
                container_id
            )));
        }
        Ok(f(container))
    }
}

fn join_path(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name)
}

#[async_trait]
impl Provider for RecordingProvider {
    async fn is_available(&self) -> Result<bool> {
        Ok(true)
    }

    async fn create_container(&self, config: &ContainerConfig) -> Result<String> {
        self.record(Op::Create, "", vec![config.name.clone()])?;

        let delay = *self.create_delay.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        state.next_id += 1;
        let id = format!("c{}", state.next_id);
        state.configs.push(config.clone());
        state.containers.insert(
            id.clone(),
            FakeContainer {
                name: config.name.clone(),
                status: ContainerStatus::Running,
                labels: config.labels.clone(),
                auto_remove: config.auto_remove,
                files: BTreeMap::new(),
            },
        );
        Ok(id)
    }

    async fn get_container_info(&self, container_id: &str) -> Result<ContainerInfo> {
        self.record(Op::Info, container_id, vec![])?;

        let state = self.lock();
        let container = state
            .containers
            .get(container_id)
            .ok_or_else(|| ProviderError::NotFound(container_id.to_string()))?;
        Ok(ContainerInfo {
            id: container_id.to_string(),
            name: container.name.clone(),
            status: container.status.clone(),
            labels: container.labels.clone(),
            created_at: chrono::Utc::now(),
        })
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        self.record(Op::Start, container_id, vec![])?;

        let mut state = self.lock();
        let container = state
            .containers
            .get_mut(container_id)
            .ok_or_else(|| ProviderError::NotFound(container_id.to_string()))?;
        container.status = ContainerStatus::Running;
        Ok(())
    }

    async fn stop_container(&self, container_id: &str, timeout_secs: u64) -> Result<()> {
        self.record(Op::Stop, container_id, vec![timeout_secs.to_string()])?;

        let mut state = self.lock();
        let auto_remove = match state.containers.get_mut(container_id) {
            Some(container) => {
                container.status = ContainerStatus::Stopped;
                container.auto_remove
            }
            None => return Err(ProviderError::NotFound(container_id.to_string())),
        };
        if auto_remove {
            state.containers.remove(container_id);
        }
        Ok(())
    }

    async fn exec_command(
        &self,
        container_id: &str,
        command: Vec<String>,
        _working_dir: Option<&str>,
    ) -> Result<ExecResult> {
        let is_run = command.first() == Some(&self.interpreter);
        let op = if is_run { Op::Run } else { Op::Exec };
        self.record(op, container_id, command.clone())?;

        if is_run {
            let script_path = command.get(1).cloned().unwrap_or_default();
            let source = self.with_running(container_id, |c| c.files.get(&script_path).cloned())?;
            let Some(source) = source else {
                return Ok(ExecResult {
                    exit_code: 2,
                    stdout: Vec::new(),
                    stderr: format!("can't open file '{}'", script_path).into_bytes(),
                });
            };
            let responder = self
                .responder
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .clone();
            return Ok(responder(&String::from_utf8_lossy(&source)));
        }

        self.with_running(container_id, |container| {
            let args: Vec<&str> = command.iter().map(String::as_str).collect();
            match args.as_slice() {
                ["rm", "-f", path] => {
                    container.files.remove(*path);
                    ExecResult::default()
                }
                ["ls", "-1A", dir] => {
                    let prefix = format!("{}/", dir.trim_end_matches('/'));
                    let listing: String = container
                        .files
                        .keys()
                        .filter_map(|path| path.strip_prefix(&prefix))
                        .filter(|rest| !rest.contains('/'))
                        .map(|name| format!("{}\n", name))
                        .collect();
                    ExecResult {
                        exit_code: 0,
                        stdout: listing.into_bytes(),
                        stderr: Vec::new(),
                    }
                }
                _ => ExecResult::default(),
            }
        })
    }

    async fn put_archive(
        &self,
        container_id: &str,
        dest_dir: &str,
        archive: Vec<u8>,
    ) -> Result<()> {
        self.record(Op::PutArchive, container_id, vec![dest_dir.to_string()])?;

        let (name, content) = unpack_first_file(&archive)
            .map_err(|e| ProviderError::Archive(e.to_string()))?
            .ok_or_else(|| ProviderError::Archive("empty archive".to_string()))?;
        self.with_running(container_id, |container| {
            container.files.insert(join_path(dest_dir, &name), content);
        })
    }

    async fn get_archive(&self, container_id: &str, path: &str) -> Result<Vec<u8>> {
        self.record(Op::GetArchive, container_id, vec![path.to_string()])?;

        let state = self.lock();
        let container = state
            .containers
            .get(container_id)
            .ok_or_else(|| ProviderError::NotFound(container_id.to_string()))?;
        let content = container
            .files
            .get(path)
            .ok_or_else(|| ProviderError::NotFound(path.to_string()))?;
        let name = path.rsplit('/').next().unwrap_or(path);
        pack_single_file(name, content).map_err(|e| ProviderError::Archive(e.to_string()))
    }

    async fn list_containers(
        &self,
        labels: &HashMap<String, String>,
    ) -> Result<Vec<ContainerInfo>> {
        self.record(Op::List, "", vec![])?;

        let state = self.lock();
        let mut found: Vec<ContainerInfo> = state
            .containers
            .iter()
            .filter(|(_, c)| labels.iter().all(|(k, v)| c.labels.get(k) == Some(v)))
            .map(|(id, c)| ContainerInfo {
                id: id.clone(),
                name: c.name.clone(),
                status: c.status.clone(),
                labels: c.labels.clone(),
                created_at: chrono::Utc::now(),
            })
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }
}

/// Answers scripts ending in the auto-display rewrite of `1 + 1` with `2`
pub fn arithmetic_responder(script: &str) -> ExecResult {
    let stdout = if script.contains("__last_res__ = 1 + 1") {
        b"2\n".to_vec()
    } else {
        Vec::new()
    };
    ExecResult {
        exit_code: 0,
        stdout,
        stderr: Vec::new(),
    }
}
