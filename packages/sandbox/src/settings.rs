// ABOUTME: Sandbox settings read from environment variables at startup
// ABOUTME: Resource limits, lifecycle timings, image and shared-volume configuration with validation

use rce_config as keys;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum SettingsError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// Where uploaded and produced files live
#[derive(Debug, Clone, PartialEq)]
pub enum StorageMode {
    /// Files move through the executor's archive copy primitive
    Archive,
    /// Files live in a host directory bind-mounted into each sandbox
    SharedVolume {
        /// Parent directory as the container engine's host sees it
        host_dir: PathBuf,
        /// The same directory as seen by this process
        local_dir: PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SandboxSettings {
    pub image: String,
    pub interpreter: String,
    pub workdir: String,
    /// Value of the `managed_by` label used to find our sandboxes again
    pub managed_by: String,

    // Resource Limits
    pub memory_mb: u64,
    pub cpu_cores: f64,
    pub network_enabled: bool,
    pub gpu_enabled: bool,

    // Lifecycle
    pub max_sessions: usize,
    pub session_ttl: Duration,
    pub cleanup_interval: Duration,
    pub stop_timeout_secs: u64,

    pub storage: StorageMode,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            image: "custom-rce-kernel:latest".to_string(),
            interpreter: "python3".to_string(),
            workdir: "/mnt/data".to_string(),
            managed_by: "librechat-rce".to_string(),
            memory_mb: 512,
            cpu_cores: 0.5,
            network_enabled: false,
            gpu_enabled: false,
            max_sessions: 50,
            session_ttl: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(60),
            stop_timeout_secs: 10,
            storage: StorageMode::Archive,
        }
    }
}

impl SandboxSettings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup; unset keys take defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let memory_mb = match get(keys::RCE_MEM_LIMIT_MB) {
            Some(raw) => parse_number::<u64>(keys::RCE_MEM_LIMIT_MB, &raw)?,
            None => defaults.memory_mb,
        };
        if memory_mb == 0 {
            return Err(invalid(keys::RCE_MEM_LIMIT_MB, "0", "must be positive"));
        }
        if memory_limit_bytes(memory_mb).is_none() {
            return Err(invalid(
                keys::RCE_MEM_LIMIT_MB,
                &memory_mb.to_string(),
                "too large to express in bytes",
            ));
        }

        let cpu_cores = match get(keys::RCE_CPU_LIMIT) {
            Some(raw) => parse_number::<f64>(keys::RCE_CPU_LIMIT, &raw)?,
            None => defaults.cpu_cores,
        };
        if !(cpu_cores.is_finite() && cpu_cores > 0.0) {
            return Err(invalid(
                keys::RCE_CPU_LIMIT,
                &cpu_cores.to_string(),
                "must be a positive number of cores",
            ));
        }

        let max_sessions = match get(keys::RCE_MAX_SESSIONS) {
            Some(raw) => parse_number::<usize>(keys::RCE_MAX_SESSIONS, &raw)?,
            None => defaults.max_sessions,
        };

        let session_ttl = match get(keys::RCE_SESSION_TTL) {
            Some(raw) => Duration::from_secs(parse_number::<u64>(keys::RCE_SESSION_TTL, &raw)?),
            None => defaults.session_ttl,
        };

        let cleanup_interval = match get(keys::RCE_CLEANUP_INTERVAL) {
            Some(raw) => {
                let secs = parse_number::<u64>(keys::RCE_CLEANUP_INTERVAL, &raw)?;
                if secs == 0 {
                    return Err(invalid(keys::RCE_CLEANUP_INTERVAL, &raw, "must be positive"));
                }
                Duration::from_secs(secs)
            }
            None => defaults.cleanup_interval,
        };

        let stop_timeout_secs = match get(keys::RCE_STOP_TIMEOUT) {
            Some(raw) => parse_number::<u64>(keys::RCE_STOP_TIMEOUT, &raw)?,
            None => defaults.stop_timeout_secs,
        };

        let network_enabled = match get(keys::RCE_NETWORK_ENABLED) {
            Some(raw) => parse_bool(keys::RCE_NETWORK_ENABLED, &raw)?,
            None => defaults.network_enabled,
        };

        let gpu_enabled = match get(keys::RCE_GPU_ENABLED) {
            Some(raw) => parse_bool(keys::RCE_GPU_ENABLED, &raw)?,
            None => defaults.gpu_enabled,
        };

        // The host path switches file handling to shared-volume mode
        let storage = match get(keys::RCE_DATA_DIR_HOST) {
            Some(host) => {
                let local = get(keys::RCE_DATA_DIR_INTERNAL).unwrap_or_else(|| host.clone());
                StorageMode::SharedVolume {
                    host_dir: PathBuf::from(host),
                    local_dir: PathBuf::from(local),
                }
            }
            None => StorageMode::Archive,
        };

        Ok(Self {
            image: get(keys::RCE_IMAGE_NAME).unwrap_or(defaults.image),
            interpreter: get(keys::RCE_INTERPRETER).unwrap_or(defaults.interpreter),
            workdir: get(keys::RCE_WORKDIR).unwrap_or(defaults.workdir),
            managed_by: get(keys::RCE_MANAGED_BY).unwrap_or(defaults.managed_by),
            memory_mb,
            cpu_cores,
            network_enabled,
            gpu_enabled,
            max_sessions,
            session_ttl,
            cleanup_interval,
            stop_timeout_secs,
            storage,
        })
    }

    pub fn is_shared_volume(&self) -> bool {
        matches!(self.storage, StorageMode::SharedVolume { .. })
    }
}

fn invalid(key: &'static str, value: &str, reason: &str) -> SettingsError {
    SettingsError::InvalidValue {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_number<T>(key: &'static str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| invalid(key, raw, &e.to_string()))
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool> {
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, raw, "expected true or false")),
    }
}

/// Memory ceiling in bytes, or `None` when it does not fit the executor's signed limit
pub fn memory_limit_bytes(memory_mb: u64) -> Option<i64> {
    memory_mb
        .checked_mul(1024 * 1024)
        .and_then(|bytes| i64::try_from(bytes).ok())
}
