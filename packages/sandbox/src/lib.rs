// ABOUTME: Session and sandbox orchestration core for the code-execution gateway
// ABOUTME: Maps client sessions onto reusable isolated sandboxes supplied by an executor provider

pub mod error;
pub mod identity;
pub mod ids;
pub mod manager;
pub mod providers;
pub mod reaper;
pub mod registry;
pub mod settings;
pub mod wrap;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

#[cfg(test)]
mod tests;

pub use error::SessionError;
pub use manager::{ExecutionResult, FileDescriptor, SessionManager};
pub use providers::{DockerProvider, Provider as SandboxProvider, ProviderError};
pub use reaper::spawn_reaper;
pub use registry::{SandboxHandle, SessionRegistry};
pub use settings::{SandboxSettings, SettingsError, StorageMode};
