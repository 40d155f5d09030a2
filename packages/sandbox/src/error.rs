// ABOUTME: Error types for session orchestration
// ABOUTME: Typed outcomes (capacity, provisioning, input, missing file, execution) surfaced to callers

use crate::providers::ProviderError;
use thiserror::Error;

/// Main error type for session operations
#[derive(Error, Debug)]
pub enum SessionError {
    /// Live plus provisioning sessions reached the configured maximum
    #[error("Server is at capacity ({max} sessions)")]
    CapacityExceeded { max: usize },

    /// The executor could not provide a new sandbox
    #[error("Failed to provision sandbox: {0}")]
    Provisioning(String),

    /// Rejected before touching the executor (e.g. empty filename)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A requested file does not exist in the session workspace
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Running submitted code failed after the retry
    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Whether a fresh sandbox handle could make the same call succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::Provider(e) => e.is_retryable(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
