//! Error types for the Cascade worker
//!
//! Transport failures talking to the engine never surface here; the engine
//! invoker folds them into a response status. Everything else does.

use cascade_core::CoreError;
use thiserror::Error;

/// Worker error types
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Referenced entity does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// Control plane answered with a non-success status
    #[error("Control plane error ({status}): {message}")]
    ControlPlane {
        /// HTTP status code
        status: u16,
        /// Response body or reason
        message: String,
    },

    /// Network failure talking to the control plane
    #[error("Transport error: {0}")]
    Transport(String),

    /// A run exceeded its wall-clock budget
    #[error("Execution timed out: {0}")]
    ExecutionTimeout(String),

    /// The engine reported a failure for an operation that must succeed
    #[error("Engine failure: {0}")]
    EngineFailure(String),

    /// Could not acquire a distributed lock before its deadline
    #[error("Timed out acquiring lock {key} after {timeout_ms}ms")]
    LockTimeout {
        /// Lock key
        key: String,
        /// Acquisition deadline in milliseconds
        timeout_ms: u64,
    },

    /// Lock backend failure
    #[error("Lock error: {0}")]
    Lock(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Payload could not be interpreted
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Domain error
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type for worker operations
pub type WorkerResult<T> = Result<T, WorkerError>;

impl From<reqwest::Error> for WorkerError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => WorkerError::ControlPlane {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None if err.is_decode() => WorkerError::InvalidPayload(err.to_string()),
            None => WorkerError::Transport(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for WorkerError {
    fn from(err: serde_json::Error) -> Self {
        WorkerError::InvalidPayload(format!("JSON error: {}", err))
    }
}

impl From<config::ConfigError> for WorkerError {
    fn from(err: config::ConfigError) -> Self {
        WorkerError::Configuration(err.to_string())
    }
}

impl WorkerError {
    /// Whether this is a run exceeding its own budget
    pub fn is_execution_timeout(&self) -> bool {
        matches!(self, WorkerError::ExecutionTimeout(_))
    }

    /// Whether the referenced entity is gone
    pub fn is_not_found(&self) -> bool {
        matches!(self, WorkerError::NotFound(_) | WorkerError::ControlPlane { status: 404, .. })
    }
}
