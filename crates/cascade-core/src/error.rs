use thiserror::Error;

/// Core error type for the Cascade worker domain
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A polled job carried a payload that does not match its queue
    #[error("Invalid job payload: {0}")]
    InvalidJobPayload(String),

    /// A step name was not found in a flow version
    #[error("Step not found: {0}")]
    StepNotFound(String),

    /// A step does not reference a block
    #[error("Step has no block reference: {0}")]
    MissingBlockReference(String),

    /// Engine result could not be interpreted
    #[error("Invalid engine result: {0}")]
    InvalidEngineResult(String),
}
