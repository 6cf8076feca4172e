//! Value objects identifying the entities a worker touches.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Value object: Job ID (assigned by the control-plane queue)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

/// Value object: Flow Run ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

/// Value object: Flow ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowId(pub String);

/// Value object: Flow Version ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowVersionId(pub String);

/// Value object: Project ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectId(pub String);

/// Token issued with a polled job; scopes engine-facing calls for that job's lifetime.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineToken(pub String);

impl fmt::Debug for EngineToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EngineToken(***)")
    }
}

impl EngineToken {
    /// Raw token value for the Authorization header
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Value object: Execution correlation ID.
///
/// Used purely for cross-system log correlation. It is resolved once at the
/// entry point of a job and then passed explicitly to every call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionCorrelationId(pub String);

impl ExecutionCorrelationId {
    /// Request id if present, else the flow version id, else a fresh identifier.
    pub fn resolve(request_id: Option<&str>, flow_version_id: Option<&FlowVersionId>) -> Self {
        match (request_id, flow_version_id) {
            (Some(request_id), _) if !request_id.is_empty() => Self(request_id.to_string()),
            (_, Some(version_id)) => Self(version_id.0.clone()),
            _ => Self::generate(),
        }
    }

    /// Fresh random correlation id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the inner value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! impl_display {
    ($($ty:ty),*) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.0)
                }
            }
        )*
    };
}

impl_display!(JobId, RunId, FlowId, FlowVersionId, ProjectId, ExecutionCorrelationId);
