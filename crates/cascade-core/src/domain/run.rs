use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::{FlowVersionId, ProjectId, RunId};

/// Lifecycle status of a flow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Paused,
    Stopped,
    Timeout,
    InternalError,
    QuotaExceeded,
}

impl RunStatus {
    /// Whether no further execution will happen for the run
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Queued | RunStatus::Running | RunStatus::Paused)
    }
}

/// Current state of a run as stored by the control plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowRun {
    pub id: RunId,
    pub project_id: ProjectId,
    pub flow_version_id: FlowVersionId,
    pub status: RunStatus,
    /// Tasks consumed so far
    #[serde(default)]
    pub tasks: u64,
    /// Prior step outputs keyed by step name
    #[serde(default)]
    pub steps: Value,
    /// Step the run paused on, if paused
    #[serde(default)]
    pub paused_step_name: Option<String>,
}
