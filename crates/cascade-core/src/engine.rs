//! Envelopes exchanged with the remote execution engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::domain::block::BlockPackage;
use crate::domain::flow_version::FlowVersion;
use crate::domain::ids::{EngineToken, ProjectId, RunId};
use crate::domain::job::RunEnvironment;
use crate::domain::run::RunStatus;

/// Operation kinds understood by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineOperationType {
    ExecuteFlow,
    ExecuteTriggerHook,
    ExecuteProperty,
    ExtractBlockMetadata,
    ExecuteValidateAuth,
    ExecuteStep,
}

impl EngineOperationType {
    /// Side-effect-free kinds whose responses may be cached
    pub fn is_cacheable(&self) -> bool {
        matches!(
            self,
            EngineOperationType::ExecuteProperty | EngineOperationType::ExtractBlockMetadata
        )
    }

    /// Kinds that run user steps and get the long flow budget
    pub fn uses_flow_timeout(&self) -> bool {
        matches!(self, EngineOperationType::ExecuteFlow | EngineOperationType::ExecuteStep)
    }

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineOperationType::ExecuteFlow => "EXECUTE_FLOW",
            EngineOperationType::ExecuteTriggerHook => "EXECUTE_TRIGGER_HOOK",
            EngineOperationType::ExecuteProperty => "EXECUTE_PROPERTY",
            EngineOperationType::ExtractBlockMetadata => "EXTRACT_BLOCK_METADATA",
            EngineOperationType::ExecuteValidateAuth => "EXECUTE_VALIDATE_AUTH",
            EngineOperationType::ExecuteStep => "EXECUTE_STEP",
        }
    }
}

impl fmt::Display for EngineOperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request envelope sent to the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineRequest {
    pub operation_type: EngineOperationType,
    pub engine_input: Value,
}

/// Outcome class of one engine call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineResponseStatus {
    Ok,
    Error,
    Timeout,
}

impl EngineResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineResponseStatus::Ok => "OK",
            EngineResponseStatus::Error => "ERROR",
            EngineResponseStatus::Timeout => "TIMEOUT",
        }
    }
}

/// Response envelope; every engine call resolves to exactly one of these
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineResponse {
    pub status: EngineResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl EngineResponse {
    pub fn ok(result: Value) -> Self {
        Self {
            status: EngineResponseStatus::Ok,
            result: Some(result),
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: EngineResponseStatus::Error,
            result: None,
            message: Some(message.into()),
        }
    }

    pub fn timeout() -> Self {
        Self {
            status: EngineResponseStatus::Timeout,
            result: None,
            message: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == EngineResponseStatus::Ok
    }
}

/// BEGIN or RESUME
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowExecutionType {
    Begin,
    Resume,
}

/// Input of `EXECUTE_FLOW`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteFlowInput {
    pub execution_type: FlowExecutionType,
    pub flow_version: FlowVersion,
    pub project_id: ProjectId,
    pub run_id: RunId,
    pub environment: RunEnvironment,
    pub server_url: String,
    pub engine_token: EngineToken,
    pub execution_correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_payload: Option<Value>,
    /// Tasks already consumed by earlier segments of the run
    #[serde(default)]
    pub tasks: u64,
    /// Outputs of previously executed steps
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub steps: Value,
}

/// Trigger lifecycle hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerHookType {
    OnEnable,
    OnDisable,
    Run,
    Test,
    Renew,
    Handshake,
}

/// Input of `EXECUTE_TRIGGER_HOOK`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteTriggerHookInput {
    pub hook_type: TriggerHookType,
    pub flow_version: FlowVersion,
    pub project_id: ProjectId,
    pub webhook_url: String,
    pub server_url: String,
    pub engine_token: EngineToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_payload: Option<Value>,
    #[serde(default)]
    pub test: bool,
    /// Exact versions of every block in the flow
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<BlockPackage>,
}

/// Input of `EXECUTE_PROPERTY`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutePropertyInput {
    pub flow_version: FlowVersion,
    pub step_name: String,
    pub property_name: String,
    pub project_id: ProjectId,
    pub server_url: String,
    pub engine_token: EngineToken,
    #[serde(default)]
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_value: Option<String>,
}

/// Input of `EXTRACT_BLOCK_METADATA`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractBlockMetadataInput {
    pub block: BlockPackage,
}

/// Input of `EXECUTE_VALIDATE_AUTH`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteValidateAuthInput {
    pub block: BlockPackage,
    pub project_id: ProjectId,
    pub server_url: String,
    pub engine_token: EngineToken,
    pub auth: Value,
}

/// Input of `EXECUTE_STEP`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteStepInput {
    pub flow_version: FlowVersion,
    pub step_name: String,
    pub project_id: ProjectId,
    pub server_url: String,
    pub engine_token: EngineToken,
    #[serde(default)]
    pub sample_data: Value,
}

/// Result of `EXECUTE_FLOW`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowRunResult {
    pub status: RunStatus,
    #[serde(default)]
    pub tasks: u64,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Result of `EXECUTE_TRIGGER_HOOK`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerHookResult {
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub output: Vec<Value>,
    #[serde(default)]
    pub message: Option<String>,
}

fn default_true() -> bool {
    true
}

/// One selectable option of a dynamic property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyOption {
    pub label: String,
    pub value: Value,
}

/// Result of `EXECUTE_PROPERTY`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyOptionsResult {
    #[serde(default)]
    pub options: Vec<PropertyOption>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub placeholder: Option<String>,
}

/// Result of `EXECUTE_VALIDATE_AUTH`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidateAuthResult {
    pub valid: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Result of `EXECUTE_STEP`, passed through untouched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepResult(pub Value);

/// Result of `EXTRACT_BLOCK_METADATA`, passed through untouched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockMetadataResult(pub Value);
