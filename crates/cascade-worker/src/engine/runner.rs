//! Typed engine operations on top of the invoker.

use cascade_core::engine::{
    BlockMetadataResult, ExecuteFlowInput, ExecutePropertyInput, ExecuteStepInput, ExecuteTriggerHookInput,
    ExecuteValidateAuthInput, ExtractBlockMetadataInput, FlowRunResult, PropertyOptionsResult, StepResult,
    TriggerHookResult, ValidateAuthResult,
};
use cascade_core::{CoreError, EngineOperationType, EngineResponseStatus, ExecutionCorrelationId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use super::{EngineInvoker, ENGINE_FAILURE_MESSAGE};
use crate::error::{WorkerError, WorkerResult};

/// Result of a typed engine operation that did not time out
#[derive(Debug, Clone, PartialEq)]
pub enum EngineOutcome<T> {
    /// Engine answered OK
    Ok(T),
    /// Engine answered ERROR with this message
    Error(String),
}

/// Typed facade over [`EngineInvoker`]; a TIMEOUT becomes [`WorkerError::ExecutionTimeout`]
#[derive(Clone)]
pub struct EngineRunner {
    invoker: Arc<EngineInvoker>,
}

impl EngineRunner {
    pub fn new(invoker: Arc<EngineInvoker>) -> Self {
        Self { invoker }
    }

    pub fn invoker(&self) -> &EngineInvoker {
        &self.invoker
    }

    async fn run<I, T>(
        &self,
        operation: EngineOperationType,
        input: &I,
        correlation_id: &ExecutionCorrelationId,
    ) -> WorkerResult<EngineOutcome<T>>
    where
        I: Serialize,
        T: DeserializeOwned,
    {
        let engine_input = serde_json::to_value(input)?;
        let response = self.invoker.invoke(operation, engine_input, correlation_id).await;

        match response.status {
            EngineResponseStatus::Ok => {
                let result = response.result.unwrap_or(Value::Null);
                let typed = serde_json::from_value(result)
                    .map_err(|e| CoreError::InvalidEngineResult(format!("{}: {}", operation, e)))?;
                Ok(EngineOutcome::Ok(typed))
            }
            EngineResponseStatus::Error => Ok(EngineOutcome::Error(
                response
                    .message
                    .unwrap_or_else(|| ENGINE_FAILURE_MESSAGE.to_string()),
            )),
            EngineResponseStatus::Timeout => Err(WorkerError::ExecutionTimeout(format!(
                "{} exceeded {}s",
                operation,
                self.invoker.timeout_for(operation).as_secs()
            ))),
        }
    }

    pub async fn execute_flow(
        &self,
        input: &ExecuteFlowInput,
        correlation_id: &ExecutionCorrelationId,
    ) -> WorkerResult<EngineOutcome<FlowRunResult>> {
        self.run(EngineOperationType::ExecuteFlow, input, correlation_id).await
    }

    pub async fn execute_trigger_hook(
        &self,
        input: &ExecuteTriggerHookInput,
        correlation_id: &ExecutionCorrelationId,
    ) -> WorkerResult<EngineOutcome<TriggerHookResult>> {
        self.run(EngineOperationType::ExecuteTriggerHook, input, correlation_id).await
    }

    pub async fn execute_property(
        &self,
        input: &ExecutePropertyInput,
        correlation_id: &ExecutionCorrelationId,
    ) -> WorkerResult<EngineOutcome<PropertyOptionsResult>> {
        self.run(EngineOperationType::ExecuteProperty, input, correlation_id).await
    }

    pub async fn extract_block_metadata(
        &self,
        input: &ExtractBlockMetadataInput,
        correlation_id: &ExecutionCorrelationId,
    ) -> WorkerResult<EngineOutcome<BlockMetadataResult>> {
        self.run(EngineOperationType::ExtractBlockMetadata, input, correlation_id).await
    }

    pub async fn execute_validate_auth(
        &self,
        input: &ExecuteValidateAuthInput,
        correlation_id: &ExecutionCorrelationId,
    ) -> WorkerResult<EngineOutcome<ValidateAuthResult>> {
        self.run(EngineOperationType::ExecuteValidateAuth, input, correlation_id).await
    }

    pub async fn execute_step(
        &self,
        input: &ExecuteStepInput,
        correlation_id: &ExecutionCorrelationId,
    ) -> WorkerResult<EngineOutcome<StepResult>> {
        self.run(EngineOperationType::ExecuteStep, input, correlation_id).await
    }
}
