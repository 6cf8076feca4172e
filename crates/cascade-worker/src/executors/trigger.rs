//! Trigger payload extraction shared by scheduled polling and webhooks.

use cascade_core::engine::{ExecuteTriggerHookInput, TriggerHookType};
use cascade_core::{EngineToken, ExecutionCorrelationId, PopulatedFlow};
use cascade_monitoring::WorkerMetrics;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::WorkerServices;
use crate::api::UpdateFailureCountRequest;
use crate::engine::EngineOutcome;
use crate::error::{WorkerError, WorkerResult};

/// Runs a flow's trigger hook and turns its output into new payloads
pub struct TriggerPayloadExtractor {
    services: Arc<WorkerServices>,
}

impl TriggerPayloadExtractor {
    pub fn new(services: Arc<WorkerServices>) -> Self {
        Self { services }
    }

    /// New payloads produced by the trigger; empty on any failure.
    ///
    /// Success and failure are both signalled to the control plane.
    pub async fn extract_payloads(
        &self,
        token: &EngineToken,
        flow: &PopulatedFlow,
        payload: Option<Value>,
        simulate: bool,
        correlation_id: &ExecutionCorrelationId,
    ) -> Vec<Value> {
        match self.run_hook(token, flow, payload, simulate, correlation_id).await {
            Ok(payloads) => {
                debug!(flow_id = %flow.id, payloads = payloads.len(), "Trigger produced payloads");
                self.signal(flow, true).await;
                payloads
            }
            Err(e) => {
                if e.is_execution_timeout() {
                    warn!(flow_id = %flow.id, error = %e, "Trigger hook timed out");
                } else {
                    warn!(flow_id = %flow.id, error = %e, "Trigger hook failed");
                }
                self.signal(flow, false).await;
                Vec::new()
            }
        }
    }

    async fn run_hook(
        &self,
        token: &EngineToken,
        flow: &PopulatedFlow,
        payload: Option<Value>,
        simulate: bool,
        correlation_id: &ExecutionCorrelationId,
    ) -> WorkerResult<Vec<Value>> {
        let blocks = self.services.blocks.extract_flow_blocks(token, &flow.version).await?;

        let input = ExecuteTriggerHookInput {
            hook_type: TriggerHookType::Run,
            flow_version: flow.version.clone(),
            project_id: flow.project_id.clone(),
            webhook_url: self.services.config.webhook_url(&flow.id),
            server_url: self.services.config.server_url.clone(),
            engine_token: token.clone(),
            trigger_payload: payload,
            test: simulate,
            blocks,
        };

        match self.services.engine.execute_trigger_hook(&input, correlation_id).await? {
            EngineOutcome::Ok(result) if result.success => Ok(result.output),
            EngineOutcome::Ok(result) => Err(WorkerError::EngineFailure(
                result
                    .message
                    .unwrap_or_else(|| "trigger hook reported failure".to_string()),
            )),
            EngineOutcome::Error(message) => Err(WorkerError::EngineFailure(message)),
        }
    }

    async fn signal(&self, flow: &PopulatedFlow, success: bool) {
        WorkerMetrics::record_trigger_extraction(success);
        let request = UpdateFailureCountRequest {
            flow_id: flow.id.clone(),
            project_id: flow.project_id.clone(),
            success,
        };
        if let Err(e) = self.services.worker_api.update_failure_count(&request).await {
            warn!(flow_id = %flow.id, error = %e, "Failed to report trigger health");
        }
    }
}
