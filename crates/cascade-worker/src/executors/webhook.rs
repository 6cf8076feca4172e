//! WEBHOOK jobs: one incoming webhook delivery.

use cascade_core::{EngineToken, ExecutionCorrelationId, FlowStatus, RunEnvironment, WebhookJobData};
use reqwest::StatusCode;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::{TriggerPayloadExtractor, WorkerServices};
use crate::api::{
    DeleteWebhookSimulationRequest, SavePayloadsRequest, SendWebhookUpdateRequest, SubmitPayloadsRequest,
    WebhookResponse,
};
use crate::error::WorkerResult;

/// Turns a webhook delivery into runs, sample data or a synchronous reply
pub struct WebhookJobExecutor {
    services: Arc<WorkerServices>,
    trigger: TriggerPayloadExtractor,
}

impl WebhookJobExecutor {
    pub fn new(services: Arc<WorkerServices>) -> Self {
        Self {
            trigger: TriggerPayloadExtractor::new(Arc::clone(&services)),
            services,
        }
    }

    #[instrument(skip_all, fields(request_id = %data.request_id, flow_id = %data.flow_id))]
    pub async fn execute(&self, data: &WebhookJobData, token: &EngineToken) -> WorkerResult<()> {
        let correlation_id = ExecutionCorrelationId::resolve(Some(&data.request_id), Some(&data.flow_version_id));

        let flow = self
            .services
            .engine_api
            .get_flow_version_with_exact_blocks(token, &data.flow_version_id)
            .await?;

        let Some(flow) = flow else {
            info!("Flow not found for webhook");
            return self.reply(data, StatusCode::NOT_FOUND).await;
        };

        if data.simulate {
            let payloads = self
                .trigger
                .extract_payloads(token, &flow, Some(data.payload.clone()), true, &correlation_id)
                .await;
            self.save_sample_data(data, payloads).await?;
            let request = DeleteWebhookSimulationRequest {
                flow_id: data.flow_id.clone(),
                project_id: data.project_id.clone(),
            };
            return self.services.worker_api.delete_webhook_simulation(&request).await;
        }

        if flow.status == FlowStatus::Disabled {
            info!("Flow is disabled, rejecting webhook");
            return self.reply(data, StatusCode::NOT_FOUND).await;
        }

        let payloads = self
            .trigger
            .extract_payloads(token, &flow, Some(data.payload.clone()), false, &correlation_id)
            .await;

        if data.save_sample_data {
            self.save_sample_data(data, payloads.clone()).await?;
        }

        if payloads.is_empty() {
            debug!("Webhook produced no payloads");
            return self.reply(data, StatusCode::NO_CONTENT).await;
        }

        let request = SubmitPayloadsRequest {
            flow_version_id: flow.version.id.clone(),
            project_id: data.project_id.clone(),
            payloads,
            environment: RunEnvironment::Production,
            execution_correlation_id: correlation_id.to_string(),
            synchronous_handler_id: data.synchronous_handler_id.clone(),
        };
        self.services.worker_api.submit_payloads(&request).await
    }

    async fn save_sample_data(&self, data: &WebhookJobData, payloads: Vec<serde_json::Value>) -> WorkerResult<()> {
        let request = SavePayloadsRequest {
            flow_id: data.flow_id.clone(),
            project_id: data.project_id.clone(),
            payloads,
        };
        self.services.worker_api.save_payloads_as_sample_data(&request).await
    }

    /// Answer a waiting synchronous caller; nothing to do if nobody waits
    async fn reply(&self, data: &WebhookJobData, status: StatusCode) -> WorkerResult<()> {
        let Some(handler_id) = data.synchronous_handler_id.as_ref() else {
            return Ok(());
        };
        let request = SendWebhookUpdateRequest {
            request_id: data.request_id.clone(),
            synchronous_handler_id: handler_id.clone(),
            response: WebhookResponse::with_status(status),
        };
        self.services.worker_api.send_webhook_update(&request).await
    }
}
