//! SCHEDULED jobs: trigger polling, delayed resumes and webhook renewals.

use cascade_core::engine::{ExecuteTriggerHookInput, TriggerHookType};
use cascade_core::{
    EngineToken, ExecutionCorrelationId, FlowStatus, PopulatedFlow, RepeatingJobData, RunEnvironment,
    ScheduledFlowJobData,
};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::{TriggerPayloadExtractor, WorkerServices};
use crate::api::{RemoveStaleJobRequest, ResumeRunRequest, SubmitPayloadsRequest};
use crate::engine::EngineOutcome;
use crate::error::{WorkerError, WorkerResult};

/// Dispatches recurring jobs after checking they still apply
pub struct RepeatingJobExecutor {
    services: Arc<WorkerServices>,
    trigger: TriggerPayloadExtractor,
}

impl RepeatingJobExecutor {
    pub fn new(services: Arc<WorkerServices>) -> Self {
        Self {
            trigger: TriggerPayloadExtractor::new(Arc::clone(&services)),
            services,
        }
    }

    #[instrument(skip_all, fields(job_type = data.job_type(), flow_version_id = %data.flow_version_id()))]
    pub async fn execute(&self, data: &RepeatingJobData, token: &EngineToken) -> WorkerResult<()> {
        // scheduled work has no request; its lineage is the flow version
        let correlation_id = ExecutionCorrelationId::resolve(None, Some(data.flow_version_id()));

        let flow = self
            .services
            .engine_api
            .get_flow_version_with_exact_blocks(token, data.flow_version_id())
            .await?;

        let Some(flow) = flow else {
            info!("Flow not found, removing stale job");
            return self.remove_stale_job(data).await;
        };

        if data.requires_published_version() && flow.published_version_id.as_ref() != Some(data.flow_version_id()) {
            info!(
                published_version_id = ?flow.published_version_id,
                "Flow version is no longer published, removing stale job"
            );
            return self.remove_stale_job(data).await;
        }

        if flow.status == FlowStatus::Disabled {
            info!(flow_id = %flow.id, "Flow is disabled, skipping job");
            return Ok(());
        }

        match data {
            RepeatingJobData::ExecuteTrigger(job) => self.execute_trigger(job, &flow, token, &correlation_id).await,
            RepeatingJobData::DelayedFlow(job) => {
                let request = ResumeRunRequest {
                    run_id: job.run_id.clone(),
                    project_id: job.project_id.clone(),
                    execution_correlation_id: correlation_id.to_string(),
                };
                self.services.worker_api.resume_run(&request).await
            }
            RepeatingJobData::RenewWebhook(_) => self.renew_webhook(&flow, token, &correlation_id).await,
        }
    }

    async fn remove_stale_job(&self, data: &RepeatingJobData) -> WorkerResult<()> {
        let request = RemoveStaleJobRequest {
            flow_id: data.flow_id().clone(),
            flow_version_id: data.flow_version_id().clone(),
            project_id: data.project_id().clone(),
        };
        self.services.worker_api.remove_stale_job(&request).await
    }

    async fn execute_trigger(
        &self,
        job: &ScheduledFlowJobData,
        flow: &PopulatedFlow,
        token: &EngineToken,
        correlation_id: &ExecutionCorrelationId,
    ) -> WorkerResult<()> {
        let payloads = self
            .trigger
            .extract_payloads(token, flow, None, false, correlation_id)
            .await;

        if payloads.is_empty() {
            debug!("Trigger produced no payloads");
            return Ok(());
        }

        let request = SubmitPayloadsRequest {
            flow_version_id: job.flow_version_id.clone(),
            project_id: job.project_id.clone(),
            payloads,
            environment: RunEnvironment::Production,
            execution_correlation_id: correlation_id.to_string(),
            synchronous_handler_id: None,
        };
        self.services.worker_api.submit_payloads(&request).await
    }

    async fn renew_webhook(
        &self,
        flow: &PopulatedFlow,
        token: &EngineToken,
        correlation_id: &ExecutionCorrelationId,
    ) -> WorkerResult<()> {
        let flow_version = self
            .services
            .blocks
            .lock_flow_version(token, &flow.version, &flow.version.trigger.name)
            .await?;

        let input = ExecuteTriggerHookInput {
            hook_type: TriggerHookType::Renew,
            flow_version,
            project_id: flow.project_id.clone(),
            webhook_url: self.services.config.webhook_url(&flow.id),
            server_url: self.services.config.server_url.clone(),
            engine_token: token.clone(),
            trigger_payload: None,
            test: false,
            blocks: Vec::new(),
        };

        match self.services.engine.execute_trigger_hook(&input, correlation_id).await? {
            EngineOutcome::Ok(result) if result.success => {
                info!(flow_id = %flow.id, "Webhook subscription renewed");
                Ok(())
            }
            EngineOutcome::Ok(result) => Err(WorkerError::EngineFailure(
                result
                    .message
                    .unwrap_or_else(|| "webhook renewal reported failure".to_string()),
            )),
            EngineOutcome::Error(message) => Err(WorkerError::EngineFailure(message)),
        }
    }
}
