//! ONE_TIME jobs: begin or resume a flow run.

use cascade_core::engine::{ExecuteFlowInput, FlowExecutionType};
use cascade_core::{EngineToken, ExecutionCorrelationId, OneTimeJobData, RunStatus};
use cascade_monitoring::ExceptionContext;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::WorkerServices;
use crate::api::UpdateRunStatusRequest;
use crate::engine::EngineOutcome;
use crate::error::{WorkerError, WorkerResult};

/// Runs one ONE_TIME job under the run's distributed lock
pub struct FlowJobExecutor {
    services: Arc<WorkerServices>,
}

/// Lock key serializing executions of one run
pub fn run_lock_key(data: &OneTimeJobData) -> String {
    format!("flow-run:{}", data.run_id())
}

impl FlowJobExecutor {
    pub fn new(services: Arc<WorkerServices>) -> Self {
        Self { services }
    }

    /// Execute a begin/resume job and report exactly one terminal run status.
    ///
    /// Failures after the lock is held are reported as run statuses, not returned.
    #[instrument(skip_all, fields(run_id = %data.run_id(), flow_version_id = %data.flow_version_id()))]
    pub async fn execute(&self, data: &OneTimeJobData, token: &EngineToken) -> WorkerResult<()> {
        let correlation_id = ExecutionCorrelationId::resolve(data.request_id(), None);
        let lock_key = run_lock_key(data);
        let lease = self
            .services
            .lock
            .acquire(&lock_key, self.services.config.run_lock_timeout())
            .await?;

        let result = match self.execute_locked(data, token, &correlation_id).await {
            Ok(()) => Ok(()),
            Err(e) => self.report_failure(data, token, &correlation_id, e).await,
        };

        if let Err(e) = lease.release().await {
            warn!(key = %lock_key, error = %e, "Failed to release run lock");
        }
        result
    }

    async fn execute_locked(
        &self,
        data: &OneTimeJobData,
        token: &EngineToken,
        correlation_id: &ExecutionCorrelationId,
    ) -> WorkerResult<()> {
        if let OneTimeJobData::Begin(_) = data {
            self.update_status(data, token, correlation_id, RunStatus::Running, None, None)
                .await?;
        }

        let Some(flow) = self
            .services
            .engine_api
            .get_flow_version_with_exact_blocks(token, data.flow_version_id())
            .await?
        else {
            info!(state = "LOOKUP_VERSION", "Flow version not found, skipping job");
            return Ok(());
        };

        let (execution_type, target_step, trigger_payload, resume_payload, tasks, steps) = match data {
            OneTimeJobData::Begin(begin) => (
                FlowExecutionType::Begin,
                flow.version.trigger.name.clone(),
                Some(begin.trigger_payload.clone()),
                None,
                0,
                Value::Null,
            ),
            OneTimeJobData::Resume(resume) => {
                let Some(run) = self.services.engine_api.get_run(token, &resume.run_id).await? else {
                    info!(state = "LOOKUP_VERSION", "Run not found, skipping resume");
                    return Ok(());
                };
                if run.status == RunStatus::Succeeded {
                    info!(state = "LOOKUP_VERSION", "Run already succeeded, skipping resume");
                    return Ok(());
                }
                let target = run
                    .paused_step_name
                    .clone()
                    .unwrap_or_else(|| flow.version.trigger.name.clone());
                (
                    FlowExecutionType::Resume,
                    target,
                    None,
                    Some(resume.resume_payload.clone()),
                    run.tasks,
                    run.steps,
                )
            }
        };

        let flow_version = self
            .services
            .blocks
            .lock_flow_version(token, &flow.version, &target_step)
            .await?;

        let input = ExecuteFlowInput {
            execution_type,
            flow_version,
            project_id: data.project_id().clone(),
            run_id: data.run_id().clone(),
            environment: data.environment(),
            server_url: self.services.config.server_url.clone(),
            engine_token: token.clone(),
            execution_correlation_id: correlation_id.to_string(),
            trigger_payload,
            resume_payload,
            tasks,
            steps,
        };
        info!(state = "INPUT_PREPARED", step = %target_step, "Invoking engine");

        match self.services.engine.execute_flow(&input, correlation_id).await? {
            EngineOutcome::Ok(result) if result.status != RunStatus::InternalError => {
                info!(state = "REPORTED_OK", status = ?result.status, "Flow executed");
                self.update_status(data, token, correlation_id, result.status, Some(result.tasks), None)
                    .await
            }
            EngineOutcome::Ok(result) => {
                let message = result
                    .error_message
                    .unwrap_or_else(|| "engine reported an internal error".to_string());
                info!(state = "REPORTED_INTERNAL_ERROR", error = %message, "Flow failed inside the engine");
                self.update_status(
                    data,
                    token,
                    correlation_id,
                    RunStatus::InternalError,
                    Some(result.tasks),
                    Some(message),
                )
                .await
            }
            EngineOutcome::Error(message) => {
                info!(state = "REPORTED_INTERNAL_ERROR", error = %message, "Engine returned an error");
                self.update_status(
                    data,
                    token,
                    correlation_id,
                    RunStatus::InternalError,
                    None,
                    Some(message),
                )
                .await
            }
        }
    }

    async fn report_failure(
        &self,
        data: &OneTimeJobData,
        token: &EngineToken,
        correlation_id: &ExecutionCorrelationId,
        error: WorkerError,
    ) -> WorkerResult<()> {
        if error.is_execution_timeout() {
            info!(state = "REPORTED_TIMEOUT", error = %error, "Flow execution timed out");
            return self
                .update_status(data, token, correlation_id, RunStatus::Timeout, None, None)
                .await;
        }

        self.services.exceptions.capture(
            &error,
            &ExceptionContext::new()
                .with_queue("ONE_TIME")
                .with_run_id(data.run_id().to_string())
                .with_correlation_id(correlation_id.to_string()),
        );
        info!(state = "REPORTED_INTERNAL_ERROR", error = %error, "Flow execution failed");
        self.update_status(
            data,
            token,
            correlation_id,
            RunStatus::InternalError,
            None,
            Some(error.to_string()),
        )
        .await
    }

    async fn update_status(
        &self,
        data: &OneTimeJobData,
        token: &EngineToken,
        correlation_id: &ExecutionCorrelationId,
        status: RunStatus,
        tasks: Option<u64>,
        error_message: Option<String>,
    ) -> WorkerResult<()> {
        let request = UpdateRunStatusRequest {
            run_id: data.run_id().clone(),
            project_id: data.project_id().clone(),
            status,
            execution_correlation_id: correlation_id.to_string(),
            tasks,
            error_message,
        };
        self.services.engine_api.update_run_status(token, &request).await
    }
}
