//! Typed client for the control-plane API.
//!
//! Worker-scoped endpoints authenticate with the worker token recorded at
//! startup; engine-scoped endpoints use the token handed out with each job.

use async_trait::async_trait;
use cascade_core::{
    BlockMetadata, EngineToken, FlowId, FlowRun, FlowVersionId, JobId, JobStatus, PolledJob, PopulatedFlow,
    ProjectId, QueueName, RunEnvironment, RunId, RunStatus,
};
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::error::{WorkerError, WorkerResult};
use crate::heartbeat::WorkerHeartbeat;

/// Worker token shared between the client and the runtime that records it
#[derive(Debug, Clone, Default)]
pub struct WorkerCredentials {
    token: Arc<RwLock<Option<String>>>,
}

impl WorkerCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the worker token
    pub fn set(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    /// Current worker token
    pub fn get(&self) -> WorkerResult<String> {
        self.token
            .read()
            .clone()
            .ok_or_else(|| WorkerError::Configuration("Worker token not initialised".to_string()))
    }
}

/// Batch of trigger payloads to start as new runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitPayloadsRequest {
    pub flow_version_id: FlowVersionId,
    pub project_id: ProjectId,
    pub payloads: Vec<Value>,
    pub environment: RunEnvironment,
    pub execution_correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synchronous_handler_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeRunRequest {
    pub run_id: RunId,
    pub project_id: ProjectId,
    pub execution_correlation_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteWebhookSimulationRequest {
    pub flow_id: FlowId,
    pub project_id: ProjectId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavePayloadsRequest {
    pub flow_id: FlowId,
    pub project_id: ProjectId,
    pub payloads: Vec<Value>,
}

/// HTTP response handed to a waiting synchronous webhook caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub status: u16,
    #[serde(default)]
    pub body: Value,
    #[serde(default)]
    pub headers: serde_json::Map<String, Value>,
}

impl WebhookResponse {
    pub fn with_status(status: StatusCode) -> Self {
        Self {
            status: status.as_u16(),
            body: Value::Null,
            headers: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendWebhookUpdateRequest {
    pub request_id: String,
    pub synchronous_handler_id: String,
    pub response: WebhookResponse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateJobRequest {
    pub job_id: JobId,
    pub queue_name: QueueName,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Trigger health signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFailureCountRequest {
    pub flow_id: FlowId,
    pub project_id: ProjectId,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveStaleJobRequest {
    pub flow_id: FlowId,
    pub flow_version_id: FlowVersionId,
    pub project_id: ProjectId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRunStatusRequest {
    pub run_id: RunId,
    pub project_id: ProjectId,
    pub status: RunStatus,
    pub execution_correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Endpoints authenticated with the worker token
#[async_trait]
pub trait WorkerApi: Send + Sync {
    /// Report liveness and host telemetry
    async fn heartbeat(&self, heartbeat: &WorkerHeartbeat) -> WorkerResult<()>;

    /// Take at most one job from a queue; backs off and returns `None` on failure
    async fn poll_job(&self, queue: QueueName) -> WorkerResult<Option<PolledJob>>;

    /// Start one run per payload
    async fn submit_payloads(&self, request: &SubmitPayloadsRequest) -> WorkerResult<()>;

    /// Re-enqueue a paused run
    async fn resume_run(&self, request: &ResumeRunRequest) -> WorkerResult<()>;

    /// Tear down a webhook simulation once a sample arrived
    async fn delete_webhook_simulation(&self, request: &DeleteWebhookSimulationRequest) -> WorkerResult<()>;

    /// Store trigger payloads as the trigger step's sample data
    async fn save_payloads_as_sample_data(&self, request: &SavePayloadsRequest) -> WorkerResult<()>;

    /// Answer a caller waiting synchronously on a webhook
    async fn send_webhook_update(&self, request: &SendWebhookUpdateRequest) -> WorkerResult<()>;

    /// Mark a queue job completed or failed
    async fn update_job_status(&self, request: &UpdateJobRequest) -> WorkerResult<()>;

    /// Report a trigger success or failure
    async fn update_failure_count(&self, request: &UpdateFailureCountRequest) -> WorkerResult<()>;

    /// Retire a recurring job whose flow version is no longer published
    async fn remove_stale_job(&self, request: &RemoveStaleJobRequest) -> WorkerResult<()>;
}

/// Endpoints authenticated with a job's engine token
#[async_trait]
pub trait EngineApi: Send + Sync {
    /// Raw content of a stored file
    async fn get_file(&self, token: &EngineToken, file_id: &str) -> WorkerResult<Option<Vec<u8>>>;

    /// Current state of a run
    async fn get_run(&self, token: &EngineToken, run_id: &RunId) -> WorkerResult<Option<FlowRun>>;

    /// Report a run status transition
    async fn update_run_status(&self, token: &EngineToken, request: &UpdateRunStatusRequest) -> WorkerResult<()>;

    /// Catalog metadata for a block, resolving version ranges to an exact version
    async fn get_block_metadata(
        &self,
        token: &EngineToken,
        name: &str,
        version: &str,
    ) -> WorkerResult<Option<BlockMetadata>>;

    /// Flow with the given version, every block step pinned server-side
    async fn get_flow_version_with_exact_blocks(
        &self,
        token: &EngineToken,
        flow_version_id: &FlowVersionId,
    ) -> WorkerResult<Option<PopulatedFlow>>;
}

/// HTTP implementation of [`WorkerApi`] and [`EngineApi`]
#[derive(Debug, Clone)]
pub struct ServerApiClient {
    base_url: String,
    client: Client,
    credentials: WorkerCredentials,
    poll_failure_backoff: Duration,
}

impl ServerApiClient {
    /// Creates a new client for the control plane at `base_url`
    pub fn new(
        base_url: impl Into<String>,
        http_timeout: Duration,
        poll_failure_backoff: Duration,
        credentials: WorkerCredentials,
    ) -> WorkerResult<Self> {
        let client = Client::builder()
            .timeout(http_timeout)
            .build()
            .map_err(|e| WorkerError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            credentials,
            poll_failure_backoff,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn worker_request(&self, builder: RequestBuilder) -> WorkerResult<RequestBuilder> {
        Ok(builder.bearer_auth(self.credentials.get()?))
    }

    async fn post_worker<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> WorkerResult<()> {
        let request = self.worker_request(self.client.post(self.url(path)))?;
        let response = request.json(body).send().await?;
        expect_success(response).await
    }

    async fn post_engine<B: Serialize + ?Sized>(&self, token: &EngineToken, path: &str, body: &B) -> WorkerResult<()> {
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(token.as_str())
            .json(body)
            .send()
            .await?;
        expect_success(response).await
    }

    async fn try_poll(&self, queue: QueueName) -> WorkerResult<Option<PolledJob>> {
        let request = self.worker_request(self.client.get(self.url("/v1/workers/poll")))?;
        let response = request.query(&[("queueName", queue.as_str())]).send().await?;
        read_optional(response).await
    }
}

async fn expect_success(response: Response) -> WorkerResult<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| format!("HTTP error: {}", status));
    Err(WorkerError::ControlPlane {
        status: status.as_u16(),
        message,
    })
}

/// 404, 204 and a `null` body all mean "nothing there"
async fn read_optional<T: DeserializeOwned>(response: Response) -> WorkerResult<Option<T>> {
    match response.status() {
        StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => Ok(None),
        status if status.is_success() => {
            let body = response.bytes().await?;
            if body.is_empty() {
                return Ok(None);
            }
            Ok(serde_json::from_slice::<Option<T>>(&body)?)
        }
        status => {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| format!("HTTP error: {}", status));
            Err(WorkerError::ControlPlane {
                status: status.as_u16(),
                message,
            })
        }
    }
}

#[async_trait]
impl WorkerApi for ServerApiClient {
    #[instrument(skip(self, heartbeat))]
    async fn heartbeat(&self, heartbeat: &WorkerHeartbeat) -> WorkerResult<()> {
        self.post_worker("/v1/worker-machines/heartbeat", heartbeat).await
    }

    #[instrument(skip(self), fields(queue = %queue))]
    async fn poll_job(&self, queue: QueueName) -> WorkerResult<Option<PolledJob>> {
        match self.try_poll(queue).await {
            Ok(job) => Ok(job),
            Err(e) => {
                warn!(error = %e, backoff_ms = self.poll_failure_backoff.as_millis() as u64, "Failed to poll job");
                tokio::time::sleep(self.poll_failure_backoff).await;
                Ok(None)
            }
        }
    }

    #[instrument(skip(self, request), fields(flow_version_id = %request.flow_version_id, payloads = request.payloads.len()))]
    async fn submit_payloads(&self, request: &SubmitPayloadsRequest) -> WorkerResult<()> {
        self.post_worker("/v1/workers/submit-payloads", request).await
    }

    #[instrument(skip(self, request), fields(run_id = %request.run_id))]
    async fn resume_run(&self, request: &ResumeRunRequest) -> WorkerResult<()> {
        self.post_worker("/v1/workers/resume-run", request).await
    }

    #[instrument(skip(self, request), fields(flow_id = %request.flow_id))]
    async fn delete_webhook_simulation(&self, request: &DeleteWebhookSimulationRequest) -> WorkerResult<()> {
        self.post_worker("/v1/workers/delete-webhook-simulation", request).await
    }

    #[instrument(skip(self, request), fields(flow_id = %request.flow_id))]
    async fn save_payloads_as_sample_data(&self, request: &SavePayloadsRequest) -> WorkerResult<()> {
        self.post_worker("/v1/workers/save-payloads", request).await
    }

    #[instrument(skip(self, request), fields(request_id = %request.request_id, status = request.response.status))]
    async fn send_webhook_update(&self, request: &SendWebhookUpdateRequest) -> WorkerResult<()> {
        self.post_worker("/v1/workers/send-webhook-update", request).await
    }

    #[instrument(skip(self, request), fields(job_id = %request.job_id, status = ?request.status))]
    async fn update_job_status(&self, request: &UpdateJobRequest) -> WorkerResult<()> {
        self.post_worker("/v1/workers/update-job", request).await
    }

    #[instrument(skip(self, request), fields(flow_id = %request.flow_id, success = request.success))]
    async fn update_failure_count(&self, request: &UpdateFailureCountRequest) -> WorkerResult<()> {
        self.post_worker("/v1/workers/update-failure-count", request).await
    }

    #[instrument(skip(self, request), fields(flow_version_id = %request.flow_version_id))]
    async fn remove_stale_job(&self, request: &RemoveStaleJobRequest) -> WorkerResult<()> {
        self.post_worker("/v1/workers/remove-stale-job", request).await
    }
}

#[async_trait]
impl EngineApi for ServerApiClient {
    #[instrument(skip(self, token))]
    async fn get_file(&self, token: &EngineToken, file_id: &str) -> WorkerResult<Option<Vec<u8>>> {
        debug!("Fetching file content");

        let response = self
            .client
            .get(self.url(&format!("/v1/engine/files/{}", file_id)))
            .bearer_auth(token.as_str())
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.bytes().await?.to_vec())),
            status => Err(WorkerError::ControlPlane {
                status: status.as_u16(),
                message: response
                    .text()
                    .await
                    .unwrap_or_else(|_| format!("HTTP error: {}", status)),
            }),
        }
    }

    #[instrument(skip(self, token), fields(run_id = %run_id))]
    async fn get_run(&self, token: &EngineToken, run_id: &RunId) -> WorkerResult<Option<FlowRun>> {
        let response = self
            .client
            .get(self.url(&format!("/v1/engine/runs/{}", run_id)))
            .bearer_auth(token.as_str())
            .send()
            .await?;
        read_optional(response).await
    }

    #[instrument(skip(self, token, request), fields(run_id = %request.run_id, status = ?request.status))]
    async fn update_run_status(&self, token: &EngineToken, request: &UpdateRunStatusRequest) -> WorkerResult<()> {
        self.post_engine(token, "/v1/engine/update-run", request).await
    }

    #[instrument(skip(self, token))]
    async fn get_block_metadata(
        &self,
        token: &EngineToken,
        name: &str,
        version: &str,
    ) -> WorkerResult<Option<BlockMetadata>> {
        let response = self
            .client
            .get(self.url("/v1/engine/blocks"))
            .bearer_auth(token.as_str())
            .query(&[("name", name), ("version", version)])
            .send()
            .await?;
        read_optional(response).await
    }

    #[instrument(skip(self, token), fields(flow_version_id = %flow_version_id))]
    async fn get_flow_version_with_exact_blocks(
        &self,
        token: &EngineToken,
        flow_version_id: &FlowVersionId,
    ) -> WorkerResult<Option<PopulatedFlow>> {
        let response = self
            .client
            .get(self.url("/v1/engine/flows"))
            .bearer_auth(token.as_str())
            .query(&[("flowVersionId", flow_version_id.0.as_str())])
            .send()
            .await?;
        read_optional(response).await
    }
}
