//! Test fixtures for cascade-worker tests.
//! An in-memory control plane, a scripted engine transport and helpers to
//! wire them into worker services.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cascade_core::{
    BlockMetadata, BlockType, EngineOperationType, EngineRequest, EngineToken, FlowId, FlowRun, FlowStatus,
    FlowVersion, FlowVersionId, PackageType, PolledJob, PopulatedFlow, ProjectId, QueueName, RunId, RunStatus,
};
use cascade_monitoring::{ExceptionContext, ExceptionSink};
use cascade_worker::api::*;
use cascade_worker::engine::{EngineTransport, TransportError};
use cascade_worker::heartbeat::WorkerHeartbeat;
use cascade_worker::{
    BlockResolver, EngineInvoker, EngineRunner, InMemoryLock, InvokerSettings, WorkerConfig, WorkerError,
    WorkerResult, WorkerServices,
};
use tracing_subscriber::{fmt, EnvFilter};

pub const TRIGGER_BLOCK: &str = "@cascade/block-schedule";
pub const ACTION_BLOCK: &str = "@cascade/block-slack";

/// Initialize test tracing
pub fn init_test_tracing() {
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env().add_directive("cascade_worker=debug".parse().unwrap()))
        .with_test_writer()
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Everything the fake control plane was asked to do, in order
#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    Heartbeat,
    SubmitPayloads(SubmitPayloadsRequest),
    ResumeRun(ResumeRunRequest),
    DeleteWebhookSimulation(DeleteWebhookSimulationRequest),
    SavePayloads(SavePayloadsRequest),
    SendWebhookUpdate(SendWebhookUpdateRequest),
    UpdateJob(UpdateJobRequest),
    UpdateFailureCount(UpdateFailureCountRequest),
    RemoveStaleJob(RemoveStaleJobRequest),
    UpdateRunStatus(UpdateRunStatusRequest),
    GetBlockMetadata { name: String, version: String },
    GetFile(String),
}

/// In-memory control plane implementing both API traits
#[derive(Default)]
pub struct FakeControlPlane {
    flows: Mutex<HashMap<FlowVersionId, PopulatedFlow>>,
    runs: Mutex<HashMap<RunId, FlowRun>>,
    blocks: Mutex<HashMap<(String, String), BlockMetadata>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    jobs: Mutex<VecDeque<PolledJob>>,
    calls: Mutex<Vec<ApiCall>>,
    pub fail_job_updates: AtomicBool,
    pub fail_polls: AtomicBool,
    /// Delay before a dequeued job is handed back, in milliseconds
    pub poll_delay_ms: AtomicU64,
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flow(self, flow: PopulatedFlow) -> Self {
        self.flows.lock().insert(flow.version.id.clone(), flow);
        self
    }

    pub fn with_run(self, run: FlowRun) -> Self {
        self.runs.lock().insert(run.id.clone(), run);
        self
    }

    pub fn with_block(self, requested: &str, metadata: BlockMetadata) -> Self {
        self.blocks
            .lock()
            .insert((metadata.name.clone(), requested.to_string()), metadata);
        self
    }

    pub fn with_file(self, id: &str, content: &[u8]) -> Self {
        self.files.lock().insert(id.to_string(), content.to_vec());
        self
    }

    /// Catalog entries for the blocks used by [`sample_flow`]
    pub fn with_sample_blocks(self) -> Self {
        self.with_block("^1.0.0", registry_block(TRIGGER_BLOCK, "1.2.0"))
            .with_block("~2.0.0", registry_block(ACTION_BLOCK, "2.0.3"))
    }

    pub fn push_job(&self, job: PolledJob) {
        self.jobs.lock().push_back(job);
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().clone()
    }

    pub fn run_status_updates(&self) -> Vec<UpdateRunStatusRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ApiCall::UpdateRunStatus(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn job_updates(&self) -> Vec<UpdateJobRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ApiCall::UpdateJob(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn submitted(&self) -> Vec<SubmitPayloadsRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ApiCall::SubmitPayloads(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn webhook_updates(&self) -> Vec<SendWebhookUpdateRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ApiCall::SendWebhookUpdate(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: ApiCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl WorkerApi for FakeControlPlane {
    async fn heartbeat(&self, _heartbeat: &WorkerHeartbeat) -> WorkerResult<()> {
        self.record(ApiCall::Heartbeat);
        Ok(())
    }

    async fn poll_job(&self, queue: QueueName) -> WorkerResult<Option<PolledJob>> {
        if self.fail_polls.load(Ordering::SeqCst) {
            return Err(WorkerError::Transport("connection refused".to_string()));
        }
        let job = {
            let mut jobs = self.jobs.lock();
            let position = jobs.iter().position(|job| job.queue_name == queue);
            position.and_then(|index| jobs.remove(index))
        };
        match job {
            Some(_) => {
                let delay = self.poll_delay_ms.load(Ordering::SeqCst);
                if delay > 0 {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
            }
            None => tokio::time::sleep(Duration::from_millis(5)).await,
        }
        Ok(job)
    }

    async fn submit_payloads(&self, request: &SubmitPayloadsRequest) -> WorkerResult<()> {
        self.record(ApiCall::SubmitPayloads(request.clone()));
        Ok(())
    }

    async fn resume_run(&self, request: &ResumeRunRequest) -> WorkerResult<()> {
        self.record(ApiCall::ResumeRun(request.clone()));
        Ok(())
    }

    async fn delete_webhook_simulation(&self, request: &DeleteWebhookSimulationRequest) -> WorkerResult<()> {
        self.record(ApiCall::DeleteWebhookSimulation(request.clone()));
        Ok(())
    }

    async fn save_payloads_as_sample_data(&self, request: &SavePayloadsRequest) -> WorkerResult<()> {
        self.record(ApiCall::SavePayloads(request.clone()));
        Ok(())
    }

    async fn send_webhook_update(&self, request: &SendWebhookUpdateRequest) -> WorkerResult<()> {
        self.record(ApiCall::SendWebhookUpdate(request.clone()));
        Ok(())
    }

    async fn update_job_status(&self, request: &UpdateJobRequest) -> WorkerResult<()> {
        self.record(ApiCall::UpdateJob(request.clone()));
        if self.fail_job_updates.load(Ordering::SeqCst) {
            return Err(WorkerError::ControlPlane {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        Ok(())
    }

    async fn update_failure_count(&self, request: &UpdateFailureCountRequest) -> WorkerResult<()> {
        self.record(ApiCall::UpdateFailureCount(request.clone()));
        Ok(())
    }

    async fn remove_stale_job(&self, request: &RemoveStaleJobRequest) -> WorkerResult<()> {
        self.record(ApiCall::RemoveStaleJob(request.clone()));
        Ok(())
    }
}

#[async_trait]
impl EngineApi for FakeControlPlane {
    async fn get_file(&self, _token: &EngineToken, file_id: &str) -> WorkerResult<Option<Vec<u8>>> {
        self.record(ApiCall::GetFile(file_id.to_string()));
        Ok(self.files.lock().get(file_id).cloned())
    }

    async fn get_run(&self, _token: &EngineToken, run_id: &RunId) -> WorkerResult<Option<FlowRun>> {
        Ok(self.runs.lock().get(run_id).cloned())
    }

    async fn update_run_status(&self, _token: &EngineToken, request: &UpdateRunStatusRequest) -> WorkerResult<()> {
        self.record(ApiCall::UpdateRunStatus(request.clone()));
        Ok(())
    }

    async fn get_block_metadata(
        &self,
        _token: &EngineToken,
        name: &str,
        version: &str,
    ) -> WorkerResult<Option<BlockMetadata>> {
        self.record(ApiCall::GetBlockMetadata {
            name: name.to_string(),
            version: version.to_string(),
        });
        Ok(self
            .blocks
            .lock()
            .get(&(name.to_string(), version.to_string()))
            .cloned())
    }

    async fn get_flow_version_with_exact_blocks(
        &self,
        _token: &EngineToken,
        flow_version_id: &FlowVersionId,
    ) -> WorkerResult<Option<PopulatedFlow>> {
        Ok(self.flows.lock().get(flow_version_id).cloned())
    }
}

type Handler = Box<dyn Fn(&EngineRequest) -> Result<Value, TransportError> + Send + Sync>;

/// Engine transport answering from a closure and recording every request
pub struct ScriptedTransport {
    handler: Handler,
    delay: Duration,
    requests: Mutex<Vec<EngineRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(handler: impl Fn(&EngineRequest) -> Result<Value, TransportError> + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Answer every request with `result`
    pub fn always(result: Value) -> Self {
        Self::new(move |_| Ok(result.clone()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<EngineRequest> {
        self.requests.lock().clone()
    }

    pub fn requests_of(&self, operation: EngineOperationType) -> Vec<EngineRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.operation_type == operation)
            .collect()
    }

    /// Most requests ever in progress at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineTransport for ScriptedTransport {
    async fn send(
        &self,
        request: &EngineRequest,
        _timeout: Duration,
        _correlation_id: &cascade_core::ExecutionCorrelationId,
    ) -> Result<Value, TransportError> {
        self.requests.lock().push(request.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let result = (self.handler)(request);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Exception sink remembering what it was given
#[derive(Default)]
pub struct RecordingExceptionSink {
    captured: Mutex<Vec<(String, ExceptionContext)>>,
}

impl RecordingExceptionSink {
    pub fn messages(&self) -> Vec<String> {
        self.captured.lock().iter().map(|(message, _)| message.clone()).collect()
    }

    pub fn contexts(&self) -> Vec<ExceptionContext> {
        self.captured.lock().iter().map(|(_, context)| context.clone()).collect()
    }
}

impl ExceptionSink for RecordingExceptionSink {
    fn capture(&self, error: &(dyn std::error::Error + 'static), context: &ExceptionContext) {
        self.captured.lock().push((error.to_string(), context.clone()));
    }
}

pub fn test_config() -> WorkerConfig {
    WorkerConfig {
        server_url: "http://api.local".to_string(),
        engine_url: "http://engine.local".to_string(),
        worker_token: "worker-secret".to_string(),
        flow_worker_concurrency: 1,
        scheduled_worker_concurrency: 1,
        flow_timeout_seconds: 5,
        trigger_timeout_seconds: 1,
        poll_failure_backoff_ms: 10,
        lock_safety_margin_seconds: 1,
        ..WorkerConfig::default()
    }
}

/// Worker services over the fakes, plus handles to inspect them
pub struct Harness {
    pub api: Arc<FakeControlPlane>,
    pub transport: Arc<ScriptedTransport>,
    pub exceptions: Arc<RecordingExceptionSink>,
    pub services: Arc<WorkerServices>,
}

pub fn harness(api: FakeControlPlane, transport: ScriptedTransport) -> Harness {
    let api = Arc::new(api);
    let transport = Arc::new(transport);
    let exceptions = Arc::new(RecordingExceptionSink::default());
    let config = test_config();

    let invoker = EngineInvoker::new(
        transport.clone(),
        InvokerSettings {
            flow_timeout: config.flow_timeout(),
            trigger_timeout: config.trigger_timeout(),
            cache_ttl: config.engine_cache_ttl(),
        },
    );

    let services = WorkerServices {
        config: Arc::new(config),
        worker_api: api.clone(),
        engine_api: api.clone(),
        engine: EngineRunner::new(Arc::new(invoker)),
        blocks: BlockResolver::new(api.clone()),
        lock: Arc::new(InMemoryLock::with_retry_interval(Duration::from_millis(2))),
        exceptions: exceptions.clone(),
    };

    Harness {
        api,
        transport,
        exceptions,
        services: Arc::new(services),
    }
}

pub fn token() -> EngineToken {
    EngineToken("engine-token".to_string())
}

pub fn registry_block(name: &str, version: &str) -> BlockMetadata {
    BlockMetadata {
        name: name.to_string(),
        version: version.to_string(),
        block_type: BlockType::Official,
        package_type: PackageType::Registry,
        archive_id: None,
        display_name: None,
    }
}

/// Trigger `^1.0.0` of [`TRIGGER_BLOCK`] followed by action `send` on `~2.0.0` of [`ACTION_BLOCK`]
pub fn sample_version(id: &str) -> FlowVersion {
    serde_json::from_value(json!({
        "id": id,
        "flowId": "flow-1",
        "displayName": "Notify on schedule",
        "valid": true,
        "trigger": {
            "name": "trigger",
            "type": "BLOCK_TRIGGER",
            "valid": true,
            "settings": {
                "blockName": TRIGGER_BLOCK,
                "blockVersion": "^1.0.0",
                "input": { "cron": "*/5 * * * *" }
            },
            "nextAction": {
                "name": "send",
                "type": "BLOCK_ACTION",
                "valid": true,
                "settings": {
                    "blockName": ACTION_BLOCK,
                    "blockVersion": "~2.0.0",
                    "input": { "channel": "#ops" }
                }
            }
        }
    }))
    .unwrap()
}

pub fn sample_flow(version_id: &str, status: FlowStatus, published: Option<&str>) -> PopulatedFlow {
    PopulatedFlow {
        id: FlowId("flow-1".to_string()),
        project_id: ProjectId("proj-1".to_string()),
        status,
        published_version_id: published.map(|id| FlowVersionId(id.to_string())),
        version: sample_version(version_id),
    }
}

pub fn paused_run(run_id: &str, paused_step: &str) -> FlowRun {
    FlowRun {
        id: RunId(run_id.to_string()),
        project_id: ProjectId("proj-1".to_string()),
        flow_version_id: FlowVersionId("fv-1".to_string()),
        status: RunStatus::Paused,
        tasks: 4,
        steps: json!({ "trigger": { "output": { "tick": 1 } } }),
        paused_step_name: Some(paused_step.to_string()),
    }
}

/// Block version a request's flow version pins for `step`
pub fn pinned_version(request: &EngineRequest, step: &str) -> Option<String> {
    let flow_version: FlowVersion =
        serde_json::from_value(request.engine_input.get("flowVersion")?.clone()).ok()?;
    flow_version.get_step(step)?.settings.block_version.clone()
}

/// Serialized step without its child links, for comparing one step at a time
pub fn step_json(version: &FlowVersion, step: &str) -> Value {
    let mut value = version
        .get_step(step)
        .map(|step| serde_json::to_value(step).unwrap())
        .unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        for child in ["nextAction", "firstLoopAction", "onSuccessAction", "onFailureAction"] {
            map.remove(child);
        }
    }
    value
}

/// Flow version sent in an engine request
pub fn requested_version(request: &EngineRequest) -> FlowVersion {
    serde_json::from_value(request.engine_input["flowVersion"].clone()).unwrap()
}

/// Poll `condition` until it holds or a second passes
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
