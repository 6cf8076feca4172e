//! Job executors, one per job family.

pub mod flow;
pub mod repeating;
pub mod trigger;
pub mod webhook;

use cascade_monitoring::ExceptionSink;
use std::sync::Arc;

use crate::api::{EngineApi, WorkerApi};
use crate::blocks::BlockResolver;
use crate::config::WorkerConfig;
use crate::engine::EngineRunner;
use crate::lock::DistributedLock;

pub use flow::FlowJobExecutor;
pub use repeating::RepeatingJobExecutor;
pub use trigger::TriggerPayloadExtractor;
pub use webhook::WebhookJobExecutor;

/// Collaborators shared by every executor
#[derive(Clone)]
pub struct WorkerServices {
    pub config: Arc<WorkerConfig>,
    pub worker_api: Arc<dyn WorkerApi>,
    pub engine_api: Arc<dyn EngineApi>,
    pub engine: EngineRunner,
    pub blocks: BlockResolver,
    pub lock: Arc<dyn DistributedLock>,
    pub exceptions: Arc<dyn ExceptionSink>,
}
