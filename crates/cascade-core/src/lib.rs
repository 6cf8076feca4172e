//!
//! Cascade Core - Domain model for the Cascade flow-execution worker
//!
//! This crate defines the jobs a worker pulls from the control plane, the
//! flow versions and blocks it pins before execution, run statuses, and the
//! envelopes exchanged with the remote execution engine. It performs no I/O.

#![forbid(unsafe_code)]

/// Domain layer - jobs, flows, blocks and runs
pub mod domain;

/// Remote engine operations and responses
pub mod engine;

/// Error types
pub mod error;

pub use error::CoreError;

pub use domain::block::{BlockMetadata, BlockPackage, BlockRef, BlockType, PackageType};
pub use domain::flow_version::{FlowStatus, FlowVersion, PopulatedFlow, Step, StepSettings, StepType};
pub use domain::ids::{
    EngineToken, ExecutionCorrelationId, FlowId, FlowVersionId, JobId, ProjectId, RunId,
};
pub use domain::job::{
    BeginJobData, DelayedFlowJobData, Job, JobData, JobStatus, OneTimeJobData, PolledJob, QueueName,
    RepeatingJobData, ResumeJobData, RunEnvironment, ScheduledFlowJobData, WebhookJobData,
};
pub use domain::run::{FlowRun, RunStatus};
pub use engine::{
    EngineOperationType, EngineRequest, EngineResponse, EngineResponseStatus,
};
