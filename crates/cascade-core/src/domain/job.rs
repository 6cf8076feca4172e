//! Queue jobs and their discriminated payloads.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::ids::{EngineToken, FlowId, FlowVersionId, JobId, ProjectId, RunId};
use crate::CoreError;

/// Named queue a job is pulled from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueName {
    /// Flow begin/resume work
    OneTime,
    /// Recurring trigger polls, delayed resumes and webhook renewals
    Scheduled,
    /// Incoming webhook deliveries
    Webhook,
}

impl QueueName {
    /// All queues a worker consumes
    pub const ALL: [QueueName; 3] = [QueueName::OneTime, QueueName::Scheduled, QueueName::Webhook];

    /// Wire name of the queue
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::OneTime => "ONE_TIME",
            QueueName::Scheduled => "SCHEDULED",
            QueueName::Webhook => "WEBHOOK",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final job status reported back to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Job handled
    Completed,
    /// Job handling failed
    Failed,
}

/// Environment a run executes in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunEnvironment {
    /// Published flow triggered for real
    #[default]
    Production,
    /// Test run started from the editor
    Testing,
}

/// Job exactly as returned by the poll endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolledJob {
    /// Queue-assigned id
    pub id: JobId,
    /// Queue the job came from
    pub queue_name: QueueName,
    /// Token scoping engine-facing calls for this job
    pub engine_token: EngineToken,
    /// Undecoded payload
    pub data: Value,
}

/// A decoded unit of work
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// Queue-assigned id
    pub id: JobId,
    /// Queue the job came from
    pub queue_name: QueueName,
    /// Token scoping engine-facing calls for this job
    pub engine_token: EngineToken,
    /// Decoded payload
    pub data: JobData,
}

impl Job {
    /// Decode a polled job's payload according to its queue
    pub fn from_polled(polled: PolledJob) -> Result<Job, CoreError> {
        let queue = polled.queue_name;
        let data = match queue {
            QueueName::OneTime => JobData::OneTime(decode(queue, polled.data)?),
            QueueName::Scheduled => JobData::Repeating(decode(queue, polled.data)?),
            QueueName::Webhook => JobData::Webhook(decode(queue, polled.data)?),
        };
        Ok(Job {
            id: polled.id,
            queue_name: queue,
            engine_token: polled.engine_token,
            data,
        })
    }
}

fn decode<T: DeserializeOwned>(queue: QueueName, data: Value) -> Result<T, CoreError> {
    serde_json::from_value(data).map_err(|e| CoreError::InvalidJobPayload(format!("{}: {}", queue, e)))
}

/// Payload of a job, one variant per queue
#[derive(Debug, Clone, PartialEq)]
pub enum JobData {
    /// ONE_TIME queue
    OneTime(OneTimeJobData),
    /// SCHEDULED queue
    Repeating(RepeatingJobData),
    /// WEBHOOK queue
    Webhook(WebhookJobData),
}

/// Start a new run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginJobData {
    pub run_id: RunId,
    pub project_id: ProjectId,
    pub flow_version_id: FlowVersionId,
    #[serde(default)]
    pub environment: RunEnvironment,
    #[serde(default)]
    pub trigger_payload: Value,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub synchronous_handler_id: Option<String>,
}

/// Re-enter a paused run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeJobData {
    pub run_id: RunId,
    pub project_id: ProjectId,
    pub flow_version_id: FlowVersionId,
    #[serde(default)]
    pub environment: RunEnvironment,
    #[serde(default)]
    pub resume_payload: Value,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub synchronous_handler_id: Option<String>,
}

/// ONE_TIME payload, discriminated by `executionType`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "executionType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OneTimeJobData {
    Begin(BeginJobData),
    Resume(ResumeJobData),
}

impl OneTimeJobData {
    pub fn run_id(&self) -> &RunId {
        match self {
            OneTimeJobData::Begin(data) => &data.run_id,
            OneTimeJobData::Resume(data) => &data.run_id,
        }
    }

    pub fn project_id(&self) -> &ProjectId {
        match self {
            OneTimeJobData::Begin(data) => &data.project_id,
            OneTimeJobData::Resume(data) => &data.project_id,
        }
    }

    pub fn flow_version_id(&self) -> &FlowVersionId {
        match self {
            OneTimeJobData::Begin(data) => &data.flow_version_id,
            OneTimeJobData::Resume(data) => &data.flow_version_id,
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            OneTimeJobData::Begin(data) => data.request_id.as_deref(),
            OneTimeJobData::Resume(data) => data.request_id.as_deref(),
        }
    }

    pub fn environment(&self) -> RunEnvironment {
        match self {
            OneTimeJobData::Begin(data) => data.environment,
            OneTimeJobData::Resume(data) => data.environment,
        }
    }
}

/// Identifies the flow version a recurring job belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledFlowJobData {
    pub flow_version_id: FlowVersionId,
    pub project_id: ProjectId,
    pub flow_id: FlowId,
}

/// Wake a run that scheduled its own resumption
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayedFlowJobData {
    pub flow_version_id: FlowVersionId,
    pub project_id: ProjectId,
    pub flow_id: FlowId,
    pub run_id: RunId,
}

/// SCHEDULED payload, discriminated by `jobType`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "jobType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepeatingJobData {
    /// Poll the trigger for new payloads
    ExecuteTrigger(ScheduledFlowJobData),
    /// Resume a paused run
    DelayedFlow(DelayedFlowJobData),
    /// Renew an upstream webhook subscription
    RenewWebhook(ScheduledFlowJobData),
}

impl RepeatingJobData {
    pub fn flow_version_id(&self) -> &FlowVersionId {
        match self {
            RepeatingJobData::ExecuteTrigger(data) | RepeatingJobData::RenewWebhook(data) => &data.flow_version_id,
            RepeatingJobData::DelayedFlow(data) => &data.flow_version_id,
        }
    }

    pub fn project_id(&self) -> &ProjectId {
        match self {
            RepeatingJobData::ExecuteTrigger(data) | RepeatingJobData::RenewWebhook(data) => &data.project_id,
            RepeatingJobData::DelayedFlow(data) => &data.project_id,
        }
    }

    pub fn flow_id(&self) -> &FlowId {
        match self {
            RepeatingJobData::ExecuteTrigger(data) | RepeatingJobData::RenewWebhook(data) => &data.flow_id,
            RepeatingJobData::DelayedFlow(data) => &data.flow_id,
        }
    }

    /// Whether the job is only valid for the flow's published version
    pub fn requires_published_version(&self) -> bool {
        matches!(
            self,
            RepeatingJobData::ExecuteTrigger(_) | RepeatingJobData::RenewWebhook(_)
        )
    }

    /// Wire name of the job type
    pub fn job_type(&self) -> &'static str {
        match self {
            RepeatingJobData::ExecuteTrigger(_) => "EXECUTE_TRIGGER",
            RepeatingJobData::DelayedFlow(_) => "DELAYED_FLOW",
            RepeatingJobData::RenewWebhook(_) => "RENEW_WEBHOOK",
        }
    }
}

/// WEBHOOK payload: one incoming webhook delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookJobData {
    pub request_id: String,
    pub flow_id: FlowId,
    pub flow_version_id: FlowVersionId,
    pub project_id: ProjectId,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub simulate: bool,
    #[serde(default)]
    pub save_sample_data: bool,
    #[serde(default)]
    pub synchronous_handler_id: Option<String>,
}
