//! Queue consumption: polling loops, dispatch and job completion.

use cascade_core::{Job, JobData, JobStatus, QueueName};
use cascade_monitoring::{ExceptionContext, LogExt, WorkerMetrics};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::api::{UpdateJobRequest, WorkerCredentials};
use crate::error::WorkerResult;
use crate::executors::{FlowJobExecutor, RepeatingJobExecutor, WebhookJobExecutor, WorkerServices};
use crate::heartbeat::spawn_heartbeat;

/// Routes a decoded job to the executor for its queue
pub struct JobDispatcher {
    flow: FlowJobExecutor,
    repeating: RepeatingJobExecutor,
    webhook: WebhookJobExecutor,
}

impl JobDispatcher {
    pub fn new(services: Arc<WorkerServices>) -> Self {
        Self {
            flow: FlowJobExecutor::new(Arc::clone(&services)),
            repeating: RepeatingJobExecutor::new(Arc::clone(&services)),
            webhook: WebhookJobExecutor::new(services),
        }
    }

    pub async fn dispatch(&self, job: &Job) -> WorkerResult<()> {
        match &job.data {
            JobData::OneTime(data) => self.flow.execute(data, &job.engine_token).await,
            JobData::Repeating(data) => self.repeating.execute(data, &job.engine_token).await,
            JobData::Webhook(data) => self.webhook.execute(data, &job.engine_token).await,
        }
    }
}

/// Owns the consumer loops and the heartbeat of one worker process
pub struct WorkerRuntime {
    services: Arc<WorkerServices>,
    credentials: WorkerCredentials,
    dispatcher: Arc<JobDispatcher>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerRuntime {
    pub fn new(services: Arc<WorkerServices>, credentials: WorkerCredentials) -> Self {
        Self {
            dispatcher: Arc::new(JobDispatcher::new(Arc::clone(&services))),
            services,
            credentials,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Record the worker token and start heartbeating
    pub fn init(&self, worker_token: impl Into<String>) {
        self.credentials.set(worker_token);

        let mut props = BTreeMap::new();
        props.insert("version".to_string(), env!("CARGO_PKG_VERSION").to_string());
        props.insert(
            "flowWorkerConcurrency".to_string(),
            self.services.config.flow_worker_concurrency.to_string(),
        );
        props.insert(
            "scheduledWorkerConcurrency".to_string(),
            self.services.config.scheduled_worker_concurrency.to_string(),
        );

        let handle = spawn_heartbeat(
            Arc::clone(&self.services.worker_api),
            self.services.config.heartbeat_interval(),
            props,
            self.cancel.child_token(),
        );
        self.tasks.lock().push(handle);
        info!("Worker initialized");
    }

    /// Spawn the consumer loops for every queue
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        for queue in QueueName::ALL {
            let consumers = match queue {
                QueueName::OneTime | QueueName::Webhook => self.services.config.flow_worker_concurrency,
                QueueName::Scheduled => self.services.config.scheduled_worker_concurrency,
            };
            for index in 0..consumers {
                let consumer = QueueConsumer {
                    queue,
                    index,
                    services: Arc::clone(&self.services),
                    dispatcher: Arc::clone(&self.dispatcher),
                    cancel: self.cancel.child_token(),
                };
                tasks.push(tokio::spawn(consumer.run()));
            }
            info!(queue = %queue, consumers, "Started queue consumers");
        }
    }

    /// Stop polling; in-flight jobs finish on their own
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Close and wait for every loop to exit
    pub async fn shutdown(&self) {
        self.close();
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Worker task ended abnormally");
            }
        }
        info!("Worker stopped");
    }
}

/// One polling loop bound to a queue
struct QueueConsumer {
    queue: QueueName,
    index: usize,
    services: Arc<WorkerServices>,
    dispatcher: Arc<JobDispatcher>,
    cancel: CancellationToken,
}

impl QueueConsumer {
    async fn run(self) {
        debug!(queue = %self.queue, index = self.index, "Consumer started");
        while !self.cancel.is_cancelled() {
            // a poll in flight runs to completion so a dequeued job is always reported
            match self.services.worker_api.poll_job(self.queue).await {
                Ok(Some(job)) => match Job::from_polled(job.clone()) {
                    Ok(job) => self.consume(job).await,
                    Err(e) => {
                        error!(queue = %self.queue, job_id = %job.id, error = %e, "Discarding undecodable job");
                        WorkerMetrics::record_job_failed(self.queue.as_str());
                        self.services.exceptions.capture(
                            &e,
                            &ExceptionContext::new()
                                .with_queue(self.queue.as_str())
                                .with_job_id(job.id.to_string()),
                        );
                        self.complete(&job.id, JobStatus::Failed, Some(e.to_string())).await;
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    warn!(queue = %self.queue, error = %e, "Poll failed");
                    tokio::time::sleep(self.services.config.poll_failure_backoff()).await;
                }
            }
        }
        debug!(queue = %self.queue, index = self.index, "Consumer stopped");
    }

    #[instrument(skip_all, fields(queue = %self.queue, job_id = %job.id))]
    async fn consume(&self, job: Job) {
        WorkerMetrics::record_job_consumed(self.queue.as_str());

        match self.dispatcher.dispatch(&job).await {
            Ok(()) => {
                debug!("Job completed");
                // ONE_TIME jobs report through the run status instead
                if job.queue_name != QueueName::OneTime {
                    self.complete(&job.id, JobStatus::Completed, None).await;
                }
            }
            Err(e) => {
                error!(error = %e, "Job failed");
                WorkerMetrics::record_job_failed(self.queue.as_str());
                self.services.exceptions.capture(
                    &e,
                    &ExceptionContext::new()
                        .with_queue(self.queue.as_str())
                        .with_job_id(job.id.to_string()),
                );
                self.complete(&job.id, JobStatus::Failed, Some(e.to_string())).await;
            }
        }
    }

    async fn complete(&self, job_id: &cascade_core::JobId, status: JobStatus, message: Option<String>) {
        let request = UpdateJobRequest {
            job_id: job_id.clone(),
            queue_name: self.queue,
            status,
            message,
        };
        let _ = self
            .services
            .worker_api
            .update_job_status(&request)
            .await
            .log_err("Failed to update job status");
    }
}
