//! Process-wide exception sink.

use tracing::error;

use crate::metrics::WorkerMetrics;

/// Where an unexpected failure happened
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExceptionContext {
    pub queue: Option<String>,
    pub job_id: Option<String>,
    pub run_id: Option<String>,
    pub correlation_id: Option<String>,
}

impl ExceptionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// Receives internal/unexpected errors for observability
pub trait ExceptionSink: Send + Sync {
    /// Report one error
    fn capture(&self, error: &(dyn std::error::Error + 'static), context: &ExceptionContext);
}

/// Sink that logs at `error` level and bumps a counter
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingExceptionSink;

impl ExceptionSink for TracingExceptionSink {
    fn capture(&self, err: &(dyn std::error::Error + 'static), context: &ExceptionContext) {
        WorkerMetrics::record_exception();
        error!(
            error = %err,
            source = ?err.source().map(|s| s.to_string()),
            queue = ?context.queue,
            job_id = ?context.job_id,
            run_id = ?context.run_id,
            correlation_id = ?context.correlation_id,
            "Unhandled worker exception"
        );
    }
}
