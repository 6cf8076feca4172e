//! Worker metrics, recorded through the `metrics` facade.
//!
//! No exporter is installed here; without a recorder every call is a no-op.

use metrics::increment_counter;

/// Counters emitted by the worker
pub struct WorkerMetrics;

impl WorkerMetrics {
    /// A job was polled and dispatched
    pub fn record_job_consumed(queue: &str) {
        increment_counter!("cascade_worker_jobs_consumed_total", "queue" => queue.to_string());
    }

    /// A job failed at the consumer boundary
    pub fn record_job_failed(queue: &str) {
        increment_counter!("cascade_worker_jobs_failed_total", "queue" => queue.to_string());
    }

    /// One engine invocation finished with the given status
    pub fn record_engine_call(operation: &str, status: &str) {
        increment_counter!(
            "cascade_worker_engine_calls_total",
            "operation" => operation.to_string(),
            "status" => status.to_string()
        );
    }

    /// Engine response served from the cache
    pub fn record_cache_hit(operation: &str) {
        increment_counter!("cascade_worker_engine_cache_hits_total", "operation" => operation.to_string());
    }

    /// Engine response not found in the cache
    pub fn record_cache_miss(operation: &str) {
        increment_counter!("cascade_worker_engine_cache_misses_total", "operation" => operation.to_string());
    }

    /// Trigger payload extraction outcome
    pub fn record_trigger_extraction(success: bool) {
        let outcome = if success { "success" } else { "failure" };
        increment_counter!("cascade_worker_trigger_extractions_total", "outcome" => outcome);
    }

    /// Exception reported to the sink
    pub fn record_exception() {
        increment_counter!("cascade_worker_exceptions_total");
    }
}
