//! Engine invocation: timeout budgets, response caching, single-flight
//! deduplication and failure classification.

pub mod cache;
pub mod runner;
pub mod single_flight;
pub mod transport;

use cascade_core::{EngineOperationType, EngineRequest, EngineResponse, ExecutionCorrelationId};
use cascade_monitoring::WorkerMetrics;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

pub use cache::{cache_key, ResponseCache};
pub use runner::{EngineOutcome, EngineRunner};
pub use single_flight::SingleFlight;
pub use transport::{EngineTransport, HttpEngineTransport, TransportError};

/// Message returned for every non-timeout transport failure
pub const ENGINE_FAILURE_MESSAGE: &str = "engine request failed";

/// Timeout budgets and cache lifetime for the invoker
#[derive(Debug, Clone, Copy)]
pub struct InvokerSettings {
    pub flow_timeout: Duration,
    pub trigger_timeout: Duration,
    pub cache_ttl: Duration,
}

/// Performs exactly one logical engine call per invocation
pub struct EngineInvoker {
    transport: Arc<dyn EngineTransport>,
    cache: Arc<ResponseCache>,
    single_flight: SingleFlight,
    settings: InvokerSettings,
}

impl EngineInvoker {
    pub fn new(transport: Arc<dyn EngineTransport>, settings: InvokerSettings) -> Self {
        Self {
            transport,
            cache: Arc::new(ResponseCache::new(settings.cache_ttl)),
            single_flight: SingleFlight::new(),
            settings,
        }
    }

    /// Budget for one call of the given kind
    pub fn timeout_for(&self, operation: EngineOperationType) -> Duration {
        if operation.uses_flow_timeout() {
            self.settings.flow_timeout
        } else {
            self.settings.trigger_timeout
        }
    }

    /// The response cache
    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Invoke the engine. Always resolves to an OK, ERROR or TIMEOUT response.
    #[instrument(skip_all, fields(operation = %operation, correlation_id = %correlation_id))]
    pub async fn invoke(
        &self,
        operation: EngineOperationType,
        engine_input: Value,
        correlation_id: &ExecutionCorrelationId,
    ) -> EngineResponse {
        let timeout = self.timeout_for(operation);
        let request = EngineRequest {
            operation_type: operation,
            engine_input,
        };

        let response = if operation.is_cacheable() {
            self.invoke_cached(request, timeout, correlation_id).await
        } else {
            call(self.transport.as_ref(), &request, timeout, correlation_id).await
        };

        WorkerMetrics::record_engine_call(operation.as_str(), response.status.as_str());
        response
    }

    async fn invoke_cached(
        &self,
        request: EngineRequest,
        timeout: Duration,
        correlation_id: &ExecutionCorrelationId,
    ) -> EngineResponse {
        let operation = request.operation_type;
        let key = cache_key(&request);

        if let Some(cached) = self.cache.get(&key) {
            debug!(cache_key = %key, "Engine cache hit");
            WorkerMetrics::record_cache_hit(operation.as_str());
            return EngineResponse::ok(cached);
        }
        WorkerMetrics::record_cache_miss(operation.as_str());

        let transport = Arc::clone(&self.transport);
        let cache = Arc::clone(&self.cache);
        let correlation_id = correlation_id.clone();
        let flight_key = key.clone();

        self.single_flight
            .run(flight_key, move || async move {
                // another caller may have filled the entry while we queued
                if let Some(cached) = cache.get(&key) {
                    return EngineResponse::ok(cached);
                }

                let response = call(transport.as_ref(), &request, timeout, &correlation_id).await;
                if let (true, Some(result)) = (response.is_ok(), response.result.as_ref()) {
                    cache.insert(key, result.clone());
                }
                response
            })
            .await
    }
}

async fn call(
    transport: &dyn EngineTransport,
    request: &EngineRequest,
    timeout: Duration,
    correlation_id: &ExecutionCorrelationId,
) -> EngineResponse {
    match transport.send(request, timeout, correlation_id).await {
        Ok(result) => EngineResponse::ok(result),
        Err(TransportError::Timeout(elapsed)) => {
            warn!(
                operation = %request.operation_type,
                timeout_ms = elapsed.as_millis() as u64,
                "Engine request timed out"
            );
            EngineResponse::timeout()
        }
        Err(e) => {
            error!(operation = %request.operation_type, error = %e, "Engine request failed");
            EngineResponse::error(ENGINE_FAILURE_MESSAGE)
        }
    }
}
