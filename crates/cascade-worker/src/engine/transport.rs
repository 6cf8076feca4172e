//! Network leg of an engine call.

use async_trait::async_trait;
use cascade_core::{EngineRequest, ExecutionCorrelationId};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::error::{WorkerError, WorkerResult};

/// Header carrying the correlation id to the engine
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Why a transport call produced no payload
#[derive(Debug, Error)]
pub enum TransportError {
    /// The client-side deadline elapsed
    #[error("engine request timed out after {0:?}")]
    Timeout(Duration),

    /// Anything else: connect failure, non-success status, unreadable body
    #[error("engine request failed: {0}")]
    Failed(String),
}

/// Sends one envelope to the engine and returns its unwrapped result payload
#[async_trait]
pub trait EngineTransport: Send + Sync {
    async fn send(
        &self,
        request: &EngineRequest,
        timeout: Duration,
        correlation_id: &ExecutionCorrelationId,
    ) -> Result<Value, TransportError>;
}

/// HTTP transport to the engine's single RPC endpoint
#[derive(Debug, Clone)]
pub struct HttpEngineTransport {
    endpoint: String,
    client: Client,
}

impl HttpEngineTransport {
    pub fn new(engine_url: &str) -> WorkerResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| WorkerError::Configuration(format!("Failed to create engine HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: format!("{}/v1/engine/execute", engine_url.trim_end_matches('/')),
            client,
        })
    }
}

#[async_trait]
impl EngineTransport for HttpEngineTransport {
    async fn send(
        &self,
        request: &EngineRequest,
        timeout: Duration,
        correlation_id: &ExecutionCorrelationId,
    ) -> Result<Value, TransportError> {
        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                TransportError::Timeout(timeout)
            } else {
                TransportError::Failed(e.to_string())
            }
        };

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(timeout)
            .header(CORRELATION_HEADER, correlation_id.as_str())
            .json(request)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Failed(format!("engine responded with {}", status)));
        }

        let body = response.text().await.map_err(classify)?;
        debug!(bytes = body.len(), "Engine responded");
        unwrap_body(&body)
    }
}

/// Parse a response body, unwrapping one level of JSON-in-a-string encoding
pub fn unwrap_body(body: &str) -> Result<Value, TransportError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| TransportError::Failed(format!("invalid engine response: {}", e)))?;

    match value {
        Value::String(inner) => Ok(serde_json::from_str(&inner).unwrap_or(Value::String(inner))),
        other => Ok(other),
    }
}
