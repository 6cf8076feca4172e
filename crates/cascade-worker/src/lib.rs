//! Cascade Worker - polls the control plane for jobs and executes them on a
//! remote engine.
//!
//! This crate wires the control-plane client, the engine invoker, block
//! resolution, the run lock and the per-queue executors into a [`WorkerRuntime`].

#![forbid(unsafe_code)]

use cascade_monitoring::TracingExceptionSink;
use std::sync::Arc;
use tracing::info;

/// Control-plane client
pub mod api;

/// Block version resolution
pub mod blocks;

/// Configuration module
pub mod config;

/// Queue consumers and the worker runtime
pub mod consumer;

/// Engine invocation
pub mod engine;

/// Error module
pub mod error;

/// Job executors
pub mod executors;

/// Worker heartbeat
pub mod heartbeat;

/// Run locks
pub mod lock;

pub use api::{EngineApi, ServerApiClient, WorkerApi, WorkerCredentials};
pub use blocks::BlockResolver;
pub use config::WorkerConfig;
pub use consumer::{JobDispatcher, WorkerRuntime};
pub use engine::{EngineInvoker, EngineOutcome, EngineRunner, InvokerSettings};
pub use error::{WorkerError, WorkerResult};
pub use executors::WorkerServices;
pub use lock::{create_lock, DistributedLock, InMemoryLock, Lease};

/// Build a runtime talking to the services named in `config`
pub fn build_runtime(config: WorkerConfig) -> WorkerResult<WorkerRuntime> {
    let credentials = WorkerCredentials::new();
    let client = Arc::new(ServerApiClient::new(
        config.server_url.clone(),
        config.http_timeout(),
        config.poll_failure_backoff(),
        credentials.clone(),
    )?);

    let transport = Arc::new(engine::HttpEngineTransport::new(&config.engine_url)?);
    let invoker = Arc::new(EngineInvoker::new(
        transport,
        InvokerSettings {
            flow_timeout: config.flow_timeout(),
            trigger_timeout: config.trigger_timeout(),
            cache_ttl: config.engine_cache_ttl(),
        },
    ));

    let engine_api: Arc<dyn EngineApi> = client.clone();
    let services = WorkerServices {
        lock: create_lock(&config.lock_url)?,
        config: Arc::new(config),
        worker_api: client,
        blocks: BlockResolver::new(Arc::clone(&engine_api)),
        engine_api,
        engine: EngineRunner::new(invoker),
        exceptions: Arc::new(TracingExceptionSink),
    };

    Ok(WorkerRuntime::new(Arc::new(services), credentials))
}

/// Run a worker until Ctrl-C
pub async fn run(config: WorkerConfig) -> WorkerResult<()> {
    let worker_token = config.worker_token.clone();
    let runtime = build_runtime(config)?;

    runtime.init(worker_token);
    runtime.start();
    info!("Cascade worker running");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }

    info!("Shutting down worker");
    runtime.shutdown().await;
    Ok(())
}
