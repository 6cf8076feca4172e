//! Configuration for the Cascade worker
//!
//! Values come from `CASCADE_WORKER_*` environment variables.

use cascade_monitoring::MonitoringConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{WorkerError, WorkerResult};

const ENV_PREFIX: &str = "CASCADE_WORKER";

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Control-plane base URL
    #[serde(default)]
    pub server_url: String,

    /// Remote engine base URL
    #[serde(default)]
    pub engine_url: String,

    /// Bearer token for worker-scoped endpoints
    #[serde(default)]
    pub worker_token: String,

    /// Base for public webhook URLs; falls back to `server_url`
    #[serde(default)]
    pub webhook_base_url: Option<String>,

    /// Consumers per ONE_TIME and WEBHOOK queue
    #[serde(default = "default_concurrency")]
    pub flow_worker_concurrency: usize,

    /// Consumers for the SCHEDULED queue
    #[serde(default = "default_concurrency")]
    pub scheduled_worker_concurrency: usize,

    /// Engine budget for EXECUTE_FLOW and EXECUTE_STEP
    #[serde(default = "default_flow_timeout")]
    pub flow_timeout_seconds: u64,

    /// Engine budget for every other operation kind
    #[serde(default = "default_trigger_timeout")]
    pub trigger_timeout_seconds: u64,

    /// TTL of cached engine responses
    #[serde(default = "default_cache_ttl")]
    pub engine_cache_ttl_seconds: u64,

    /// Heartbeat period
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,

    /// Sleep after a failed poll
    #[serde(default = "default_poll_backoff")]
    pub poll_failure_backoff_ms: u64,

    /// Added to the flow timeout for the run lock
    #[serde(default = "default_lock_margin")]
    pub lock_safety_margin_seconds: u64,

    /// `memory://` or `redis://...`
    #[serde(default = "default_lock_url")]
    pub lock_url: String,

    /// Default tracing filter
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Emit JSON logs
    #[serde(default)]
    pub json_logs: bool,

    /// Control-plane request timeout
    #[serde(default = "default_http_timeout")]
    pub http_timeout_seconds: u64,
}

fn default_concurrency() -> usize {
    10
}

fn default_flow_timeout() -> u64 {
    600
}

fn default_trigger_timeout() -> u64 {
    60
}

fn default_cache_ttl() -> u64 {
    600
}

fn default_heartbeat_interval() -> u64 {
    15
}

fn default_poll_backoff() -> u64 {
    2000
}

fn default_lock_margin() -> u64 {
    10
}

fn default_lock_url() -> String {
    "memory://local".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_http_timeout() -> u64 {
    30
}

impl WorkerConfig {
    /// Load configuration from the process environment
    pub fn load() -> WorkerResult<Self> {
        Self::from_environment(config::Environment::with_prefix(ENV_PREFIX))
    }

    /// Load configuration from an explicit variable map instead of the process environment
    pub fn from_vars(vars: HashMap<String, String>) -> WorkerResult<Self> {
        Self::from_environment(config::Environment::with_prefix(ENV_PREFIX).source(Some(vars)))
    }

    fn from_environment(environment: config::Environment) -> WorkerResult<Self> {
        let config: WorkerConfig = config::Config::builder()
            .add_source(environment.try_parsing(true))
            .build()?
            .try_deserialize()?;

        config.validate()?;

        info!(
            server_url = %config.server_url,
            engine_url = %config.engine_url,
            lock_url = %config.lock_url,
            "Loaded worker configuration"
        );
        Ok(config)
    }

    /// Check required fields and value ranges
    pub fn validate(&self) -> WorkerResult<()> {
        if self.server_url.is_empty() {
            return Err(WorkerError::Configuration("Server URL is required".to_string()));
        }

        if self.engine_url.is_empty() {
            return Err(WorkerError::Configuration("Engine URL is required".to_string()));
        }

        if self.worker_token.is_empty() {
            return Err(WorkerError::Configuration("Worker token is required".to_string()));
        }

        if self.flow_worker_concurrency == 0 || self.scheduled_worker_concurrency == 0 {
            return Err(WorkerError::Configuration(
                "Worker concurrency must be at least 1".to_string(),
            ));
        }

        if self.flow_timeout_seconds == 0 || self.trigger_timeout_seconds == 0 {
            return Err(WorkerError::Configuration(
                "Engine timeouts must be greater than zero".to_string(),
            ));
        }

        if !self.lock_url.starts_with("memory://") && !self.lock_url.starts_with("redis://") {
            return Err(WorkerError::Configuration(format!(
                "Unsupported lock URL: {}",
                self.lock_url
            )));
        }

        if self.webhook_base_url.is_none() {
            warn!("No webhook base URL provided - webhook URLs will use the server URL");
        }

        if self.lock_url.starts_with("memory://") {
            warn!("Using process-local run lock - runs are only serialized within this worker");
        }

        Ok(())
    }

    pub fn flow_timeout(&self) -> Duration {
        Duration::from_secs(self.flow_timeout_seconds)
    }

    pub fn trigger_timeout(&self) -> Duration {
        Duration::from_secs(self.trigger_timeout_seconds)
    }

    pub fn engine_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.engine_cache_ttl_seconds)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn poll_failure_backoff(&self) -> Duration {
        Duration::from_millis(self.poll_failure_backoff_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    /// Deadline and TTL of the per-run distributed lock
    pub fn run_lock_timeout(&self) -> Duration {
        Duration::from_secs(self.flow_timeout_seconds + self.lock_safety_margin_seconds)
    }

    /// Base URL webhook URLs are built from
    pub fn webhook_base_url(&self) -> &str {
        self.webhook_base_url.as_deref().unwrap_or(&self.server_url)
    }

    /// Public webhook URL of a flow
    pub fn webhook_url(&self, flow_id: &cascade_core::FlowId) -> String {
        format!("{}/v1/webhooks/{}", self.webhook_base_url().trim_end_matches('/'), flow_id)
    }

    /// Logging settings derived from this configuration
    pub fn monitoring(&self) -> MonitoringConfig {
        MonitoringConfig {
            service_name: "cascade-worker".to_string(),
            log_filter: self.log_filter.clone(),
            json_logs: self.json_logs,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            engine_url: String::new(),
            worker_token: String::new(),
            webhook_base_url: None,
            flow_worker_concurrency: default_concurrency(),
            scheduled_worker_concurrency: default_concurrency(),
            flow_timeout_seconds: default_flow_timeout(),
            trigger_timeout_seconds: default_trigger_timeout(),
            engine_cache_ttl_seconds: default_cache_ttl(),
            heartbeat_interval_seconds: default_heartbeat_interval(),
            poll_failure_backoff_ms: default_poll_backoff(),
            lock_safety_margin_seconds: default_lock_margin(),
            lock_url: default_lock_url(),
            log_filter: default_log_filter(),
            json_logs: false,
            http_timeout_seconds: default_http_timeout(),
        }
    }
}
