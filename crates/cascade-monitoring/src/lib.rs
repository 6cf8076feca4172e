//! Monitoring for the Cascade worker: structured logging, the process-wide
//! exception sink and worker metrics.

use serde::Deserialize;

pub mod exception;
pub mod logging;
pub mod metrics;

/// Configuration for initializing the monitoring system
#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    /// Service name attached to the startup log line
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Log level filter (e.g., "info,cascade_worker=debug"); `RUST_LOG` wins when set
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Emit JSON lines instead of pretty output
    #[serde(default)]
    pub json_logs: bool,
}

fn default_service_name() -> String {
    "cascade-worker".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            log_filter: default_log_filter(),
            json_logs: false,
        }
    }
}

pub use crate::exception::{ExceptionContext, ExceptionSink, TracingExceptionSink};
pub use crate::logging::{init_logging, LogExt};
pub use crate::metrics::WorkerMetrics;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = MonitoringConfig::default();
        assert_eq!(config.service_name, "cascade-worker");
        assert_eq!(config.log_filter, "info");
        assert!(!config.json_logs);
    }
}
