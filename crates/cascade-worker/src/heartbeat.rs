//! Periodic liveness reports with host telemetry.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::System;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::WorkerApi;

/// Body of a heartbeat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerHeartbeat {
    pub cpu_usage_percentage: f64,
    pub ram_usage_percentage: f64,
    pub total_available_ram_bytes: u64,
    pub total_cpu_cores: usize,
    pub hostname: String,
    pub worker_props: BTreeMap<String, String>,
}

/// Samples CPU and memory usage; CPU usage is relative to the previous sample
pub struct HostProbe {
    system: Mutex<System>,
}

impl HostProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
        }
    }

    /// Take a fresh sample
    pub fn sample(&self, worker_props: &BTreeMap<String, String>) -> WorkerHeartbeat {
        let mut system = self.system.lock();
        system.refresh_cpu_usage();
        system.refresh_memory();

        let total = system.total_memory();
        let available = system.available_memory();
        let ram_usage_percentage = if total == 0 {
            0.0
        } else {
            (total.saturating_sub(available) as f64 / total as f64) * 100.0
        };

        WorkerHeartbeat {
            cpu_usage_percentage: f64::from(system.global_cpu_usage()),
            ram_usage_percentage,
            total_available_ram_bytes: total,
            total_cpu_cores: system.cpus().len(),
            hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
            worker_props: worker_props.clone(),
        }
    }
}

impl Default for HostProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// Send a heartbeat every `interval` until `cancel` fires.
///
/// Failures are logged and never stop the timer.
pub fn spawn_heartbeat(
    api: Arc<dyn WorkerApi>,
    interval: Duration,
    worker_props: BTreeMap<String, String>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let probe = HostProbe::new();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Heartbeat stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let heartbeat = probe.sample(&worker_props);
                    if let Err(e) = api.heartbeat(&heartbeat).await {
                        warn!(error = %e, "Failed to send heartbeat");
                    }
                }
            }
        }
    })
}
