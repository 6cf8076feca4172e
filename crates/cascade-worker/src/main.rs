use anyhow::{Context, Result};
use cascade_worker::WorkerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration from environment variables
    let config = WorkerConfig::load().context("Failed to load configuration")?;

    cascade_monitoring::init_logging(&config.monitoring()).context("Failed to initialize logging")?;

    cascade_worker::run(config).await.context("Worker error")?;

    Ok(())
}
