use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use encounter_service::ServiceConfig;

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServiceConfig::from_env()?;
    info!(
        "Encounter service starting (data dir: {}, persist: {})",
        config.data_dir.display(),
        config.persist
    );

    encounter_service::run(config, shutdown_signal()).await
}
