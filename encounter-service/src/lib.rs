//! Encounter backend service
//!
//! Owner-scoped encounter store with pause/resume transitions, served over
//! HTTP with axum.

pub mod config;
pub mod error;
pub mod routes;
pub mod store;

use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use tracing::info;

pub use config::ServiceConfig;
pub use error::{ServiceError, ServiceResult};
pub use routes::{router, AppState};
pub use store::EncounterStore;

/// Open the store described by `config`
pub async fn open_store(config: &ServiceConfig) -> Result<EncounterStore> {
    match config.snapshot_path() {
        Some(path) => EncounterStore::open(path)
            .await
            .context("Failed to open encounter snapshot"),
        None => {
            info!("Persistence disabled, encounters are kept in memory only");
            Ok(EncounterStore::in_memory())
        }
    }
}

/// Serve until `shutdown` resolves
pub async fn run(config: ServiceConfig, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
    let store = open_store(&config).await?;
    let app = router(
        AppState {
            store: Arc::new(store),
        },
        config.body_limit,
    );

    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("Failed to bind encounter service to {}", config.addr))?;
    info!("Encounter service listening on {}", config.addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Encounter service error")
}
