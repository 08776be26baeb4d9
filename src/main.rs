//! ==============================================================================
//! main.rs - sensor dashboard host entry point
//! ==============================================================================
//!
//! purpose:
//!     polls a graphql sensor backend for one device at a time and serves a
//!     live dashboard (latest values, charts, camera images, csv export).
//!
//! responsibilities:
//!     - load configuration (file + environment), fail fast when incomplete
//!     - initialize structured logging
//!     - wire the backend client, url signer and controllers together
//!     - mount the default device and serve the dashboard until ctrl-c
//!
//! relationships:
//!     - uses: config.rs (settings), backend.rs (graphql transport)
//!     - uses: images.rs (presigned image urls), poller.rs (refresh loop)
//!     - uses: export.rs (csv export), server.rs (http routes)
//!
//! architecture:
//!
//!     ┌──────────────────────────────────────────────────────────────┐
//!     │                    rust host (this file)                     │
//!     │  ┌──────────────┐   ┌──────────────┐   ┌─────────────────┐   │
//!     │  │ polling task │   │  web server  │   │ export handler  │   │
//!     │  │ (per device) │   │ (port 3000)  │   │ (one at a time) │   │
//!     │  └──────┬───────┘   └──────┬───────┘   └────────┬────────┘   │
//!     │         │  writes          │ reads              │ writes     │
//!     │         └─────────────► DashboardState ◄────────┘            │
//!     └─────────┼────────────────────────────────────────┼───────────┘
//!               │ listSensorData                         │ createCsvExport
//!               ▼                                        ▼
//!        ┌─────────────┐        ┌──────────────┐
//!        │ graphql api │        │ s3 (presign) │
//!        └─────────────┘        └──────────────┘
//!
//! ==============================================================================

mod backend;
mod config;
mod domain;
mod export;
mod fetcher;
mod images;
mod poller;
mod schema;
mod server;
mod state;
mod view;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::backend::AppSyncClient;
use crate::config::DashboardConfig;
use crate::export::ExportController;
use crate::fetcher::Fetcher;
use crate::images::S3Presigner;
use crate::poller::PollingController;
use crate::server::AppContext;

// ==============================================================================
// main entry point
// ==============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // step 1: load configuration; incomplete settings are fatal
    let config = DashboardConfig::from_env().context("cannot start the dashboard")?;

    // step 2: logging (RUST_LOG wins over the configured level)
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("sensor dashboard starting");
    config.log_summary();

    // step 3: backend, signer and shared state
    let backend = Arc::new(AppSyncClient::new(&config.backend)?);
    let signer = Arc::new(S3Presigner::connect(&config.backend.region, &config.storage).await);
    let state = state::shared();

    // step 4: controllers
    let poller = Arc::new(PollingController::new(
        Fetcher::new(backend.clone(), config.backend.max_pages),
        signer,
        state.clone(),
        Duration::from_secs(config.polling.interval_seconds),
    ));
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.backend.timeout_seconds))
        .build()
        .context("failed to build download client")?;
    let exporter = Arc::new(ExportController::new(backend, state.clone(), http));

    // step 5: mount the default device
    poller.select_device(&config.devices.default).await;

    // step 6: serve until ctrl-c
    let ctx = AppContext {
        poller: poller.clone(),
        exporter,
        state,
        devices: Arc::new(config.devices.available.clone()),
    };
    let result = server::serve(&config.server.listen, ctx, shutdown_signal()).await;

    poller.shutdown().await;
    tracing::info!("sensor dashboard stopped");
    result
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
