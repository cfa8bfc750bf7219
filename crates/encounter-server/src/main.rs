//! # encounter-server
//!
//! Host process for the encounter tracker.
//!
//! This binary provides:
//! - The wake-up alarm driving time-based encounter transitions
//! - REST API for friends, thresholds, trigger delivery and the event drain
//! - OpenAPI documentation via Swagger UI
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development
//! cargo run --package encounter-server
//!
//! # With a config file
//! ENCOUNTER_CONFIG=/etc/encounter-tracker/config.toml ./encounter-server
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use encounter_core::{Config, EncounterTracker, JsonFileStore};
use encounter_server::alarm::{self, LogNotifier, TokioAlarm};
use encounter_server::api;
use encounter_server::logging;
use encounter_server::state::AppState;
use tokio::net::TcpListener;
use tracing::info;

/// Environment variable naming the TOML config file.
const CONFIG_PATH_ENV: &str = "ENCOUNTER_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
    let config = Config::load(config_path.as_deref()).context("failed to load configuration")?;

    logging::init(&config.logging)?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting encounter-server");

    std::fs::create_dir_all(&config.storage.data_dir).with_context(|| {
        format!(
            "failed to create data directory {}",
            config.storage.data_dir.display()
        )
    })?;
    info!(data_dir = %config.storage.data_dir.display(), "Using data directory");

    let (alarm, armed) = TokioAlarm::new();
    let tracker = Arc::new(EncounterTracker::new(
        Arc::new(JsonFileStore::new(&config.storage.data_dir)),
        Arc::new(alarm),
        Arc::new(LogNotifier),
    ));
    {
        let tracker = Arc::clone(&tracker);
        tokio::task::spawn_blocking(move || tracker.start(Utc::now())).await?;
    }
    let driver = tokio::spawn(alarm::run(Arc::clone(&tracker), armed));

    let app = api::create_router(AppState::new(tracker));

    let addr: SocketAddr = format!("{}:{}", config.server.bind_address, config.server.port)
        .parse()
        .context("invalid bind address")?;
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    driver.abort();
    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
