//! HTTP service binary.
//!
//! # Startup Sequence
//!
//! 1. Initialize structured logging (tracing)
//! 2. Load configuration from `tkt-config.yaml`, or defaults
//! 3. Connect the `PostgreSQL` pool with a fresh sequence registry
//! 4. Serve the transactional router until `Ctrl-C`
//! 5. Close the pool

mod config;
mod error;

use std::path::Path;
use std::sync::Arc;

use tkt_db::{Database, SequenceRegistry};
use tkt_web::{build_router, start_server, AppState};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::ServiceConfig;
use crate::error::ServerMainError;

const CONFIG_FILE: &str = "tkt-config.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, the database connection or the
/// HTTP server fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("tkt-server starting");
    run().await?;
    Ok(())
}

async fn run() -> Result<(), ServerMainError> {
    let config = load_config()?;
    info!(
        host = config.server.host,
        port = config.server.port,
        sequence_manager = ?config.database.sequence_manager,
        "Configuration loaded"
    );

    let db = Database::connect(config.database, Arc::new(SequenceRegistry::new())).await?;
    let router = build_router(Arc::new(AppState::new(db.clone())));

    let served = start_server(&config.server, router).await;
    db.close().await;
    served?;
    Ok(())
}

/// Load the service configuration from `tkt-config.yaml`.
///
/// Looks for the config file relative to the current working directory.
fn load_config() -> Result<ServiceConfig, ServerMainError> {
    let config_path = Path::new(CONFIG_FILE);
    if config_path.exists() {
        Ok(ServiceConfig::from_file(config_path)?)
    } else {
        info!("Config file not found, using defaults");
        let mut config = ServiceConfig::default();
        config.apply_env_overrides()?;
        Ok(config)
    }
}
