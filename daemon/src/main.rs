//! devguard daemon binary
//!
//! The long-running process that owns the engine and serves the local
//! JSON-RPC control plane.

#![allow(unused_crate_dependencies)]

use daemon::{bootstrap, DaemonConfig};
use tracing::{error, info};

#[tokio::main]
async fn main() -> daemon::Result<()> {
    let config = DaemonConfig::from_env();
    devguard_core::utils::init_tracing(&config.log_level)
        .map_err(|e| daemon::DaemonError::ConfigurationError(e.to_string()))?;

    info!("Starting devguard daemon");
    let handle = match bootstrap(config).await {
        Ok(handle) => handle,
        Err(e) => {
            error!("Bootstrap failed: {}", e);
            return Err(e);
        }
    };

    tokio::signal::ctrl_c()
        .await
        .map_err(daemon::DaemonError::IoError)?;
    info!("Received Ctrl+C, shutting down...");
    handle.shutdown().await;

    info!("Daemon stopped");
    Ok(())
}
