//! Daemon bootstrap: wire the engine, its reapers, and the IPC server
//!
//! `bootstrap` builds the engine root over the real OS backends, starts the
//! spawn-registry reaper and the protection-cache sweeper, binds the IPC
//! listener, and returns a handle whose `shutdown` tears everything down,
//! including terminating every live spawn group, the registry's one
//! self-initiated termination.

use crate::{DaemonConfig, EnginePlane, Result};
use devguard_core::{Engine, EngineConfig};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Handle to the running daemon components
#[allow(missing_debug_implementations)]
pub struct BootstrapHandle {
    /// The engine root, shared with the IPC server task
    pub engine: Arc<Engine>,
    /// The address the IPC server actually bound
    pub local_addr: std::net::SocketAddr,
    server_task: JoinHandle<ipc::Result<()>>,
    background_tasks: Vec<JoinHandle<()>>,
}

impl BootstrapHandle {
    /// Graceful shutdown: stop the workers, stop the server, terminate
    /// every live spawn.
    pub async fn shutdown(self) {
        for task in &self.background_tasks {
            task.abort();
        }
        self.server_task.abort();
        self.engine.shutdown().await;
        info!("Bootstrap shutdown complete");
    }
}

/// Bootstrap the daemon components
///
/// # Errors
///
/// Configuration validation failures and IPC bind failures.
pub async fn bootstrap(config: DaemonConfig) -> Result<BootstrapHandle> {
    let engine_config = EngineConfig::default();
    engine_config
        .validate()
        .map_err(|e| crate::DaemonError::ConfigurationError(e.to_string()))?;

    let engine = Engine::new(engine_config);
    let background_tasks = engine.start_background_tasks();

    let ipc_config = ipc::IpcServerConfig {
        host: config.host.clone(),
        port: config.port,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    let plane = Arc::new(EnginePlane::new(engine.clone()));
    let server = ipc::IpcServer::new(ipc_config, plane);
    let (listener, local_addr) = server.bind().await?;
    let server_task = tokio::spawn(async move { server.serve_on(listener).await });

    info!("devguard daemon ready on {}", local_addr);
    Ok(BootstrapHandle {
        engine,
        local_addr,
        server_task,
        background_tasks,
    })
}
