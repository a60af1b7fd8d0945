//! Daemon library for devguard
//!
//! Wires the process engine to the IPC control plane: builds the engine
//! root, adapts it to the transport's [`ipc::ToolPlane`] trait, starts the
//! background reapers, and tears everything down on shutdown (terminating
//! every live spawn group).

#![allow(unused_crate_dependencies)]

pub mod bootstrap;
pub mod error;

pub use bootstrap::{bootstrap, BootstrapHandle};
pub use error::{DaemonError, Result};

use devguard_core::Engine;
use schema::{ToolInfo, ToolRequest, ToolResponse};
use serde_json::Value;
use std::sync::Arc;

/// Runtime configuration for the daemon, read from the environment
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Loopback host the IPC server binds
    pub host: String,
    /// Port the IPC server binds
    pub port: u16,
    /// Log level when RUST_LOG is unset
    pub log_level: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 48_621,
            log_level: "info".to_string(),
        }
    }
}

impl DaemonConfig {
    /// Configuration from DEVGUARD_HOST / DEVGUARD_PORT / DEVGUARD_LOG
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("DEVGUARD_HOST").unwrap_or(defaults.host),
            port: std::env::var("DEVGUARD_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: std::env::var("DEVGUARD_LOG").unwrap_or(defaults.log_level),
        }
    }
}

/// Adapter exposing the engine as the transport's tool plane.
///
/// Decoding happens here: the canonical tool name is injected as the enum
/// tag so the engine receives a typed [`ToolRequest`]; undecodable
/// arguments become an InvalidArgument envelope without reaching the core.
#[allow(missing_debug_implementations)]
pub struct EnginePlane {
    engine: Arc<Engine>,
}

impl EnginePlane {
    /// Wrap an engine root
    #[must_use]
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

#[async_trait::async_trait]
impl ipc::ToolPlane for EnginePlane {
    async fn call(&self, name: &str, arguments: Value) -> ToolResponse {
        let mut tagged = match arguments {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            _ => {
                return ToolResponse::fail(
                    0.0,
                    schema::ErrorBody::new(
                        schema::ErrorKind::InvalidArgument,
                        "pass tool arguments as a JSON object",
                        "arguments must be an object keyed by parameter name",
                    ),
                );
            }
        };
        tagged.insert("tool".to_string(), Value::String(name.to_string()));

        match serde_json::from_value::<ToolRequest>(Value::Object(tagged)) {
            Ok(request) => self.engine.handle(request).await,
            Err(e) => ToolResponse::fail(
                0.0,
                schema::ErrorBody::new(
                    schema::ErrorKind::InvalidArgument,
                    "check the tool name and argument types against tools/list",
                    format!("undecodable tool call: {e}"),
                ),
            ),
        }
    }

    fn tools(&self) -> Vec<ToolInfo> {
        vec![
            ToolInfo {
                name: "find_process".to_string(),
                summary: "Search processes by name or PID (alias: ps)".to_string(),
            },
            ToolInfo {
                name: "kill_process".to_string(),
                summary: "Kill one process with safety guards (alias: kill)".to_string(),
            },
            ToolInfo {
                name: "kill_process_tree".to_string(),
                summary: "Kill a process and all descendants (alias: killall)".to_string(),
            },
            ToolInfo {
                name: "check_ports".to_string(),
                summary: "Probe development ports (alias: netstat)".to_string(),
            },
            ToolInfo {
                name: "dev_status".to_string(),
                summary: "One-screen developer overview (alias: status)".to_string(),
            },
            ToolInfo {
                name: "server_status".to_string(),
                summary: "Managed servers and port status".to_string(),
            },
            ToolInfo {
                name: "find_process_by_port".to_string(),
                summary: "Who owns a port".to_string(),
            },
            ToolInfo {
                name: "cleanup_user_processes".to_string(),
                summary: "Terminate everything this server spawned".to_string(),
            },
            ToolInfo {
                name: "execute_command".to_string(),
                summary: "Run a whitelisted command".to_string(),
            },
            ToolInfo {
                name: "list_allowed".to_string(),
                summary: "Whitelist and tool summary".to_string(),
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipc::ToolPlane;

    fn plane() -> EnginePlane {
        let mut config = devguard_core::EngineConfig::default();
        config.debug_log_path =
            std::env::temp_dir().join(format!("devguard-daemon-test-{}.log", std::process::id()));
        EnginePlane::new(Engine::with_parts(
            config,
            Arc::new(devguard_core::proc::StaticProcessTable::new()),
            Arc::new(devguard_core::ports::StaticListenerTable::new()),
            Arc::new(devguard_core::os::ScriptedTerminator::new(Arc::new(
                devguard_core::proc::StaticProcessTable::new(),
            ))),
        ))
    }

    #[tokio::test]
    async fn test_plane_decodes_and_dispatches() {
        let plane = plane();
        let response = plane
            .call("dev_status", Value::Object(serde_json::Map::new()))
            .await;
        assert!(response.success);
    }

    #[tokio::test]
    async fn test_plane_rejects_bad_arguments() {
        let plane = plane();
        let response = plane
            .call(
                "kill_process",
                serde_json::json!({"pid": "not a number"}),
            )
            .await;
        assert!(!response.success);
        let body = response.failure.unwrap();
        assert_eq!(body.error, schema::ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_plane_rejects_unknown_tool() {
        let plane = plane();
        let response = plane.call("frobnicate", Value::Null).await;
        assert!(!response.success);
    }

    #[test]
    fn test_config_from_env_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 48_621);
    }
}
