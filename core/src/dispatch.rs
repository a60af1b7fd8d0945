//! Tool dispatcher
//!
//! The engine root: owns the configuration, the process table, the
//! protection classifier, the port scanner, the spawn registry, the
//! termination engine, and the operation log, and turns every decoded
//! [`ToolRequest`] into exactly one of their operations. The match is
//! exhaustive, so adding a tool without a handler is a compile error.
//!
//! Every operation is timed, logged once, and wrapped in the response
//! envelope. Typed failures render their own error bodies; only genuinely
//! unexpected conditions become Internal.

use crate::inspect::ProcessInspector;
use crate::oplog::OpLog;
use crate::os::{self, OsTerminator, Terminator};
use crate::ports::{ListenerTable, PortScanner, SystemListenerTable};
use crate::proc::{ProcessTable, SysinfoTable};
use crate::protection::ProtectionClassifier;
use crate::spawn::SpawnRegistry;
use crate::terminate::{KillFlags, KillOutcome, TerminationEngine, TreeFlags, TreeOutcome};
use crate::{CancelFlag, CoreError, EngineConfig, Result};
use schema::{
    CleanupReply, DevStatusReply, ListAllowedReply, PidName, PortLookupReply, PortOwnerDetail,
    SpawnReply, ToolInfo, ToolRequest, ToolResponse, UserProcess,
};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// The engine root; one per server, injected into every component
#[allow(missing_debug_implementations)]
pub struct Engine {
    config: Arc<EngineConfig>,
    table: Arc<dyn ProcessTable>,
    listeners: Arc<dyn ListenerTable>,
    terminator: Arc<dyn Terminator>,
    classifier: Arc<ProtectionClassifier>,
    registry: Arc<SpawnRegistry>,
    inspector: ProcessInspector,
    scanner: PortScanner,
    killer: TerminationEngine,
    oplog: Arc<OpLog>,
}

impl Engine {
    /// Engine over the real OS backends
    #[must_use]
    pub fn new(config: EngineConfig) -> Arc<Self> {
        let table: Arc<dyn ProcessTable> = Arc::new(SysinfoTable::new());
        let listeners: Arc<dyn ListenerTable> = Arc::new(SystemListenerTable::new());
        let terminator: Arc<dyn Terminator> = Arc::new(OsTerminator::new());
        Self::with_parts(config, table, listeners, terminator)
    }

    /// Engine over injected backends; tests pass in-memory fakes
    #[must_use]
    pub fn with_parts(
        config: EngineConfig,
        table: Arc<dyn ProcessTable>,
        listeners: Arc<dyn ListenerTable>,
        terminator: Arc<dyn Terminator>,
    ) -> Arc<Self> {
        let config = Arc::new(config);
        let classifier = Arc::new(ProtectionClassifier::new(&config));
        let registry = Arc::new(SpawnRegistry::new(config.clone()));
        let oplog = Arc::new(OpLog::new(config.oplog_capacity, &config.debug_log_path));
        Arc::new(Self {
            inspector: ProcessInspector::new(config.clone(), classifier.clone()),
            scanner: PortScanner::new(config.clone()),
            killer: TerminationEngine::new(config.clone(), classifier.clone()),
            config,
            table,
            listeners,
            terminator,
            classifier,
            registry,
            oplog,
        })
    }

    /// The engine configuration
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The operation log
    #[must_use]
    pub fn oplog(&self) -> &OpLog {
        &self.oplog
    }

    /// Start the two long-lived background workers: the spawn registry
    /// reaper and the protection cache sweeper.
    #[must_use]
    pub fn start_background_tasks(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let reaper = {
            let engine = self.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(engine.config.reaper_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    engine.registry.poll(engine.table.as_ref());
                }
            })
        };
        let sweeper = {
            let engine = self.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(engine.config.cache_sweep_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    engine.classifier.sweep();
                }
            })
        };
        vec![reaper, sweeper]
    }

    /// Terminate every live server-spawned process; called at shutdown
    pub async fn shutdown(&self) {
        info!("Engine shutdown: terminating spawned processes");
        self.registry.shutdown(self.terminator.as_ref()).await;
    }

    /// Dispatch one request and wrap the outcome in the envelope
    pub async fn handle(&self, request: ToolRequest) -> ToolResponse {
        self.handle_cancellable(request, &CancelFlag::new()).await
    }

    /// Dispatch with a cancellation flag the transport may set on client
    /// disconnect. Termination operations ignore it by contract.
    pub async fn handle_cancellable(
        &self,
        request: ToolRequest,
        cancel: &CancelFlag,
    ) -> ToolResponse {
        let tool = request.name();
        let dry_run = matches!(
            request,
            ToolRequest::KillProcess { dry_run: true, .. }
                | ToolRequest::KillProcessTree { dry_run: true, .. }
        );
        let started = Instant::now();
        let outcome = self.dispatch(request, cancel).await;
        let elapsed = started.elapsed().as_secs_f64();

        let response = match outcome {
            Ok(payload) => ToolResponse {
                success: true,
                elapsed_seconds: elapsed,
                payload: Some(payload),
                failure: None,
            },
            Err(e) => {
                match &e {
                    CoreError::Io(_) | CoreError::Serialization(_) | CoreError::Internal(_) => {
                        error!("Internal failure in {}: {}", tool, e);
                    }
                    other => debug!("{} rejected: {}", tool, other),
                }
                ToolResponse::fail(elapsed, e.into_body())
            }
        };

        self.oplog
            .record(tool, elapsed, response.outcome_class(), dry_run);
        response
    }

    async fn dispatch(&self, request: ToolRequest, cancel: &CancelFlag) -> Result<Value> {
        match request {
            ToolRequest::FindProcess {
                name,
                mode,
                include_args,
                show_full_cmdline,
            } => {
                let reply = self.inspector.find(
                    self.table.as_ref(),
                    &self.registry,
                    &name,
                    mode,
                    include_args,
                    show_full_cmdline,
                    cancel,
                )?;
                Ok(serde_json::to_value(reply)?)
            }

            ToolRequest::KillProcess {
                pid,
                force,
                override_user_spawn,
                dry_run,
            } => {
                let flags = KillFlags {
                    force,
                    override_user_spawn,
                    dry_run,
                };
                let outcome = self
                    .killer
                    .kill_one(
                        pid,
                        flags,
                        self.table.as_ref(),
                        self.terminator.as_ref(),
                        &self.registry,
                    )
                    .await?;
                match outcome {
                    KillOutcome::Done(reply) => Ok(serde_json::to_value(reply)?),
                    KillOutcome::Plan(plan) => Ok(serde_json::to_value(plan)?),
                }
            }

            ToolRequest::KillProcessTree { pid, force, dry_run } => {
                let flags = TreeFlags { force, dry_run };
                let outcome = self
                    .killer
                    .kill_tree(
                        pid,
                        flags,
                        self.table.as_ref(),
                        self.terminator.as_ref(),
                        &self.registry,
                    )
                    .await?;
                match outcome {
                    TreeOutcome::Done(reply) => Ok(serde_json::to_value(reply)?),
                    TreeOutcome::Plan(plan) => Ok(serde_json::to_value(plan)?),
                }
            }

            ToolRequest::CheckPorts { port } => {
                let reply = self
                    .scanner
                    .check_ports(
                        self.table.as_ref(),
                        self.listeners.as_ref(),
                        &self.registry,
                        port,
                    )
                    .await?;
                Ok(serde_json::to_value(reply)?)
            }

            ToolRequest::DevStatus => Ok(serde_json::to_value(self.dev_status().await?)?),

            ToolRequest::ServerStatus => Ok(serde_json::to_value(self.server_status().await?)?),

            ToolRequest::FindProcessByPort { port } => {
                Ok(serde_json::to_value(self.find_process_by_port(port).await?)?)
            }

            ToolRequest::CleanupUserProcesses { confirm } => {
                Ok(serde_json::to_value(self.cleanup_user_processes(confirm).await?)?)
            }

            ToolRequest::ExecuteCommand {
                command,
                cwd,
                background,
            } => Ok(serde_json::to_value(
                self.execute_command(&command, cwd, background).await?,
            )?),

            ToolRequest::ListAllowed => Ok(serde_json::to_value(self.list_allowed())?),
        }
    }

    async fn dev_status(&self) -> Result<DevStatusReply> {
        self.registry.poll(self.table.as_ref());
        let ports = self
            .scanner
            .check_ports(
                self.table.as_ref(),
                self.listeners.as_ref(),
                &self.registry,
                None,
            )
            .await?;

        self.table.refresh();
        let mut user_processes = Vec::new();
        for pid in self.registry.pids() {
            if let Ok(detail) = self.table.detail(pid) {
                user_processes.push(UserProcess {
                    pid,
                    name: detail.name,
                    memory_mb: schema::memory_mb(detail.memory_bytes),
                });
            }
        }

        // Infrastructure health: count live processes carrying a token.
        let infra_count = self
            .table
            .list()
            .iter()
            .filter(|row| self.classifier.matches_pattern(&row.name, &row.cmdline))
            .count();

        Ok(DevStatusReply {
            timestamp: schema::current_timestamp(),
            ports: ports.ports,
            user_process_count: user_processes.len(),
            user_processes,
            mcp_healthy: infra_count > 0,
            mcp_server_count: infra_count,
        })
    }

    async fn server_status(&self) -> Result<schema::ServerStatusReply> {
        self.registry.poll(self.table.as_ref());
        let ports = self
            .scanner
            .check_ports(
                self.table.as_ref(),
                self.listeners.as_ref(),
                &self.registry,
                None,
            )
            .await?;

        let managed_servers = self.registry.snapshot();
        let mut developer_hints = ports.developer_hints.clone();
        if !managed_servers.is_empty() {
            developer_hints.push(format!(
                "{} managed server(s); kill_process_tree cleans up a whole tree",
                managed_servers.len()
            ));
        }

        Ok(schema::ServerStatusReply {
            managed_servers,
            port_status: ports.ports,
            developer_hints,
        })
    }

    async fn find_process_by_port(&self, port: u16) -> Result<PortLookupReply> {
        let listeners = self.listeners.listening_pids().await?;
        let Some(pids) = listeners.get(&port).filter(|pids| !pids.is_empty()) else {
            return Ok(PortLookupReply {
                port,
                process: None,
                message: Some(format!("Port {port} is not in use")),
            });
        };
        let pid = pids[0];

        self.table.refresh();
        let process = match self.table.detail(pid) {
            Ok(detail) => {
                let mut cmdline = detail.cmdline;
                if cmdline.chars().count() > 200 {
                    cmdline = cmdline.chars().take(200).collect();
                }
                Some(PortOwnerDetail {
                    pid,
                    name: detail.name,
                    cmdline,
                    user_spawned: self.registry.contains(pid),
                })
            }
            Err(_) => None,
        };
        Ok(PortLookupReply {
            port,
            process,
            message: None,
        })
    }

    async fn cleanup_user_processes(&self, confirm: bool) -> Result<CleanupReply> {
        self.table.refresh();
        let mut targets = Vec::new();
        for pid in self.registry.pids() {
            if let Ok(row) = self.table.row(pid) {
                targets.push(PidName {
                    pid,
                    name: row.name,
                });
            } else {
                self.registry.discard(pid);
            }
        }

        if !confirm {
            if targets.is_empty() {
                return Ok(CleanupReply {
                    killed: vec![],
                    failed: vec![],
                    total_cleaned: 0,
                });
            }
            return Err(CoreError::InvalidArgument {
                message: format!(
                    "confirmation required to terminate {} spawned process(es)",
                    targets.len()
                ),
                suggestion: "retry with confirm=true to proceed with cleanup".to_string(),
            });
        }

        let mut killed = Vec::new();
        let mut failed = Vec::new();
        for target in targets {
            let tree_flags = TreeFlags {
                force: true,
                dry_run: false,
            };
            let tree_result = self
                .killer
                .kill_tree(
                    target.pid,
                    tree_flags,
                    self.table.as_ref(),
                    self.terminator.as_ref(),
                    &self.registry,
                )
                .await;
            match tree_result {
                Ok(_) => killed.push(target),
                Err(CoreError::ProcessNotFound(_)) => {
                    self.registry.discard(target.pid);
                    killed.push(target);
                }
                Err(_) => {
                    // Tree kill failed; one direct attempt with override.
                    let flags = KillFlags {
                        force: true,
                        override_user_spawn: true,
                        dry_run: false,
                    };
                    match self
                        .killer
                        .kill_one(
                            target.pid,
                            flags,
                            self.table.as_ref(),
                            self.terminator.as_ref(),
                            &self.registry,
                        )
                        .await
                    {
                        Ok(_) | Err(CoreError::ProcessNotFound(_)) => killed.push(target),
                        Err(_) => failed.push(target),
                    }
                }
            }
        }

        let total_cleaned = killed.len();
        Ok(CleanupReply {
            killed,
            failed,
            total_cleaned,
        })
    }

    async fn execute_command(
        &self,
        command: &str,
        cwd: Option<String>,
        background: bool,
    ) -> Result<Value> {
        if !self.config.is_command_allowed(command) {
            return Err(CoreError::CommandNotAllowed(command.to_string()));
        }
        let cwd_path = cwd.as_ref().map(PathBuf::from);

        if background {
            let spawned = os::spawn_background(command, cwd_path.as_deref()).await?;
            let has_group = spawned.group.is_some();
            let (pid, wrapper_pid) = self
                .registry
                .register(spawned, command, cwd, self.table.as_ref())
                .await;
            let reply = SpawnReply {
                pid,
                wrapper_pid,
                message: format!("Started in background with PID {pid}"),
                orphan_prevention: if has_group {
                    "Job Object".to_string()
                } else {
                    "Process tracking".to_string()
                },
            };
            Ok(serde_json::to_value(reply)?)
        } else {
            let reply =
                os::run_foreground(command, cwd_path.as_deref(), self.config.foreground_timeout)
                    .await?;
            Ok(serde_json::to_value(reply)?)
        }
    }

    fn list_allowed(&self) -> ListAllowedReply {
        let mut commands = self.config.allowed_commands.clone();
        commands.sort();
        ListAllowedReply {
            commands,
            tools: vec![
                ToolInfo {
                    name: "find_process".to_string(),
                    summary: "Search by name or PID with performance tiers (alias: ps)"
                        .to_string(),
                },
                ToolInfo {
                    name: "kill_process".to_string(),
                    summary: "Kill a single process; warns about orphans (alias: kill)"
                        .to_string(),
                },
                ToolInfo {
                    name: "kill_process_tree".to_string(),
                    summary: "Kill a process and all children (alias: killall)".to_string(),
                },
                ToolInfo {
                    name: "check_ports".to_string(),
                    summary: "Probe the development ports (alias: netstat)".to_string(),
                },
                ToolInfo {
                    name: "dev_status".to_string(),
                    summary: "Ports, spawned processes, infrastructure health (alias: status)"
                        .to_string(),
                },
                ToolInfo {
                    name: "server_status".to_string(),
                    summary: "Managed background servers and port status".to_string(),
                },
                ToolInfo {
                    name: "find_process_by_port".to_string(),
                    summary: "Identify the process bound to a port".to_string(),
                },
                ToolInfo {
                    name: "cleanup_user_processes".to_string(),
                    summary: "Terminate every process this server spawned".to_string(),
                },
                ToolInfo {
                    name: "execute_command".to_string(),
                    summary: "Run a whitelisted command, optionally in the background"
                        .to_string(),
                },
                ToolInfo {
                    name: "list_allowed".to_string(),
                    summary: "This listing".to_string(),
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os::ScriptedTerminator;
    use crate::ports::StaticListenerTable;
    use crate::proc::{FakeProcess, StaticProcessTable};
    use schema::ErrorKind;

    fn test_engine(
        processes: Vec<FakeProcess>,
    ) -> (Arc<Engine>, Arc<StaticProcessTable>, Arc<StaticListenerTable>) {
        let table = Arc::new(StaticProcessTable::with_processes(processes));
        let listeners = Arc::new(StaticListenerTable::new());
        let terminator = Arc::new(ScriptedTerminator::new(table.clone()));
        let mut config = EngineConfig::default();
        config.debug_log_path = std::env::temp_dir().join(format!(
            "devguard-test-{}.log",
            std::process::id()
        ));
        let engine = Engine::with_parts(config, table.clone(), listeners.clone(), terminator);
        (engine, table, listeners)
    }

    #[tokio::test]
    async fn test_envelope_success_shape() {
        let (engine, _, _) = test_engine(vec![FakeProcess::new(1, "node.exe")]);
        let response = engine
            .handle(ToolRequest::FindProcess {
                name: "node".to_string(),
                mode: schema::DetailTier::Quick,
                include_args: false,
                show_full_cmdline: false,
            })
            .await;
        assert!(response.success);
        assert!(response.elapsed_seconds >= 0.0);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["count"], 1);
    }

    #[tokio::test]
    async fn test_envelope_error_shape_has_suggestion() {
        let (engine, _, _) = test_engine(vec![]);
        let response = engine
            .handle(ToolRequest::KillProcess {
                pid: 424_242,
                force: false,
                override_user_spawn: false,
                dry_run: false,
            })
            .await;
        assert!(!response.success);
        let body = response.failure.unwrap();
        assert_eq!(body.error, ErrorKind::ProcessNotFound);
        assert!(!body.suggestion.is_empty());
        assert!(!body.developer_hint.is_empty());
    }

    #[tokio::test]
    async fn test_operations_are_logged_once() {
        let (engine, _, _) = test_engine(vec![]);
        engine.handle(ToolRequest::DevStatus).await;
        engine
            .handle(ToolRequest::KillProcessTree {
                pid: 5,
                force: false,
                dry_run: true,
            })
            .await;

        let (_, entries) = engine.oplog().snapshot();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].tool, "dev_status");
        assert_eq!(entries[0].outcome, "ok");
        assert_eq!(entries[1].tool, "kill_process_tree");
        // A dry run against a missing process is still a rejection, and
        // still carries the dry-run marker for the audit trail.
        assert_eq!(entries[1].outcome, "rejected");
        assert!(entries[1].dry_run);
    }

    #[tokio::test]
    async fn test_typed_failures_never_become_internal() {
        let (engine, _, _) = test_engine(vec![FakeProcess::new(7, "mcp-hub.exe")]);
        let response = engine
            .handle(ToolRequest::KillProcess {
                pid: 7,
                force: true,
                override_user_spawn: true,
                dry_run: false,
            })
            .await;
        let body = response.failure.unwrap();
        assert_eq!(body.error, ErrorKind::ProtectedProcess);
    }

    #[tokio::test]
    async fn test_execute_command_whitelist() {
        let (engine, _, _) = test_engine(vec![]);
        let response = engine
            .handle(ToolRequest::ExecuteCommand {
                command: "taskkill /IM node.exe".to_string(),
                cwd: None,
                background: false,
            })
            .await;
        let body = response.failure.unwrap();
        assert_eq!(body.error, ErrorKind::CommandNotAllowed);
    }

    #[tokio::test]
    async fn test_find_process_by_port_inactive_is_success_with_null() {
        let (engine, _, _) = test_engine(vec![]);
        let response = engine
            .handle(ToolRequest::FindProcessByPort { port: 8123 })
            .await;
        assert!(response.success);
        let json = serde_json::to_value(&response).unwrap();
        assert!(json["process"].is_null());
        assert!(json["message"].as_str().unwrap().contains("8123"));
    }

    #[tokio::test]
    async fn test_find_process_by_port_active() {
        let (engine, _, listeners) = test_engine(vec![
            FakeProcess::new(40, "python.exe").cmdline("python -m http.server 8000")
        ]);
        listeners.bind(8000, vec![40]);
        let response = engine
            .handle(ToolRequest::FindProcessByPort { port: 8000 })
            .await;
        assert!(response.success);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["process"]["pid"], 40);
        assert_eq!(json["process"]["user_spawned"], false);
    }

    #[tokio::test]
    async fn test_cleanup_requires_confirmation() {
        let (engine, _table, _) = test_engine(vec![]);
        // Nothing spawned: confirm-less cleanup is a no-op success.
        let response = engine
            .handle(ToolRequest::CleanupUserProcesses { confirm: false })
            .await;
        assert!(response.success);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["total_cleaned"], 0);
    }

    #[tokio::test]
    async fn test_list_allowed_is_sorted_and_complete() {
        let (engine, _, _) = test_engine(vec![]);
        let response = engine.handle(ToolRequest::ListAllowed).await;
        assert!(response.success);
        let json = serde_json::to_value(&response).unwrap();
        let commands: Vec<&str> = json["commands"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        let mut sorted = commands.clone();
        sorted.sort_unstable();
        assert_eq!(commands, sorted);
        assert_eq!(json["tools"].as_array().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_dev_status_reports_infrastructure() {
        let (engine, _, _) = test_engine(vec![
            FakeProcess::new(60, "python.exe").cmdline("python secure_mcp_server.py"),
            FakeProcess::new(61, "notepad.exe").cmdline("notepad"),
        ]);
        let response = engine.handle(ToolRequest::DevStatus).await;
        assert!(response.success);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["mcp_healthy"], true);
        assert_eq!(json["mcp_server_count"], 1);
        assert_eq!(json["user_process_count"], 0);
    }
}
