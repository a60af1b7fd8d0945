//! Tool requests and reply payloads
//!
//! Every operation the engine exposes is one variant of [`ToolRequest`]; the
//! dispatcher is an exhaustive match over it, so adding an operation without
//! handling it is a compile error. Short Unix-style aliases are resolved at
//! the transport boundary with [`resolve_alias`].

use crate::{PidName, PortEntry, PortOwnerDetail, ProcessDescriptor, SpawnRecord};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A decoded, validated tool request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolRequest {
    /// Search processes by name (or exact PID) at a detail tier
    FindProcess {
        /// Query string; minimum two characters unless it is a PID
        name: String,
        /// Detail tier; defaults to `smart`
        #[serde(default)]
        mode: crate::DetailTier,
        /// Also match against the full command line
        #[serde(default)]
        include_args: bool,
        /// Do not truncate command lines in the result
        #[serde(default)]
        show_full_cmdline: bool,
    },
    /// Terminate a single process (refuses when children would be orphaned)
    KillProcess {
        /// Target PID
        pid: u32,
        /// Escalate to forceful termination if the process ignores the
        /// graceful signal
        #[serde(default)]
        force: bool,
        /// Allow killing a process this server spawned
        #[serde(default, rename = "override")]
        override_user_spawn: bool,
        /// Report what would happen without touching the process
        #[serde(default)]
        dry_run: bool,
    },
    /// Terminate a process and every descendant
    KillProcessTree {
        /// Root PID
        pid: u32,
        /// Escalate to forceful termination per process
        #[serde(default)]
        force: bool,
        /// Report the would-kill set without touching anything
        #[serde(default)]
        dry_run: bool,
    },
    /// Probe the development port catalogue (or one explicit port)
    CheckPorts {
        /// A single port to probe instead of the catalogue
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
    },
    /// One-screen overview: ports, user processes, infrastructure health
    DevStatus,
    /// Managed background servers and port status
    ServerStatus,
    /// Find the process listening on a specific port
    FindProcessByPort {
        /// Port to look up
        port: u16,
    },
    /// Terminate every process this server spawned
    CleanupUserProcesses {
        /// Without this the operation only reports what it would kill
        #[serde(default)]
        confirm: bool,
    },
    /// Execute a validated command, optionally in the background
    ExecuteCommand {
        /// The command line (already validated by the caller's whitelist
        /// collaborator; the engine re-checks membership)
        command: String,
        /// Working directory
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        /// Spawn in the background and track the process
        #[serde(default)]
        background: bool,
    },
    /// List the command whitelist and available tools
    ListAllowed,
}

impl ToolRequest {
    /// The canonical tool name for this request
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::FindProcess { .. } => "find_process",
            Self::KillProcess { .. } => "kill_process",
            Self::KillProcessTree { .. } => "kill_process_tree",
            Self::CheckPorts { .. } => "check_ports",
            Self::DevStatus => "dev_status",
            Self::ServerStatus => "server_status",
            Self::FindProcessByPort { .. } => "find_process_by_port",
            Self::CleanupUserProcesses { .. } => "cleanup_user_processes",
            Self::ExecuteCommand { .. } => "execute_command",
            Self::ListAllowed => "list_allowed",
        }
    }
}

/// Map a short alias to its canonical tool name.
///
/// Unknown names pass through unchanged so the dispatcher can report them.
#[must_use]
pub fn resolve_alias(name: &str) -> &str {
    match name {
        "ps" => "find_process",
        "kill" => "kill_process",
        "killall" => "kill_process_tree",
        "netstat" => "check_ports",
        "status" => "dev_status",
        other => other,
    }
}

/// How a single process was (or would be) terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum KillMethod {
    /// The polite signal; gives the process a chance to clean up
    Graceful,
    /// Immediate termination
    Forceful,
}

impl std::fmt::Display for KillMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Graceful => write!(f, "gracefully terminated"),
            Self::Forceful => write!(f, "forcefully terminated"),
        }
    }
}

/// How a process tree was (or would be) terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum TreeMethod {
    /// Atomic group termination via the OS group handle
    JobObject,
    /// Bottom-up per-process termination
    Manual,
}

/// Reply for `find_process`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FindProcessReply {
    /// Matching descriptors, protected entries first
    pub processes: Vec<ProcessDescriptor>,
    /// Number of matches
    pub count: usize,
}

/// Reply for a performed `kill_process`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct KillReply {
    /// Human summary of what happened
    pub message: String,
    /// Signal family that did the job
    pub method: KillMethod,
    /// Whether the target was a server-spawned process
    pub user_spawned: bool,
}

/// Reply for a `kill_process` dry run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct KillPlan {
    /// Always true; marks the reply as a preview
    pub dry_run: bool,
    /// The process that would be signalled
    pub target: PidName,
    /// Signal family that would be used
    pub method: KillMethod,
}

/// Reply for a performed `kill_process_tree`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct KillTreeReply {
    /// Number of processes observed terminated
    pub processes_killed: usize,
    /// The tree that was targeted, root first
    pub tree: Vec<PidName>,
    /// Mechanism used
    pub method: TreeMethod,
}

/// Reply for a `kill_process_tree` dry run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TreePlan {
    /// Always true; marks the reply as a preview
    pub dry_run: bool,
    /// Every process that would be terminated, root first
    pub would_kill: Vec<PidName>,
    /// Mechanism that would be used
    pub method: TreeMethod,
}

/// Reply for `check_ports`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CheckPortsReply {
    /// Entry per probed port
    pub ports: BTreeMap<u16, PortEntry>,
    /// Orphan and multi-process observations worth a developer's attention
    pub developer_hints: Vec<String>,
}

/// A lightweight user-process row inside `dev_status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UserProcess {
    /// Process ID
    pub pid: u32,
    /// Executable base name
    pub name: String,
    /// Resident memory in base-2 megabytes
    pub memory_mb: f64,
}

/// Reply for `dev_status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DevStatusReply {
    /// When the snapshot was taken
    pub timestamp: String,
    /// Port catalogue status
    pub ports: BTreeMap<u16, PortEntry>,
    /// Live processes spawned by this server
    pub user_processes: Vec<UserProcess>,
    /// Length of `user_processes`
    pub user_process_count: usize,
    /// Whether any infrastructure process is alive
    pub mcp_healthy: bool,
    /// Number of live infrastructure processes
    pub mcp_server_count: usize,
}

/// Reply for `server_status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ServerStatusReply {
    /// Background processes this server manages
    pub managed_servers: Vec<SpawnRecord>,
    /// Port catalogue status
    pub port_status: BTreeMap<u16, PortEntry>,
    /// Observations worth a developer's attention
    pub developer_hints: Vec<String>,
}

/// Reply for `find_process_by_port`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PortLookupReply {
    /// The port that was looked up
    pub port: u16,
    /// Owning process, or `null` when nothing listens there
    #[serde(default)]
    pub process: Option<PortOwnerDetail>,
    /// Present when the port is free
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Reply for a confirmed `cleanup_user_processes`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CleanupReply {
    /// Processes that were terminated
    pub killed: Vec<PidName>,
    /// Processes that survived termination attempts
    pub failed: Vec<PidName>,
    /// Length of `killed`
    pub total_cleaned: usize,
}

/// Reply for a background `execute_command`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SpawnReply {
    /// PID of the actual target process
    pub pid: u32,
    /// PID of the shell wrapper, when one exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrapper_pid: Option<u32>,
    /// Human summary
    pub message: String,
    /// Which orphan-prevention mechanism guards the spawn
    pub orphan_prevention: String,
}

/// Reply for a foreground `execute_command`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RunReply {
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Exit code, when the OS reported one
    #[serde(default)]
    pub return_code: Option<i32>,
}

/// One tool summary row inside `list_allowed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ToolInfo {
    /// Canonical tool name
    pub name: String,
    /// One-line description
    pub summary: String,
}

/// Reply for `list_allowed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ListAllowedReply {
    /// The configured command whitelist, sorted
    pub commands: Vec<String>,
    /// Available tools
    pub tools: Vec<ToolInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_resolution() {
        assert_eq!(resolve_alias("ps"), "find_process");
        assert_eq!(resolve_alias("kill"), "kill_process");
        assert_eq!(resolve_alias("killall"), "kill_process_tree");
        assert_eq!(resolve_alias("netstat"), "check_ports");
        assert_eq!(resolve_alias("status"), "dev_status");
        assert_eq!(resolve_alias("find_process"), "find_process");
        assert_eq!(resolve_alias("bogus"), "bogus");
    }

    #[test]
    fn test_request_tagging_and_defaults() {
        let req: ToolRequest =
            serde_json::from_str(r#"{"tool": "find_process", "name": "chrome"}"#).unwrap();
        match req {
            ToolRequest::FindProcess {
                name,
                mode,
                include_args,
                show_full_cmdline,
            } => {
                assert_eq!(name, "chrome");
                assert_eq!(mode, crate::DetailTier::Smart);
                assert!(!include_args);
                assert!(!show_full_cmdline);
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn test_override_field_wire_name() {
        let req: ToolRequest = serde_json::from_str(
            r#"{"tool": "kill_process", "pid": 42, "override": true}"#,
        )
        .unwrap();
        match req {
            ToolRequest::KillProcess {
                pid,
                override_user_spawn,
                ..
            } => {
                assert_eq!(pid, 42);
                assert!(override_user_spawn);
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn test_tree_method_wire_names() {
        assert_eq!(
            serde_json::to_string(&TreeMethod::JobObject).unwrap(),
            "\"JobObject\""
        );
        assert_eq!(
            serde_json::to_string(&TreeMethod::Manual).unwrap(),
            "\"Manual\""
        );
    }

    #[test]
    fn test_canonical_names() {
        assert_eq!(ToolRequest::DevStatus.name(), "dev_status");
        assert_eq!(
            ToolRequest::CheckPorts { port: None }.name(),
            "check_ports"
        );
    }
}
