//! Spawn records
//!
//! Bookkeeping entries for background processes the server itself created.
//! The wire form below is what `server_status` reports; the registry keeps a
//! richer internal record (OS handles are never serialized).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a server-spawned process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SpawnStatus {
    /// The process is alive
    Running,
    /// The process exited on its own
    Exited {
        /// Exit code, when the OS reported one
        code: Option<i32>,
    },
    /// The process was terminated by this server
    Killed,
    /// Liveness could not be determined
    Unknown,
}

/// Wire form of a spawn registry record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SpawnRecord {
    /// PID of the actual target process (not the command wrapper)
    pub pid: u32,
    /// PID of the shell wrapper that launched the target, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrapper_pid: Option<u32>,
    /// The command that was requested
    pub command: String,
    /// Working directory the command ran in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// When the process was started (RFC3339)
    pub started_at: String,
    /// Seconds since the process was started
    pub uptime_seconds: u64,
    /// Current lifecycle status
    pub status: SpawnStatus,
    /// Whether a group handle (job object) guards this process tree
    pub has_group: bool,
}
