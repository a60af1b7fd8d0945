//! Port inspection entries
//!
//! A fixed catalogue of development ports is probed in parallel; each entry
//! records the port's status and, when active, the owning process plus any
//! extra listeners sharing the port (a parent with forked workers, usually).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Whether anything is listening on a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PortStatus {
    /// A listener is bound to the port
    Active,
    /// Nothing is listening
    Inactive,
    /// The probe could not decide
    Unknown,
}

/// Summary of the process that owns a listening port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PortOwner {
    /// Owning process ID (the first listener found)
    pub pid: u32,
    /// Executable base name
    pub name: String,
    /// Whether the owner has child processes attached
    pub has_children: bool,
    /// Total processes observed on this port (owner plus extras plus children)
    pub total_processes: u32,
}

/// One watched port's inspection result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PortEntry {
    /// Port number
    pub port: u16,
    /// Human label for the service conventionally bound here
    pub service: String,
    /// Probe outcome
    pub status: PortStatus,
    /// Owning process, when the port is active and the owner resolvable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<PortOwner>,
    /// Further PIDs listening on the same port
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_processes: Vec<u32>,
}

impl PortEntry {
    /// An inactive entry with just the label filled in
    #[must_use]
    pub fn inactive(port: u16, service: impl Into<String>) -> Self {
        Self {
            port,
            service: service.into(),
            status: PortStatus::Inactive,
            process: None,
            extra_processes: Vec::new(),
        }
    }
}

/// Detailed owner used by the single-port lookup operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PortOwnerDetail {
    /// Owning process ID
    pub pid: u32,
    /// Executable base name
    pub name: String,
    /// Command line, truncated for display
    pub cmdline: String,
    /// Whether the owner was spawned by this server
    pub user_spawned: bool,
}
