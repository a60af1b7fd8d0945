//! Process table abstraction
//!
//! The engine never talks to the OS process list directly; it goes through
//! the [`ProcessTable`] trait so every component can be exercised against an
//! in-memory table. The real implementation is [`SysinfoTable`]; tests use
//! [`StaticProcessTable`].
//!
//! The trait is shaped around the two-pass enumeration contract: `list`
//! fetches only cheap fields for every process, `detail` enriches a single
//! survivor. Expensive fields are never read for processes a query already
//! rejected.

mod system;
mod testing;

pub use system::SysinfoTable;
pub use testing::{FakeProcess, StaticProcessTable};

use std::collections::HashMap;
use std::time::Duration;

/// Why a per-process probe failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeError {
    /// The PID does not exist (anymore)
    NotFound,
    /// The OS refused access to the process
    AccessDenied,
}

/// Result type for per-process probes
pub type ProbeResult<T> = std::result::Result<T, ProbeError>;

/// Cheap per-process fields, available for every process in one pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcRow {
    /// Process ID
    pub pid: u32,
    /// Executable base name
    pub name: String,
    /// Joined command line; may be empty when the OS withholds it
    pub cmdline: String,
}

/// Enriched per-process fields, fetched only for query survivors
#[derive(Debug, Clone, PartialEq)]
pub struct ProcDetail {
    /// Process ID
    pub pid: u32,
    /// Executable base name
    pub name: String,
    /// Joined command line
    pub cmdline: String,
    /// Resolved executable path
    pub exe: Option<String>,
    /// Working directory
    pub cwd: Option<String>,
    /// Parent process ID
    pub parent_pid: Option<u32>,
    /// Creation time in seconds since the epoch; 0 when unknown
    pub start_time: u64,
    /// Resident memory in bytes
    pub memory_bytes: u64,
    /// Thread count, when the platform exposes it
    pub threads: Option<u32>,
}

/// A point-in-time view of the process list
pub trait ProcessTable: Send + Sync {
    /// Take a fresh snapshot of the whole process list
    fn refresh(&self);

    /// Refresh a single PID; returns false when the process is gone
    fn refresh_pid(&self, pid: u32) -> bool;

    /// Cheap pass over every process
    fn list(&self) -> Vec<ProcRow>;

    /// Cheap fields for one PID
    ///
    /// # Errors
    ///
    /// [`ProbeError::NotFound`] when the PID is gone,
    /// [`ProbeError::AccessDenied`] when the OS withholds the process.
    fn row(&self, pid: u32) -> ProbeResult<ProcRow>;

    /// Enriched fields for one PID
    ///
    /// # Errors
    ///
    /// Same contract as [`ProcessTable::row`].
    fn detail(&self, pid: u32) -> ProbeResult<ProcDetail>;

    /// Immediate children of a PID, cheap fields only
    fn children_of(&self, pid: u32) -> Vec<ProcRow>;

    /// Creation time of a PID, seconds since the epoch
    fn start_time(&self, pid: u32) -> Option<u64>;

    /// Whether the PID currently exists
    fn exists(&self, pid: u32) -> bool {
        self.refresh_pid(pid)
    }

    /// CPU percentage per PID, sampled over at least `window`
    fn cpu_sample(&self, pids: &[u32], window: Duration) -> HashMap<u32, f32>;
}

/// Lower-case base name of an executable path or name
#[must_use]
pub fn base_name(name_or_path: &str) -> String {
    let trimmed = name_or_path.trim_end_matches(['\\', '/']);
    let base = trimmed
        .rsplit(['\\', '/'])
        .next()
        .unwrap_or(trimmed);
    base.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("C:\\Windows\\System32\\csrss.exe"), "csrss.exe");
        assert_eq!(base_name("/usr/bin/python3"), "python3");
        assert_eq!(base_name("Node.exe"), "node.exe");
        assert_eq!(base_name(""), "");
    }
}
