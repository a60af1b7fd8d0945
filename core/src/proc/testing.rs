//! In-memory process table for tests
//!
//! `StaticProcessTable` lets a test stand up an arbitrary process tree,
//! simulate access-denied processes, and observe terminations, without ever
//! touching the real OS. It backs both unit tests and the engine integration
//! tests, and `ScriptedTerminator` (in `crate::os`) mutates it to emulate
//! signal delivery.

use super::{ProbeError, ProbeResult, ProcDetail, ProcRow, ProcessTable};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// One fabricated process
#[derive(Debug, Clone)]
pub struct FakeProcess {
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
    /// Parent PID
    pub parent_pid: Option<u32>,
    /// Creation time, seconds since the epoch
    pub start_time: u64,
    /// Resident memory in bytes
    pub memory_bytes: u64,
    /// CPU percentage reported by sampling
    pub cpu_percent: f32,
    /// Thread count
    pub threads: Option<u32>,
    /// Simulate the OS denying access to this process
    pub access_denied: bool,
}

impl FakeProcess {
    /// A plain process with sensible defaults
    #[must_use]
    pub fn new(pid: u32, name: &str) -> Self {
        Self {
            pid,
            name: name.to_string(),
            cmdline: name.to_string(),
            exe: None,
            cwd: None,
            parent_pid: None,
            start_time: 1_000_000,
            memory_bytes: 10 * 1024 * 1024,
            cpu_percent: 0.0,
            threads: Some(4),
            access_denied: false,
        }
    }

    /// Set the command line
    #[must_use]
    pub fn cmdline(mut self, cmdline: &str) -> Self {
        self.cmdline = cmdline.to_string();
        self
    }

    /// Set the parent PID
    #[must_use]
    pub fn parent(mut self, pid: u32) -> Self {
        self.parent_pid = Some(pid);
        self
    }

    /// Set resident memory
    #[must_use]
    pub fn memory(mut self, bytes: u64) -> Self {
        self.memory_bytes = bytes;
        self
    }

    /// Set the creation time
    #[must_use]
    pub fn started(mut self, start_time: u64) -> Self {
        self.start_time = start_time;
        self
    }

    /// Mark the process access-denied
    #[must_use]
    pub fn denied(mut self) -> Self {
        self.access_denied = true;
        self
    }
}

/// In-memory [`ProcessTable`] implementation
#[derive(Debug, Default)]
pub struct StaticProcessTable {
    inner: Mutex<HashMap<u32, FakeProcess>>,
}

impl StaticProcessTable {
    /// Empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Table pre-populated with the given processes
    #[must_use]
    pub fn with_processes(processes: Vec<FakeProcess>) -> Self {
        let table = Self::new();
        for p in processes {
            table.insert(p);
        }
        table
    }

    /// Add or replace a process
    pub fn insert(&self, process: FakeProcess) {
        self.inner
            .lock()
            .expect("static table poisoned")
            .insert(process.pid, process);
    }

    /// Remove a process, as if it exited
    pub fn remove(&self, pid: u32) {
        self.inner.lock().expect("static table poisoned").remove(&pid);
    }

    /// Number of live fabricated processes
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("static table poisoned").len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace a process's creation time, simulating PID reuse
    pub fn restart_as(&self, pid: u32, start_time: u64) {
        let mut inner = self.inner.lock().expect("static table poisoned");
        if let Some(p) = inner.get_mut(&pid) {
            p.start_time = start_time;
        }
    }
}

impl ProcessTable for StaticProcessTable {
    fn refresh(&self) {}

    fn refresh_pid(&self, pid: u32) -> bool {
        self.inner
            .lock()
            .expect("static table poisoned")
            .contains_key(&pid)
    }

    fn list(&self) -> Vec<ProcRow> {
        let inner = self.inner.lock().expect("static table poisoned");
        let mut rows: Vec<ProcRow> = inner
            .values()
            .map(|p| ProcRow {
                pid: p.pid,
                name: p.name.clone(),
                cmdline: p.cmdline.clone(),
            })
            .collect();
        rows.sort_by_key(|r| r.pid);
        rows
    }

    fn row(&self, pid: u32) -> ProbeResult<ProcRow> {
        let inner = self.inner.lock().expect("static table poisoned");
        let p = inner.get(&pid).ok_or(ProbeError::NotFound)?;
        if p.access_denied {
            return Err(ProbeError::AccessDenied);
        }
        Ok(ProcRow {
            pid: p.pid,
            name: p.name.clone(),
            cmdline: p.cmdline.clone(),
        })
    }

    fn detail(&self, pid: u32) -> ProbeResult<ProcDetail> {
        let inner = self.inner.lock().expect("static table poisoned");
        let p = inner.get(&pid).ok_or(ProbeError::NotFound)?;
        if p.access_denied {
            return Err(ProbeError::AccessDenied);
        }
        Ok(ProcDetail {
            pid: p.pid,
            name: p.name.clone(),
            cmdline: p.cmdline.clone(),
            exe: p.exe.clone(),
            cwd: p.cwd.clone(),
            parent_pid: p.parent_pid,
            start_time: p.start_time,
            memory_bytes: p.memory_bytes,
            threads: p.threads,
        })
    }

    fn children_of(&self, pid: u32) -> Vec<ProcRow> {
        let inner = self.inner.lock().expect("static table poisoned");
        let mut rows: Vec<ProcRow> = inner
            .values()
            .filter(|p| p.parent_pid == Some(pid))
            .map(|p| ProcRow {
                pid: p.pid,
                name: p.name.clone(),
                cmdline: p.cmdline.clone(),
            })
            .collect();
        rows.sort_by_key(|r| r.pid);
        rows
    }

    fn start_time(&self, pid: u32) -> Option<u64> {
        self.inner
            .lock()
            .expect("static table poisoned")
            .get(&pid)
            .map(|p| p.start_time)
    }

    fn cpu_sample(&self, pids: &[u32], _window: Duration) -> HashMap<u32, f32> {
        let inner = self.inner.lock().expect("static table poisoned");
        pids.iter()
            .filter_map(|pid| inner.get(pid).map(|p| (*pid, p.cpu_percent)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_shape() {
        let table = StaticProcessTable::with_processes(vec![
            FakeProcess::new(100, "node.exe"),
            FakeProcess::new(101, "node.exe").parent(100),
            FakeProcess::new(102, "node.exe").parent(100),
        ]);
        assert_eq!(table.children_of(100).len(), 2);
        assert!(table.children_of(101).is_empty());
        assert!(table.exists(100));
        table.remove(100);
        assert!(!table.exists(100));
    }

    #[test]
    fn test_access_denied_probe() {
        let table =
            StaticProcessTable::with_processes(vec![FakeProcess::new(50, "secret.exe").denied()]);
        assert_eq!(table.row(50).unwrap_err(), ProbeError::AccessDenied);
        assert_eq!(table.detail(50).unwrap_err(), ProbeError::AccessDenied);
        // Denied processes still count as existing.
        assert!(table.exists(50));
    }
}
