//! The sysinfo-backed process table
//!
//! Holds one `sysinfo::System` behind a mutex; `refresh` takes the
//! point-in-time snapshot every request works against. Reads after a refresh
//! are pure in-memory lookups, which is what keeps the deep protection
//! checks and tree walks inside their latency budgets.

use super::{ProbeError, ProbeResult, ProcDetail, ProcRow, ProcessTable};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use sysinfo::{Pid, System};

/// Real process table backed by `sysinfo`
#[derive(Debug)]
pub struct SysinfoTable {
    sys: Mutex<System>,
}

impl SysinfoTable {
    /// Create a table with an empty snapshot; call `refresh` before reading
    #[must_use]
    pub fn new() -> Self {
        Self {
            sys: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoTable {
    fn default() -> Self {
        Self::new()
    }
}

fn row_from(pid: u32, process: &sysinfo::Process) -> ProcRow {
    ProcRow {
        pid,
        name: process.name().to_string(),
        cmdline: process.cmd().join(" "),
    }
}

impl ProcessTable for SysinfoTable {
    fn refresh(&self) {
        let mut sys = self.sys.lock().expect("process table lock poisoned");
        sys.refresh_processes();
    }

    fn refresh_pid(&self, pid: u32) -> bool {
        let mut sys = self.sys.lock().expect("process table lock poisoned");
        sys.refresh_process(Pid::from_u32(pid))
    }

    fn list(&self) -> Vec<ProcRow> {
        let sys = self.sys.lock().expect("process table lock poisoned");
        sys.processes()
            .iter()
            .map(|(pid, process)| row_from(pid.as_u32(), process))
            .collect()
    }

    fn row(&self, pid: u32) -> ProbeResult<ProcRow> {
        let sys = self.sys.lock().expect("process table lock poisoned");
        sys.process(Pid::from_u32(pid))
            .map(|p| row_from(pid, p))
            .ok_or(ProbeError::NotFound)
    }

    fn detail(&self, pid: u32) -> ProbeResult<ProcDetail> {
        let sys = self.sys.lock().expect("process table lock poisoned");
        let process = sys.process(Pid::from_u32(pid)).ok_or(ProbeError::NotFound)?;
        Ok(ProcDetail {
            pid,
            name: process.name().to_string(),
            cmdline: process.cmd().join(" "),
            exe: process.exe().map(|p| p.display().to_string()),
            cwd: process.cwd().map(|p| p.display().to_string()),
            parent_pid: process.parent().map(|p| p.as_u32()),
            start_time: process.start_time(),
            memory_bytes: process.memory(),
            // sysinfo has no portable thread count; the descriptor carries
            // an Option for exactly this case.
            threads: None,
        })
    }

    fn children_of(&self, pid: u32) -> Vec<ProcRow> {
        let sys = self.sys.lock().expect("process table lock poisoned");
        let parent = Pid::from_u32(pid);
        let mut children: Vec<ProcRow> = sys
            .processes()
            .iter()
            .filter(|(_, p)| p.parent() == Some(parent))
            .map(|(child_pid, p)| row_from(child_pid.as_u32(), p))
            .collect();
        children.sort_by_key(|r| r.pid);
        children
    }

    fn start_time(&self, pid: u32) -> Option<u64> {
        let sys = self.sys.lock().expect("process table lock poisoned");
        sys.process(Pid::from_u32(pid)).map(|p| p.start_time())
    }

    fn cpu_sample(&self, pids: &[u32], window: Duration) -> HashMap<u32, f32> {
        // Two refreshes separated by the sampling window; sysinfo computes
        // usage from the delta.
        let wait = window.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        {
            let mut sys = self.sys.lock().expect("process table lock poisoned");
            for pid in pids {
                sys.refresh_process(Pid::from_u32(*pid));
            }
        }
        std::thread::sleep(wait);
        let mut sys = self.sys.lock().expect("process table lock poisoned");
        let mut out = HashMap::with_capacity(pids.len());
        for pid in pids {
            let sys_pid = Pid::from_u32(*pid);
            if sys.refresh_process(sys_pid) {
                if let Some(process) = sys.process(sys_pid) {
                    out.insert(*pid, process.cpu_usage());
                }
            }
        }
        out
    }
}
