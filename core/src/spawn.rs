//! Spawn registry
//!
//! Bookkeeping for background processes this server created: the actual
//! target PID (not the shell wrapper), the wrapper PID, the group handle,
//! and the lifecycle status. The registry exclusively owns group handles;
//! they are released when a record is removed or the server shuts down.
//!
//! Mutations are serialized behind one mutex: the dispatcher registers and
//! discards, the reaper polls liveness every second, and the termination
//! engine consults membership for the user-spawn guard.

use crate::os::{JobGroup, SpawnedChild, Terminator};
use crate::proc::{base_name, ProcessTable};
use crate::{EngineConfig, Result};
use schema::{SpawnRecord, SpawnStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug)]
struct SpawnEntry {
    pid: u32,
    wrapper_pid: Option<u32>,
    command: String,
    cwd: Option<String>,
    started_at_wall: String,
    started_at: Instant,
    status: SpawnStatus,
    group: Option<JobGroup>,
    child: Option<tokio::process::Child>,
    exited_seen: Option<Instant>,
}

/// Registry of server-originated background processes
#[derive(Debug)]
pub struct SpawnRegistry {
    config: Arc<EngineConfig>,
    inner: Mutex<HashMap<u32, SpawnEntry>>,
}

impl SpawnRegistry {
    /// Empty registry
    #[must_use]
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self {
            config,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Register a fresh background spawn and resolve the real target PID.
    ///
    /// When the spawn shell wraps the real command, the first descendant of
    /// the wrapper that is not itself a shell is the target; resolution polls
    /// for up to the configured window. Falls back to the wrapper PID when
    /// nothing shows up (the wrapper may have exec'd in place).
    ///
    /// Returns (reporting PID, wrapper PID).
    pub async fn register(
        &self,
        spawned: SpawnedChild,
        command: &str,
        cwd: Option<String>,
        table: &dyn ProcessTable,
    ) -> (u32, Option<u32>) {
        let wrapper_pid = spawned.wrapper_pid;
        let actual = self.resolve_actual_pid(wrapper_pid, table).await;
        let (pid, wrapper) = match actual {
            Some(actual) if actual != wrapper_pid => (actual, Some(wrapper_pid)),
            _ => (wrapper_pid, None),
        };
        debug!(
            "Registered spawn: command='{}' pid={} wrapper={:?}",
            command, pid, wrapper
        );

        let entry = SpawnEntry {
            pid,
            wrapper_pid: wrapper,
            command: command.to_string(),
            cwd,
            started_at_wall: schema::current_timestamp(),
            started_at: Instant::now(),
            status: SpawnStatus::Running,
            group: spawned.group,
            child: Some(spawned.child),
            exited_seen: None,
        };
        self.inner
            .lock()
            .expect("spawn registry poisoned")
            .insert(pid, entry);
        (pid, wrapper)
    }

    async fn resolve_actual_pid(
        &self,
        wrapper_pid: u32,
        table: &dyn ProcessTable,
    ) -> Option<u32> {
        let deadline = Instant::now() + self.config.wrapper_resolve_window;
        loop {
            table.refresh();
            let candidate = table
                .children_of(wrapper_pid)
                .into_iter()
                .find(|child| {
                    let name = base_name(&child.name);
                    !self.config.wrapper_names.iter().any(|w| *w == name)
                })
                .map(|child| child.pid);
            if candidate.is_some() {
                return candidate;
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Whether a PID belongs to the registry (target or wrapper)
    #[must_use]
    pub fn contains(&self, pid: u32) -> bool {
        let inner = self.inner.lock().expect("spawn registry poisoned");
        inner.contains_key(&pid) || inner.values().any(|e| e.wrapper_pid == Some(pid))
    }

    /// Registered target PIDs
    #[must_use]
    pub fn pids(&self) -> Vec<u32> {
        let inner = self.inner.lock().expect("spawn registry poisoned");
        let mut pids: Vec<u32> = inner.keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    /// Atomically terminate the group guarding `pid`, when one exists.
    ///
    /// Returns None when the registry has no group for the PID; the caller
    /// falls back to manual tree termination.
    pub fn terminate_group(&self, pid: u32) -> Option<Result<()>> {
        let mut inner = self.inner.lock().expect("spawn registry poisoned");
        let entry = inner.get_mut(&pid)?;
        let group = entry.group.as_ref()?;
        let result = group.terminate();
        if result.is_ok() {
            entry.status = SpawnStatus::Killed;
            entry.exited_seen = Some(Instant::now());
        }
        Some(result)
    }

    /// Mark a PID terminated by the engine
    pub fn mark_killed(&self, pid: u32) {
        let mut inner = self.inner.lock().expect("spawn registry poisoned");
        if let Some(entry) = inner.get_mut(&pid) {
            entry.status = SpawnStatus::Killed;
            entry.exited_seen = Some(Instant::now());
        }
    }

    /// Drop a record immediately (target observed gone by an operation)
    pub fn discard(&self, pid: u32) {
        let mut inner = self.inner.lock().expect("spawn registry poisoned");
        if inner.remove(&pid).is_some() {
            debug!("Discarded spawn record for PID {}", pid);
        }
    }

    /// One reaper pass: probe liveness, capture exit codes, and drop
    /// records that have lingered past one probe cycle.
    pub fn poll(&self, table: &dyn ProcessTable) {
        let mut inner = self.inner.lock().expect("spawn registry poisoned");
        for entry in inner.values_mut() {
            if !matches!(entry.status, SpawnStatus::Running | SpawnStatus::Unknown) {
                continue;
            }
            let alive = table.refresh_pid(entry.pid);
            if alive {
                continue;
            }
            let code = entry
                .child
                .as_mut()
                .and_then(|child| child.try_wait().ok().flatten())
                .and_then(|status| status.code());
            entry.status = SpawnStatus::Exited { code };
            entry.exited_seen = Some(Instant::now());
            debug!("Spawned PID {} exited with code {:?}", entry.pid, code);
        }

        let linger = self.config.exited_linger;
        inner.retain(|_, entry| match entry.exited_seen {
            Some(seen) => seen.elapsed() <= linger,
            None => true,
        });
    }

    /// Terminate every live spawn on server shutdown: the group when there
    /// is one, best-effort forceful signals otherwise. This is the only
    /// time the registry initiates termination on its own.
    pub async fn shutdown(&self, terminator: &dyn Terminator) {
        let targets: Vec<(u32, Option<u32>, bool)> = {
            let inner = self.inner.lock().expect("spawn registry poisoned");
            inner
                .values()
                .filter(|entry| matches!(entry.status, SpawnStatus::Running | SpawnStatus::Unknown))
                .map(|entry| {
                    let has_group = entry.group.is_some();
                    (entry.pid, entry.wrapper_pid, has_group)
                })
                .collect()
        };

        for (pid, wrapper, has_group) in targets {
            if has_group {
                if let Some(Err(e)) = self.terminate_group(pid) {
                    warn!("Group termination of PID {} failed: {}", pid, e);
                }
                continue;
            }
            if let Err(e) = terminator.forceful(pid).await {
                warn!("Shutdown kill of PID {} failed: {}", pid, e);
            }
            if let Some(wrapper) = wrapper {
                let _ = terminator.forceful(wrapper).await;
            }
            self.mark_killed(pid);
        }
        info!("Spawn registry shutdown complete");
    }

    /// Wire-form records for `server_status`
    #[must_use]
    pub fn snapshot(&self) -> Vec<SpawnRecord> {
        let inner = self.inner.lock().expect("spawn registry poisoned");
        let mut records: Vec<SpawnRecord> = inner
            .values()
            .map(|entry| SpawnRecord {
                pid: entry.pid,
                wrapper_pid: entry.wrapper_pid,
                command: entry.command.clone(),
                cwd: entry.cwd.clone(),
                started_at: entry.started_at_wall.clone(),
                uptime_seconds: entry.started_at.elapsed().as_secs(),
                status: entry.status,
                has_group: entry.group.is_some(),
            })
            .collect();
        records.sort_by_key(|r| r.pid);
        records
    }
}
