//! Platform adapter: spawning, signalling, group handles
//!
//! One seam, two backends. The Windows backend is the product target (job
//! objects, taskkill, cmd wrappers); the Unix backend exists so the engine
//! develops and tests anywhere (process groups via `setsid`, SIGTERM/SIGKILL
//! through `killpg`). Components depend on the [`Terminator`] trait, not the
//! platform functions, so tests substitute [`ScriptedTerminator`].

#[cfg(unix)]
pub mod unix;
#[cfg(windows)]
pub mod windows;

#[cfg(unix)]
use unix as platform;
#[cfg(windows)]
use windows as platform;

use crate::proc::{ProcessTable, StaticProcessTable};
use crate::{CoreError, Result};
use async_trait::async_trait;
use schema::RunReply;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Sends termination signals and probes liveness
#[async_trait]
pub trait Terminator: Send + Sync {
    /// Deliver the polite termination signal. Delivering to an
    /// already-exited process is success, not an error.
    async fn graceful(&self, pid: u32) -> Result<()>;

    /// Deliver the forceful termination signal
    async fn forceful(&self, pid: u32) -> Result<()>;

    /// Whether the process currently exists
    async fn alive(&self, pid: u32) -> bool;
}

/// The real, platform-backed terminator
#[derive(Debug, Default, Clone, Copy)]
pub struct OsTerminator;

impl OsTerminator {
    /// Create the platform terminator
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Terminator for OsTerminator {
    async fn graceful(&self, pid: u32) -> Result<()> {
        platform::terminate(pid, false).await
    }

    async fn forceful(&self, pid: u32) -> Result<()> {
        platform::terminate(pid, true).await
    }

    async fn alive(&self, pid: u32) -> bool {
        platform::is_alive(pid).await
    }
}

/// An OS-level group handle that terminates a whole process tree atomically.
///
/// On Windows this is a job object created with kill-on-close; on Unix it is
/// the process group a spawned session leader owns. Each handle is owned by
/// exactly one spawn registry record and released when the record goes away.
#[derive(Debug)]
pub struct JobGroup(platform::Group);

impl JobGroup {
    /// Create an empty group
    ///
    /// # Errors
    ///
    /// Propagates the OS error when the group object cannot be created.
    pub fn create() -> Result<Self> {
        platform::Group::create().map(Self)
    }

    /// Put a process (and, transitively, its future children) in the group
    ///
    /// # Errors
    ///
    /// [`CoreError::PermissionDenied`] when the OS refuses the process.
    pub fn assign(&self, pid: u32) -> Result<()> {
        self.0.assign(pid)
    }

    /// Terminate every process in the group
    ///
    /// # Errors
    ///
    /// Propagates the OS error; an already-empty group is success.
    pub fn terminate(&self) -> Result<()> {
        self.0.terminate()
    }
}

/// A background process freshly spawned through the platform shell wrapper
#[derive(Debug)]
pub struct SpawnedChild {
    /// PID of the wrapper (`cmd.exe /C` on Windows, `sh -c` on Unix)
    pub wrapper_pid: u32,
    /// Handle to the wrapper for exit observation
    pub child: tokio::process::Child,
    /// Group handle when group creation succeeded
    pub group: Option<JobGroup>,
}

/// Spawn a command in the background through the platform shell.
///
/// The group handle is created and the wrapper assigned to it before this
/// function returns, so everything the wrapper goes on to start is inside
/// the group. When group creation fails the spawn still proceeds and the
/// record is marked groupless.
///
/// # Errors
///
/// Propagates spawn failures from the OS.
pub async fn spawn_background(command: &str, cwd: Option<&Path>) -> Result<SpawnedChild> {
    debug!("Spawning background command: {}", command);
    let child = platform::spawn_shell(command, cwd)?;
    let wrapper_pid = child
        .id()
        .ok_or_else(|| CoreError::Internal("spawned child had no PID".to_string()))?;

    let group = match JobGroup::create().and_then(|group| {
        group.assign(wrapper_pid)?;
        Ok(group)
    }) {
        Ok(group) => Some(group),
        Err(e) => {
            warn!(
                "Group creation for PID {} failed, falling back to tracking: {}",
                wrapper_pid, e
            );
            None
        }
    };

    Ok(SpawnedChild {
        wrapper_pid,
        child,
        group,
    })
}

/// Run a command in the foreground with a hard timeout.
///
/// # Errors
///
/// [`CoreError::Timeout`] when the command outlives `timeout`; spawn and IO
/// failures otherwise. A non-zero exit is not an error, the reply carries
/// the exit code.
pub async fn run_foreground(
    command: &str,
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<RunReply> {
    let child = platform::spawn_shell_killable(command, cwd)?;
    // kill_on_drop: a timeout drops the child handle and reaps the process.
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => {
            let output = output?;
            Ok(RunReply {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                return_code: output.status.code(),
            })
        }
        Err(_) => Err(CoreError::Timeout(format!(
            "command did not finish within {} seconds",
            timeout.as_secs()
        ))),
    }
}

/// Scripted terminator for tests: delivers "signals" by mutating a
/// [`StaticProcessTable`], with configurable stubborn and access-denied
/// processes, and a call log for assertions.
#[derive(Debug)]
pub struct ScriptedTerminator {
    table: Arc<StaticProcessTable>,
    stubborn: Mutex<HashSet<u32>>,
    denied: Mutex<HashSet<u32>>,
    calls: Mutex<Vec<(u32, bool)>>,
}

impl ScriptedTerminator {
    /// Terminator over the given fabricated process table
    #[must_use]
    pub fn new(table: Arc<StaticProcessTable>) -> Self {
        Self {
            table,
            stubborn: Mutex::new(HashSet::new()),
            denied: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Make a PID ignore graceful signals
    pub fn make_stubborn(&self, pid: u32) {
        self.stubborn.lock().expect("terminator poisoned").insert(pid);
    }

    /// Make the OS deny termination of a PID
    pub fn deny(&self, pid: u32) {
        self.denied.lock().expect("terminator poisoned").insert(pid);
    }

    /// The (pid, force) signal deliveries so far, in order
    #[must_use]
    pub fn calls(&self) -> Vec<(u32, bool)> {
        self.calls.lock().expect("terminator poisoned").clone()
    }
}

#[async_trait]
impl Terminator for ScriptedTerminator {
    async fn graceful(&self, pid: u32) -> Result<()> {
        self.calls
            .lock()
            .expect("terminator poisoned")
            .push((pid, false));
        if self.denied.lock().expect("terminator poisoned").contains(&pid) {
            return Err(CoreError::PermissionDenied(pid));
        }
        if !self
            .stubborn
            .lock()
            .expect("terminator poisoned")
            .contains(&pid)
        {
            self.table.remove(pid);
        }
        Ok(())
    }

    async fn forceful(&self, pid: u32) -> Result<()> {
        self.calls
            .lock()
            .expect("terminator poisoned")
            .push((pid, true));
        if self.denied.lock().expect("terminator poisoned").contains(&pid) {
            return Err(CoreError::PermissionDenied(pid));
        }
        self.table.remove(pid);
        Ok(())
    }

    async fn alive(&self, pid: u32) -> bool {
        self.table.exists(pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proc::FakeProcess;

    #[tokio::test]
    async fn test_scripted_terminator_graceful_and_stubborn() {
        let table = Arc::new(StaticProcessTable::with_processes(vec![
            FakeProcess::new(1, "a.exe"),
            FakeProcess::new(2, "b.exe"),
        ]));
        let term = ScriptedTerminator::new(table.clone());
        term.make_stubborn(2);

        term.graceful(1).await.unwrap();
        assert!(!term.alive(1).await);

        term.graceful(2).await.unwrap();
        assert!(term.alive(2).await);
        term.forceful(2).await.unwrap();
        assert!(!term.alive(2).await);

        assert_eq!(term.calls(), vec![(1, false), (2, false), (2, true)]);
    }

    #[tokio::test]
    async fn test_scripted_terminator_denies() {
        let table = Arc::new(StaticProcessTable::with_processes(vec![FakeProcess::new(
            3, "c.exe",
        )]));
        let term = ScriptedTerminator::new(table);
        term.deny(3);
        assert!(matches!(
            term.graceful(3).await.unwrap_err(),
            CoreError::PermissionDenied(3)
        ));
        assert!(term.alive(3).await);
    }

    #[tokio::test]
    async fn test_run_foreground_captures_output() {
        let reply = run_foreground("echo hello", None, Duration::from_secs(10))
            .await
            .unwrap();
        assert!(reply.stdout.contains("hello"));
        assert_eq!(reply.return_code, Some(0));
    }

    #[tokio::test]
    async fn test_run_foreground_times_out() {
        #[cfg(unix)]
        let cmd = "sleep 5";
        #[cfg(windows)]
        let cmd = "ping -n 6 127.0.0.1";
        let err = run_foreground(cmd, None, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_spawn_background_reports_wrapper_pid() {
        #[cfg(unix)]
        let cmd = "sleep 2";
        #[cfg(windows)]
        let cmd = "ping -n 3 127.0.0.1";
        let mut spawned = spawn_background(cmd, None).await.unwrap();
        assert!(spawned.wrapper_pid > 0);
        if let Some(group) = &spawned.group {
            group.terminate().unwrap();
        }
        let _ = spawned.child.kill().await;
    }
}
