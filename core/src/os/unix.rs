//! Unix backend: process groups via `setsid`, signals via `kill`/`killpg`
//!
//! Spawned shells become session leaders in their own process group, so the
//! whole tree can be signalled through the negative process ID. SIGTERM is
//! the graceful signal, SIGKILL the forceful one. ESRCH on delivery means
//! the target already exited and is treated as success; EPERM on delivery to
//! a group we created means the same (ownership changed during teardown).

// Process management requires libc::setsid() in pre_exec.
#![allow(unsafe_code)]

use crate::{CoreError, Result};
use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use std::path::Path;
use std::process::Stdio;
use std::sync::Mutex;
use tokio::process::{Child, Command};
use tracing::debug;

fn shell_command(command: &str, cwd: Option<&Path>) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }
    // Safety: setsid() is async-signal-safe and appropriate for pre_exec.
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
    cmd
}

/// Spawn a detached background shell; output is discarded
///
/// # Errors
///
/// Propagates the spawn failure.
pub fn spawn_shell(command: &str, cwd: Option<&Path>) -> Result<Child> {
    let mut cmd = shell_command(command, cwd);
    cmd.stdout(Stdio::null()).stderr(Stdio::null());
    let child = cmd.spawn().map_err(CoreError::Io)?;
    debug!("Spawned '{}' in new process group", command);
    Ok(child)
}

/// Spawn a foreground shell with captured output, killed when dropped
///
/// # Errors
///
/// Propagates the spawn failure.
pub fn spawn_shell_killable(command: &str, cwd: Option<&Path>) -> Result<Child> {
    let mut cmd = shell_command(command, cwd);
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd.spawn().map_err(CoreError::Io)
}

/// Send SIGTERM (graceful) or SIGKILL (forceful) to a single process
///
/// # Errors
///
/// [`CoreError::PermissionDenied`] on EPERM; other errnos map to
/// [`CoreError::Internal`]. ESRCH is success: the process already exited.
pub async fn terminate(pid: u32, force: bool) -> Result<()> {
    let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
    let target = Pid::from_raw(pid as i32);
    match kill(target, signal) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => {
            debug!("Process {} already exited", pid);
            Ok(())
        }
        Err(Errno::EPERM) => Err(CoreError::PermissionDenied(pid)),
        Err(e) => Err(CoreError::Internal(format!(
            "failed to signal process {pid}: {e}"
        ))),
    }
}

/// Whether the process exists (signal 0 probe)
pub async fn is_alive(pid: u32) -> bool {
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        // EPERM means it exists but belongs to someone else.
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// A Unix process group acting as the group handle
///
/// Empty until a session leader is assigned; terminating it signals the
/// whole group through `killpg`.
#[derive(Debug)]
pub struct Group {
    pgid: Mutex<Option<Pid>>,
}

impl Group {
    /// Create an empty group
    ///
    /// # Errors
    ///
    /// Infallible on Unix; the signature matches the Windows backend.
    pub fn create() -> Result<Self> {
        Ok(Self {
            pgid: Mutex::new(None),
        })
    }

    /// Adopt the process group led by `pid`
    ///
    /// # Errors
    ///
    /// Infallible on Unix; spawned shells are already session leaders.
    pub fn assign(&self, pid: u32) -> Result<()> {
        *self.pgid.lock().expect("group lock poisoned") = Some(Pid::from_raw(pid as i32));
        Ok(())
    }

    /// SIGKILL the entire group
    ///
    /// # Errors
    ///
    /// [`CoreError::Internal`] on unexpected errnos. ESRCH and EPERM are
    /// success: the group is already gone or mid-teardown.
    pub fn terminate(&self) -> Result<()> {
        let Some(pgid) = *self.pgid.lock().expect("group lock poisoned") else {
            return Ok(());
        };
        match killpg(pgid, Signal::SIGKILL) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH | Errno::EPERM) => {
                debug!("Process group {} already exited", pgid);
                Ok(())
            }
            Err(e) => Err(CoreError::Internal(format!(
                "failed to kill process group {pgid}: {e}"
            ))),
        }
    }
}
