//! Windows backend: job objects, taskkill, cmd wrappers
//!
//! Background commands run through `cmd /C` with CREATE_NO_WINDOW, and
//! never CREATE_NEW_PROCESS_GROUP, which would detach children from the
//! console tree and defeat cleanup. Graceful termination is `taskkill`,
//! forceful is `taskkill /F`. The group handle is a job object created with
//! KILL_ON_JOB_CLOSE so the tree cannot outlive its handle.

// Job objects are raw Win32 handles.
#![allow(unsafe_code)]

use crate::{CoreError, Result};
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::debug;
use windows_sys::Win32::Foundation::CloseHandle;
use windows_sys::Win32::System::JobObjects::{
    AssignProcessToJobObject, CreateJobObjectW, JobObjectExtendedLimitInformation,
    SetInformationJobObject, TerminateJobObject, JOBOBJECT_EXTENDED_LIMIT_INFORMATION,
    JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE,
};
use windows_sys::Win32::System::Threading::{
    OpenProcess, CREATE_NO_WINDOW, PROCESS_SET_QUOTA, PROCESS_TERMINATE,
};

fn shell_command(command: &str, cwd: Option<&Path>) -> Command {
    use std::os::windows::process::CommandExt;
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }
    cmd.creation_flags(CREATE_NO_WINDOW);
    cmd
}

/// Spawn a detached background command through `cmd /C`; output is discarded
///
/// # Errors
///
/// Propagates the spawn failure.
pub fn spawn_shell(command: &str, cwd: Option<&Path>) -> Result<Child> {
    let mut cmd = shell_command(command, cwd);
    cmd.stdout(Stdio::null()).stderr(Stdio::null());
    let child = cmd.spawn().map_err(CoreError::Io)?;
    debug!("Spawned '{}' behind cmd wrapper", command);
    Ok(child)
}

/// Spawn a foreground command with captured output, killed when dropped
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

/// Terminate one process via taskkill (`/F` when forceful)
///
/// # Errors
///
/// [`CoreError::PermissionDenied`] when taskkill reports access denied;
/// [`CoreError::Internal`] for anything else unexpected. "Not found" and
/// "already terminated" are success.
pub async fn terminate(pid: u32, force: bool) -> Result<()> {
    let mut cmd = Command::new("taskkill");
    cmd.arg("/PID").arg(pid.to_string());
    if force {
        cmd.arg("/F");
    }
    let output = cmd.output().await.map_err(CoreError::Io)?;
    if output.status.success() {
        debug!(pid = pid, force = force, "taskkill succeeded");
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let combined = format!("{stdout} {stderr}");

    if combined.contains("not found") || combined.contains("could not be found") {
        debug!(pid = pid, "Process already gone");
        return Ok(());
    }
    if combined.contains("already been terminated") || combined.contains("has exited") {
        return Ok(());
    }
    if combined.to_lowercase().contains("access is denied") {
        return Err(CoreError::PermissionDenied(pid));
    }
    Err(CoreError::Internal(format!(
        "taskkill on {pid} failed: {}",
        combined.trim()
    )))
}

/// Whether the process exists, via a tasklist PID filter
pub async fn is_alive(pid: u32) -> bool {
    let output = Command::new("tasklist")
        .arg("/FI")
        .arg(format!("PID eq {pid}"))
        .arg("/NH")
        .arg("/FO")
        .arg("CSV")
        .output()
        .await;
    match output {
        Ok(output) => String::from_utf8_lossy(&output.stdout).contains(&format!("\"{pid}\"")),
        Err(_) => false,
    }
}

/// A job object acting as the group handle
///
/// Created with KILL_ON_JOB_CLOSE: closing the last handle terminates every
/// process still in the job, so a dropped group can never leak its tree.
#[derive(Debug)]
pub struct Group {
    handle: isize,
}

// The job handle is only ever used through Win32 calls that are safe from
// any thread.
unsafe impl Send for Group {}
unsafe impl Sync for Group {}

impl Group {
    /// Create an anonymous job object with kill-on-close
    ///
    /// # Errors
    ///
    /// Propagates the OS error when creation or configuration fails.
    pub fn create() -> Result<Self> {
        let handle = unsafe { CreateJobObjectW(std::ptr::null(), std::ptr::null()) };
        if handle == 0 {
            return Err(CoreError::Io(std::io::Error::last_os_error()));
        }

        let mut info: JOBOBJECT_EXTENDED_LIMIT_INFORMATION = unsafe { std::mem::zeroed() };
        info.BasicLimitInformation.LimitFlags = JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE;
        let ok = unsafe {
            SetInformationJobObject(
                handle,
                JobObjectExtendedLimitInformation,
                std::ptr::addr_of!(info).cast(),
                std::mem::size_of::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>() as u32,
            )
        };
        if ok == 0 {
            let err = std::io::Error::last_os_error();
            unsafe { CloseHandle(handle) };
            return Err(CoreError::Io(err));
        }
        Ok(Self { handle })
    }

    /// Assign a process to the job; its future children are included
    ///
    /// # Errors
    ///
    /// [`CoreError::PermissionDenied`] when the process cannot be opened.
    pub fn assign(&self, pid: u32) -> Result<()> {
        let process = unsafe { OpenProcess(PROCESS_SET_QUOTA | PROCESS_TERMINATE, 0, pid) };
        if process == 0 {
            return Err(CoreError::PermissionDenied(pid));
        }
        let ok = unsafe { AssignProcessToJobObject(self.handle, process) };
        unsafe { CloseHandle(process) };
        if ok == 0 {
            return Err(CoreError::Io(std::io::Error::last_os_error()));
        }
        debug!("Assigned PID {} to job object", pid);
        Ok(())
    }

    /// Terminate every process in the job
    ///
    /// # Errors
    ///
    /// Propagates the OS error.
    pub fn terminate(&self) -> Result<()> {
        let ok = unsafe { TerminateJobObject(self.handle, 0) };
        if ok == 0 {
            return Err(CoreError::Io(std::io::Error::last_os_error()));
        }
        Ok(())
    }
}

impl Drop for Group {
    fn drop(&mut self) {
        unsafe { CloseHandle(self.handle) };
    }
}
