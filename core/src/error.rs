//! Core error types and the mapping onto the user-visible taxonomy
//!
//! Every component returns a typed failure rather than aborting. The
//! dispatcher renders failures through [`CoreError::into_body`], which
//! guarantees the hard product requirement that no error reaches the caller
//! without a concrete remediation suggestion and the reason the guard exists.

use schema::{ErrorBody, ErrorKind, PidName, ProtectionReason};
use thiserror::Error;

/// Core-specific error types
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Process {0} not found")]
    ProcessNotFound(u32),

    #[error("Cannot kill protected process {pid} ({name})")]
    ProtectedProcess {
        /// Target PID
        pid: u32,
        /// Executable base name
        name: String,
        /// Why the classifier protects it
        reason: ProtectionReason,
    },

    #[error("Process tree under {root} contains protected process {pid} ({name})")]
    ProtectedDescendant {
        /// Root of the requested tree
        root: u32,
        /// The protected descendant
        pid: u32,
        /// Its executable base name
        name: String,
    },

    #[error("Process {pid} ({name}) was spawned by this server")]
    UserSpawnedGuard {
        /// Target PID
        pid: u32,
        /// Executable base name
        name: String,
    },

    #[error("Process {pid} has {count} child process(es)", count = children.len())]
    HasChildren {
        /// Target PID
        pid: u32,
        /// Its immediate children
        children: Vec<PidName>,
    },

    #[error("Access denied to process {0}")]
    PermissionDenied(u32),

    #[error("Failed to terminate process {pid}")]
    TerminationFailed {
        /// The process (or tree root) that survived
        pid: u32,
        /// PIDs observed terminated before the failure
        killed: Vec<u32>,
        /// PIDs still alive after every permitted signal
        failed: Vec<u32>,
    },

    #[error("{message}")]
    InvalidArgument {
        /// What was wrong with the request
        message: String,
        /// Concrete fix for the caller
        suggestion: String,
    },

    #[error("Command not allowed: {0}")]
    CommandNotAllowed(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Core-specific result type
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Get error code for this error type
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ProcessNotFound(_) => "DG001",
            Self::ProtectedProcess { .. } => "DG002",
            Self::ProtectedDescendant { .. } => "DG003",
            Self::UserSpawnedGuard { .. } => "DG004",
            Self::HasChildren { .. } => "DG005",
            Self::PermissionDenied(_) => "DG006",
            Self::TerminationFailed { .. } => "DG007",
            Self::InvalidArgument { .. } => "DG008",
            Self::CommandNotAllowed(_) => "DG009",
            Self::Timeout(_) => "DG010",
            Self::Io(_) => "DG011",
            Self::Serialization(_) => "DG012",
            Self::Internal(_) => "DG999",
        }
    }

    /// The user-visible classification of this error
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ProcessNotFound(_) => ErrorKind::ProcessNotFound,
            Self::ProtectedProcess { .. } => ErrorKind::ProtectedProcess,
            Self::ProtectedDescendant { .. } => ErrorKind::ProtectedDescendant,
            Self::UserSpawnedGuard { .. } => ErrorKind::UserSpawnedGuard,
            Self::HasChildren { .. } => ErrorKind::HasChildren,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::TerminationFailed { .. } => ErrorKind::TerminationFailed,
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::CommandNotAllowed(_) => ErrorKind::CommandNotAllowed,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Io(_) | Self::Serialization(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Render the three-field error body for the response envelope.
    ///
    /// Internal errors are redacted here; the full detail belongs in the
    /// debug log, not on the wire.
    #[must_use]
    pub fn into_body(self) -> ErrorBody {
        let kind = self.kind();
        match self {
            Self::ProcessNotFound(pid) => ErrorBody::new(
                kind,
                "use find_process to get a live PID",
                "the process may have already terminated",
            )
            .with_detail(serde_json::json!({ "pid": pid })),

            Self::ProtectedProcess { pid, name, reason } => ErrorBody::new(
                kind,
                "pick a PID where protected=false in find_process output",
                "killing an infrastructure or system process would sever the tool channel",
            )
            .with_detail(serde_json::json!({
                "pid": pid,
                "name": name,
                "reason": reason,
            })),

            Self::ProtectedDescendant { root, pid, name } => ErrorBody::new(
                kind,
                "kill the non-protected PIDs individually with kill_process",
                "the tree stays up because terminating it would take down a protected process",
            )
            .with_detail(serde_json::json!({
                "root": root,
                "protected_pid": pid,
                "protected_name": name,
            })),

            Self::UserSpawnedGuard { pid, name } => ErrorBody::new(
                kind,
                "retry with override=true, or use kill_process_tree",
                "this process was started by execute_command; the guard prevents accidental self-sabotage",
            )
            .with_detail(serde_json::json!({ "pid": pid, "name": name })),

            Self::HasChildren { pid, children } => ErrorBody::new(
                kind,
                "use kill_process_tree to terminate the entire tree",
                "orphaned children keep ports bound and may require a system restart",
            )
            .with_detail(serde_json::json!({ "pid": pid, "children": children })),

            Self::PermissionDenied(pid) => ErrorBody::new(
                kind,
                "run the server with elevated privileges",
                "the OS refused to open the process for termination",
            )
            .with_detail(serde_json::json!({ "pid": pid })),

            Self::TerminationFailed { pid, killed, failed } => ErrorBody::new(
                kind,
                "retry with force=true for stubborn processes",
                "the process ignored the graceful signal within the wait budget",
            )
            .with_detail(serde_json::json!({
                "pid": pid,
                "killed": killed,
                "failed": failed,
            })),

            Self::InvalidArgument {
                message,
                suggestion,
            } => ErrorBody::new(kind, suggestion, message),

            Self::CommandNotAllowed(command) => ErrorBody::new(
                kind,
                "use list_allowed to see the command whitelist",
                "arbitrary shell execution is limited to the configured whitelist",
            )
            .with_detail(serde_json::json!({ "command": command })),

            Self::Timeout(what) => ErrorBody::new(
                kind,
                "retry with a narrower query or a faster mode",
                format!("the operation exceeded its time budget: {what}"),
            ),

            Self::Io(_) | Self::Serialization(_) | Self::Internal(_) => ErrorBody::new(
                kind,
                "check the debug log for details and retry",
                "an unexpected condition was hit; the full error was logged server-side",
            ),
        }
    }
}
