//! Protection verdicts
//!
//! The protection classifier answers, for a given PID, whether killing the
//! process is forbidden and why. Verdicts are cached with a short TTL; the
//! `decided_at` timestamp records when the answer was computed.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Why a process is, or is not, protected from termination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ProtectionReason {
    /// The process may be terminated
    NotProtected,
    /// Name or command line matched an infrastructure token
    PatternMatch,
    /// An ancestor (up to 8 levels) matched an infrastructure token
    ParentProtected,
    /// An immediate child matched an infrastructure token
    ChildProtected,
    /// A script interpreter whose script file name contains a protected token
    ScriptContent,
    /// Critical operating system process
    SystemCritical,
    /// The classifier could not decide; treated as protected (fail-safe)
    Unknown,
}

impl ProtectionReason {
    /// Whether this reason implies the process must not be killed
    #[must_use]
    pub const fn is_protected(self) -> bool {
        !matches!(self, Self::NotProtected)
    }
}

/// The protection classifier's answer for a PID at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProtectionVerdict {
    /// Whether termination of this process is forbidden
    pub protected: bool,
    /// The reason behind the verdict
    pub reason: ProtectionReason,
    /// When the verdict was computed (RFC3339)
    pub decided_at: String,
}

impl ProtectionVerdict {
    /// Build a verdict decided now
    #[must_use]
    pub fn new(reason: ProtectionReason) -> Self {
        Self {
            protected: reason.is_protected(),
            reason,
            decided_at: crate::current_timestamp(),
        }
    }

    /// Verdict for a process nobody needs to worry about
    #[must_use]
    pub fn not_protected() -> Self {
        Self::new(ProtectionReason::NotProtected)
    }
}
