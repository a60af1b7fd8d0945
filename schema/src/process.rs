//! Process descriptors and detail tiers
//!
//! The canonical process snapshot exposed to callers, plus the detail tier
//! ladder that controls how much of it gets populated. Tiers trade fields for
//! latency; the budgets below are upper bounds on a host with ~600 processes.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Detail tier for process queries.
///
/// Each tier has a latency budget and a fixed field set:
/// - `Instant` (50 ms): pid and name only
/// - `Quick` (200 ms): adds memory, parent PID, and protection flag
/// - `Smart` (500 ms): `Quick` plus a children summary; degrades to `Quick`
///   for browser-like result sets
/// - `Full` (2000 ms): everything, including a sampled CPU percentage and
///   full child descriptors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum DetailTier {
    /// PIDs and names only
    Instant,
    /// Basic info, no CPU and no children
    Quick,
    /// Balanced defaults, auto-downgraded for browser swarms
    #[default]
    Smart,
    /// Everything, including CPU sampling
    Full,
}

impl DetailTier {
    /// Upper-bound latency for this tier on a host with at most 600 processes
    #[must_use]
    pub const fn latency_budget(self) -> Duration {
        match self {
            Self::Instant => Duration::from_millis(50),
            Self::Quick => Duration::from_millis(200),
            Self::Smart => Duration::from_millis(500),
            Self::Full => Duration::from_millis(2000),
        }
    }

    /// Whether descriptors at this tier carry memory and parent information
    #[must_use]
    pub const fn carries_memory(self) -> bool {
        !matches!(self, Self::Instant)
    }
}

/// A (pid, name) pair; the minimal reference to a process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PidName {
    /// Process ID
    pub pid: u32,
    /// Executable base name
    pub name: String,
}

/// Coarse classification of a process for display purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProcessCategory {
    /// Part of the tool channel infrastructure
    Infrastructure,
    /// Operating system process
    System,
    /// Script runtime (python, node, ...)
    ScriptRuntime,
    /// Web browser
    Browser,
    /// Anything else
    User,
}

/// The canonical process snapshot exposed to callers.
///
/// Which fields are populated depends on the [`DetailTier`] the snapshot was
/// taken at; absent fields serialize as `null` or are omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProcessDescriptor {
    /// Process ID
    pub pid: u32,
    /// Executable base name; never empty for a live process
    pub name: String,
    /// Command line, possibly truncated (see `cmdline_truncated`)
    #[serde(default)]
    pub cmdline: String,
    /// Whether `cmdline` was truncated for display
    #[serde(default)]
    pub cmdline_truncated: bool,
    /// Working directory, when the OS exposes it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Parent process ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_pid: Option<u32>,
    /// Creation timestamp (wall clock, RFC3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    /// Resident memory in bytes
    #[serde(default)]
    pub memory_bytes: u64,
    /// Resident memory in base-2 megabytes, two decimals
    #[serde(default)]
    pub memory_mb: f64,
    /// Human-readable memory string (see [`format_memory_human`])
    #[serde(default)]
    pub memory_human: String,
    /// CPU percentage sampled over at least 100 ms; only in `Full` tier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f32>,
    /// Thread count, when the platform exposes it cheaply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threads: Option<u32>,
    /// Immediate children; never contains `pid` itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<PidName>>,
    /// Number of immediate children, when children were inspected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children_count: Option<u32>,
    /// Whether the protection classifier forbids killing this process
    pub protected: bool,
    /// Why the process is (or is not) protected
    pub protection_reason: crate::ProtectionReason,
    /// Whether this process was spawned by the devguard server itself
    #[serde(default)]
    pub user_spawned: bool,
    /// Coarse display category
    pub category: ProcessCategory,
    /// Human warning attached to protected processes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Resident memory in base-2 megabytes, rounded to two decimals
#[must_use]
pub fn memory_mb(bytes: u64) -> f64 {
    let mb = bytes as f64 / (1024.0 * 1024.0);
    (mb * 100.0).round() / 100.0
}

/// Format a byte count for humans.
///
/// Below 1024 MB the value renders as megabytes with one decimal; at or
/// above, as gigabytes with two decimals. Division is base-2 throughout, so
/// the rendering is monotonic with the underlying byte count.
#[must_use]
pub fn format_memory_human(bytes: u64) -> String {
    let mb = bytes as f64 / (1024.0 * 1024.0);
    if mb < 1024.0 {
        format!("{mb:.1} MB")
    } else {
        format!("{:.2} GB", mb / 1024.0)
    }
}
