//! Protection classifier
//!
//! Decides, for any PID, whether killing the process is forbidden and why.
//! Evaluation is three-tiered and first-wins:
//!
//! 1. Pattern match against infrastructure tokens and the system-critical
//!    set; cheap, needs only name and command line.
//! 2. Cache lookup.
//! 3. Deep inspection over the current snapshot: parent chain up to 8
//!    ancestors, immediate children, and the script-content check.
//!
//! Fail-safe: any uncertainty that cannot be resolved (access denied,
//! races with process exit mid-walk) yields Protected with reason Unknown,
//! never NotProtected. A PID that no longer exists yields
//! [`CoreError::ProcessNotFound`]; callers must treat that as neither
//! protected nor killable.

mod cache;

pub use cache::VerdictCache;

use crate::proc::{base_name, ProbeError, ProcRow, ProcessTable};
use crate::{CoreError, EngineConfig, Result};
use schema::{ProtectionReason, ProtectionVerdict};

/// Maximum ancestors examined during deep inspection
const MAX_ANCESTORS: usize = 8;

/// The protection classifier; owns its verdict cache
#[derive(Debug)]
pub struct ProtectionClassifier {
    tokens: Vec<String>,
    system_critical: Vec<String>,
    critical_pids: Vec<u32>,
    interpreters: Vec<String>,
    cache: VerdictCache,
}

impl ProtectionClassifier {
    /// Build a classifier from the engine configuration
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            tokens: config.infra_tokens.iter().map(|t| t.to_lowercase()).collect(),
            system_critical: config
                .system_critical
                .iter()
                .map(|n| n.to_lowercase())
                .collect(),
            critical_pids: config.critical_pids.clone(),
            interpreters: config
                .script_interpreters
                .iter()
                .map(|n| n.to_lowercase())
                .collect(),
            cache: VerdictCache::new(
                config.protection_cache_capacity,
                config.protection_cache_ttl,
            ),
        }
    }

    /// Tier-1 check: does the name or command line carry an infrastructure
    /// token?
    #[must_use]
    pub fn matches_pattern(&self, name: &str, cmdline: &str) -> bool {
        let name = name.to_lowercase();
        let cmdline = cmdline.to_lowercase();
        self.tokens
            .iter()
            .any(|token| name.contains(token) || cmdline.contains(token))
    }

    /// Tier-1 check: is this one of the operating system's untouchables?
    #[must_use]
    pub fn is_system_critical(&self, pid: u32, name: &str) -> bool {
        if self.critical_pids.contains(&pid) {
            return true;
        }
        let name = base_name(name);
        self.system_critical.iter().any(|n| *n == name)
    }

    /// Classify a PID against the given snapshot.
    ///
    /// # Errors
    ///
    /// [`CoreError::ProcessNotFound`] when the PID does not exist; the
    /// triggering operation reports that directly.
    pub fn classify(&self, pid: u32, table: &dyn ProcessTable) -> Result<ProtectionVerdict> {
        let row = match table.row(pid) {
            Ok(row) => row,
            Err(ProbeError::NotFound) => {
                self.cache.invalidate(pid);
                return Err(CoreError::ProcessNotFound(pid));
            }
            // The OS withheld the process: err on the side of caution.
            Err(ProbeError::AccessDenied) => {
                return Ok(ProtectionVerdict::new(ProtectionReason::Unknown));
            }
        };

        // Tier 1: pattern and system-critical checks on the cheap fields.
        if self.is_system_critical(pid, &row.name) {
            return Ok(ProtectionVerdict::new(ProtectionReason::SystemCritical));
        }
        if self.matches_pattern(&base_name(&row.name), &row.cmdline) {
            return Ok(ProtectionVerdict::new(ProtectionReason::PatternMatch));
        }

        // Tier 2: cache, revalidated against the creation time.
        let start_time = table.start_time(pid).unwrap_or(0);
        if let Some(verdict) = self.cache.get(pid, start_time) {
            return Ok(verdict);
        }

        // Tier 3: deep inspection over the snapshot.
        let reason = self.deep_inspect(&row, table);
        let verdict = ProtectionVerdict::new(reason);
        self.cache.insert(pid, start_time, verdict.clone());
        Ok(verdict)
    }

    fn deep_inspect(&self, row: &ProcRow, table: &dyn ProcessTable) -> ProtectionReason {
        // Ancestors, up to MAX_ANCESTORS levels.
        let mut current = row.pid;
        for _ in 0..MAX_ANCESTORS {
            let parent = match table.detail(current) {
                Ok(detail) => detail.parent_pid,
                Err(ProbeError::AccessDenied) => return ProtectionReason::Unknown,
                Err(ProbeError::NotFound) => break,
            };
            let Some(parent) = parent else { break };
            match table.row(parent) {
                Ok(parent_row) => {
                    if self.matches_pattern(&base_name(&parent_row.name), &parent_row.cmdline) {
                        return ProtectionReason::ParentProtected;
                    }
                }
                Err(ProbeError::AccessDenied) => return ProtectionReason::Unknown,
                Err(ProbeError::NotFound) => break,
            }
            current = parent;
        }

        // Immediate children.
        for child in table.children_of(row.pid) {
            if self.matches_pattern(&base_name(&child.name), &child.cmdline) {
                return ProtectionReason::ChildProtected;
            }
        }

        // Script interpreters running a protected script.
        if self.script_content_protected(row) {
            return ProtectionReason::ScriptContent;
        }

        ProtectionReason::NotProtected
    }

    /// The script-content rule: the process is an interpreter and the file
    /// name of its first non-flag argument contains a protected token. The
    /// rest of the path is deliberately not matched.
    fn script_content_protected(&self, row: &ProcRow) -> bool {
        let name = base_name(&row.name);
        let stem = name.strip_suffix(".exe").unwrap_or(&name);
        if !self.interpreters.iter().any(|i| *i == stem) {
            return false;
        }
        let Some(script) = first_non_flag_argument(&row.cmdline) else {
            return false;
        };
        let script_name = base_name(&script);
        self.tokens.iter().any(|token| script_name.contains(token))
    }

    /// Drop expired cache entries; run by the background sweeper
    pub fn sweep(&self) {
        self.cache.sweep();
    }

    /// Forget a PID, e.g. after observing its termination
    pub fn forget(&self, pid: u32) {
        self.cache.invalidate(pid);
    }

    /// Number of cached verdicts, exposed for tests
    #[must_use]
    pub fn cached_verdicts(&self) -> usize {
        self.cache.len()
    }
}

/// First argument after the executable that does not start with `-`
fn first_non_flag_argument(cmdline: &str) -> Option<String> {
    cmdline
        .split_whitespace()
        .skip(1)
        .find(|arg| !arg.starts_with('-'))
        .map(ToString::to_string)
}
