//! Tiered process inspector
//!
//! Enumerates and describes processes under a search predicate. Enumeration
//! is two-pass: the first pass touches only cheap fields (pid, name, and the
//! command line for argument searches) and applies the predicate; the second
//! pass enriches only the survivors with whatever the requested tier pays
//! for. Memory, CPU, and children are never queried for a process the query
//! already rejected.

use crate::proc::{base_name, ProbeError, ProcRow, ProcessTable};
use crate::protection::ProtectionClassifier;
use crate::spawn::SpawnRegistry;
use crate::{CancelFlag, CoreError, EngineConfig, Result};
use schema::{
    format_memory_human, memory_mb, DetailTier, FindProcessReply, PidName, ProcessCategory,
    ProcessDescriptor, ProtectionReason,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Immediate children reported per process outside the full tier
const CHILDREN_PREVIEW_LIMIT: usize = 5;

/// Command-line display limit unless the caller opts out
const CMDLINE_LIMIT_DEFAULT: usize = 100;

/// The process inspector
#[derive(Debug)]
pub struct ProcessInspector {
    config: Arc<EngineConfig>,
    classifier: Arc<ProtectionClassifier>,
}

/// How the query matches a process
enum Query {
    /// Case-insensitive substring over name (and optionally command line)
    Name(String),
    /// Exact PID equality
    Pid(u32),
}

impl ProcessInspector {
    /// Build an inspector sharing the engine's classifier
    #[must_use]
    pub fn new(config: Arc<EngineConfig>, classifier: Arc<ProtectionClassifier>) -> Self {
        Self { config, classifier }
    }

    /// Find processes matching `query` at the requested tier.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidArgument`] for queries shorter than the minimum
    /// that are not PIDs; [`CoreError::Timeout`] when the request was
    /// cancelled at a checkpoint.
    pub fn find(
        &self,
        table: &dyn ProcessTable,
        registry: &SpawnRegistry,
        query: &str,
        tier: DetailTier,
        include_args: bool,
        show_full_cmdline: bool,
        cancel: &CancelFlag,
    ) -> Result<FindProcessReply> {
        let query = self.parse_query(query)?;

        // Pass 1: cheap fields only.
        table.refresh();
        let rows = table.list();
        let total_scanned = rows.len();

        let matches: Vec<ProcRow> = rows
            .into_iter()
            .filter(|row| match &query {
                Query::Pid(pid) => row.pid == *pid,
                Query::Name(needle) => {
                    row.name.to_lowercase().contains(needle)
                        || (include_args && row.cmdline.to_lowercase().contains(needle))
                }
            })
            .collect();

        debug!(
            "Scanned {} processes, {} matched",
            total_scanned,
            matches.len()
        );

        // Checkpoint: the enrichment pass is the expensive part.
        if cancel.is_cancelled() {
            return Err(CoreError::Timeout("request cancelled by client".to_string()));
        }

        let tier = self.effective_tier(tier, &matches);

        // Pass 2: enrich survivors only.
        let cpu = if tier == DetailTier::Full {
            let pids: Vec<u32> = matches.iter().map(|r| r.pid).collect();
            Some(table.cpu_sample(&pids, Duration::from_millis(100)))
        } else {
            None
        };

        let mut processes = Vec::with_capacity(matches.len());
        for row in &matches {
            if cancel.is_cancelled() {
                return Err(CoreError::Timeout("request cancelled by client".to_string()));
            }
            let cpu_percent = cpu.as_ref().and_then(|m| m.get(&row.pid)).copied();
            if let Some(descriptor) =
                self.describe(table, registry, row, tier, show_full_cmdline, cpu_percent)
            {
                processes.push(descriptor);
            }
        }

        // Protected entries first for visibility, then name, then PID.
        processes.sort_by(|a, b| {
            b.protected
                .cmp(&a.protected)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
                .then_with(|| a.pid.cmp(&b.pid))
        });

        let count = processes.len();
        Ok(FindProcessReply { processes, count })
    }

    fn parse_query(&self, query: &str) -> Result<Query> {
        let trimmed = query.trim();
        if let Ok(pid) = trimmed.parse::<u32>() {
            return Ok(Query::Pid(pid));
        }
        if trimmed.chars().count() < self.config.min_query_len {
            return Err(CoreError::InvalidArgument {
                message: "search query too short; single characters match hundreds of processes"
                    .to_string(),
                suggestion: format!(
                    "use at least {} characters, or pass an exact PID",
                    self.config.min_query_len
                ),
            });
        }
        Ok(Query::Name(trimmed.to_lowercase()))
    }

    /// The smart tier silently degrades to quick semantics for browser
    /// swarms so the latency budget holds.
    fn effective_tier(&self, tier: DetailTier, matches: &[ProcRow]) -> DetailTier {
        if tier != DetailTier::Smart {
            return tier;
        }
        let browser_matches = matches
            .iter()
            .filter(|row| {
                let name = base_name(&row.name);
                self.config.browser_names.iter().any(|b| *b == name)
            })
            .count();
        if browser_matches > self.config.browser_downgrade_threshold {
            debug!(
                "{} browser-like matches, downgrading smart to quick",
                browser_matches
            );
            DetailTier::Quick
        } else {
            tier
        }
    }

    /// Build one descriptor at the given tier. Returns None when the
    /// process vanished between the passes.
    fn describe(
        &self,
        table: &dyn ProcessTable,
        registry: &SpawnRegistry,
        row: &ProcRow,
        tier: DetailTier,
        show_full_cmdline: bool,
        cpu_percent: Option<f32>,
    ) -> Option<ProcessDescriptor> {
        let category = self.categorize(row);

        if tier == DetailTier::Instant {
            return Some(ProcessDescriptor {
                pid: row.pid,
                name: row.name.clone(),
                cmdline: String::new(),
                cmdline_truncated: false,
                cwd: None,
                parent_pid: None,
                created: None,
                memory_bytes: 0,
                memory_mb: 0.0,
                memory_human: String::new(),
                cpu_percent: None,
                threads: None,
                children: None,
                children_count: None,
                protected: false,
                protection_reason: ProtectionReason::NotProtected,
                user_spawned: false,
                category,
                warning: None,
            });
        }

        let detail = match table.detail(row.pid) {
            Ok(detail) => detail,
            Err(ProbeError::NotFound) => return None,
            Err(ProbeError::AccessDenied) => {
                // Visible but opaque: report what pass 1 saw and mark it
                // protected per the fail-safe rule.
                return Some(ProcessDescriptor {
                    pid: row.pid,
                    name: row.name.clone(),
                    cmdline: String::new(),
                    cmdline_truncated: false,
                    cwd: None,
                    parent_pid: None,
                    created: None,
                    memory_bytes: 0,
                    memory_mb: 0.0,
                    memory_human: format_memory_human(0),
                    cpu_percent: None,
                    threads: None,
                    children: None,
                    children_count: None,
                    protected: true,
                    protection_reason: ProtectionReason::Unknown,
                    user_spawned: false,
                    category,
                    warning: Some("access denied; treated as protected".to_string()),
                });
            }
        };

        let verdict = self
            .classifier
            .classify(row.pid, table)
            .unwrap_or_else(|_| schema::ProtectionVerdict::new(ProtectionReason::Unknown));

        let (children, children_count) = match tier {
            DetailTier::Instant | DetailTier::Quick => (None, None),
            DetailTier::Smart | DetailTier::Full => {
                let all = table.children_of(row.pid);
                let count = u32::try_from(all.len()).unwrap_or(u32::MAX);
                let keep = if tier == DetailTier::Full {
                    all.len()
                } else {
                    CHILDREN_PREVIEW_LIMIT
                };
                let list = all
                    .into_iter()
                    .take(keep)
                    .map(|c| PidName {
                        pid: c.pid,
                        name: c.name,
                    })
                    .collect();
                (Some(list), Some(count))
            }
        };

        let limit = if show_full_cmdline {
            usize::MAX
        } else {
            CMDLINE_LIMIT_DEFAULT
        };
        let (cmdline, truncated) = truncate_cmdline(&detail.cmdline, limit);

        let warning = if verdict.protected {
            Some(match verdict.reason {
                ProtectionReason::SystemCritical => "critical system process".to_string(),
                ProtectionReason::Unknown => "access denied; treated as protected".to_string(),
                _ => "infrastructure process - do not kill".to_string(),
            })
        } else {
            None
        };

        Some(ProcessDescriptor {
            pid: row.pid,
            name: detail.name,
            cmdline,
            cmdline_truncated: truncated,
            cwd: detail.cwd,
            parent_pid: detail.parent_pid,
            created: format_epoch(detail.start_time),
            memory_bytes: detail.memory_bytes,
            memory_mb: memory_mb(detail.memory_bytes),
            memory_human: format_memory_human(detail.memory_bytes),
            cpu_percent,
            threads: detail.threads,
            children,
            children_count,
            protected: verdict.protected,
            protection_reason: verdict.reason,
            user_spawned: registry.contains(row.pid),
            category,
            warning,
        })
    }

    fn categorize(&self, row: &ProcRow) -> ProcessCategory {
        let name = base_name(&row.name);
        let cmdline = row.cmdline.to_lowercase();
        if self
            .config
            .infra_tokens
            .iter()
            .any(|t| name.contains(&t.to_lowercase()) || cmdline.contains(&t.to_lowercase()))
        {
            return ProcessCategory::Infrastructure;
        }
        if self
            .config
            .system_critical
            .iter()
            .any(|n| n.to_lowercase() == name)
        {
            return ProcessCategory::System;
        }
        if self.config.browser_names.iter().any(|b| *b == name) {
            return ProcessCategory::Browser;
        }
        let stem = name.strip_suffix(".exe").unwrap_or(&name);
        if self.config.script_interpreters.iter().any(|i| *i == stem) {
            return ProcessCategory::ScriptRuntime;
        }
        ProcessCategory::User
    }
}

fn truncate_cmdline(cmdline: &str, limit: usize) -> (String, bool) {
    if cmdline.chars().count() > limit {
        let cut: String = cmdline.chars().take(limit).collect();
        (format!("{cut}..."), true)
    } else {
        (cmdline.to_string(), false)
    }
}

fn format_epoch(start_time: u64) -> Option<String> {
    if start_time == 0 {
        return None;
    }
    chrono::DateTime::from_timestamp(i64::try_from(start_time).ok()?, 0)
        .map(|dt| dt.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proc::{FakeProcess, StaticProcessTable};

    fn inspector() -> (ProcessInspector, Arc<SpawnRegistry>) {
        let config = Arc::new(EngineConfig::default());
        let classifier = Arc::new(ProtectionClassifier::new(&config));
        let registry = Arc::new(SpawnRegistry::new(config.clone()));
        (ProcessInspector::new(config, classifier), registry)
    }

    fn chrome_host(count: usize) -> StaticProcessTable {
        let mut processes = vec![FakeProcess::new(1, "explorer.exe")];
        for i in 0..count {
            processes.push(
                FakeProcess::new(1000 + i as u32, "chrome.exe")
                    .cmdline("chrome.exe --type=renderer")
                    .memory(200 * 1024 * 1024),
            );
        }
        StaticProcessTable::with_processes(processes)
    }

    #[test]
    fn test_short_query_rejected() {
        let (inspector, registry) = inspector();
        let table = StaticProcessTable::new();
        let err = inspector
            .find(
                &table,
                &registry,
                "a",
                DetailTier::Instant,
                false,
                false,
                &CancelFlag::new(),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));
    }

    #[test]
    fn test_pid_query_bypasses_length_rule() {
        let (inspector, registry) = inspector();
        let table = StaticProcessTable::with_processes(vec![FakeProcess::new(7, "node.exe")]);
        let reply = inspector
            .find(
                &table,
                &registry,
                "7",
                DetailTier::Quick,
                false,
                false,
                &CancelFlag::new(),
            )
            .unwrap();
        assert_eq!(reply.count, 1);
        assert_eq!(reply.processes[0].pid, 7);
    }

    #[test]
    fn test_instant_tier_populates_pid_and_name_only() {
        let (inspector, registry) = inspector();
        let table = chrome_host(3);
        let reply = inspector
            .find(
                &table,
                &registry,
                "chrome",
                DetailTier::Instant,
                false,
                false,
                &CancelFlag::new(),
            )
            .unwrap();
        assert_eq!(reply.count, 3);
        for p in &reply.processes {
            assert!(p.name.contains("chrome"));
            assert_eq!(p.memory_bytes, 0);
            assert!(p.cmdline.is_empty());
            assert!(p.cpu_percent.is_none());
            assert!(p.children.is_none());
            assert!(p.created.is_none());
        }
    }

    #[test]
    fn test_quick_tier_adds_memory_and_protection() {
        let (inspector, registry) = inspector();
        let table = chrome_host(2);
        let reply = inspector
            .find(
                &table,
                &registry,
                "chrome",
                DetailTier::Quick,
                false,
                false,
                &CancelFlag::new(),
            )
            .unwrap();
        for p in &reply.processes {
            assert_eq!(p.memory_bytes, 200 * 1024 * 1024);
            assert_eq!(p.memory_human, "200.0 MB");
            assert!(p.children.is_none());
            assert!(p.cpu_percent.is_none());
        }
    }

    #[test]
    fn test_smart_downgrades_for_browser_swarm() {
        let (inspector, registry) = inspector();
        let table = chrome_host(25);
        let reply = inspector
            .find(
                &table,
                &registry,
                "chrome",
                DetailTier::Smart,
                false,
                false,
                &CancelFlag::new(),
            )
            .unwrap();
        assert_eq!(reply.count, 25);
        // Quick semantics: no children lists despite the smart request.
        assert!(reply.processes.iter().all(|p| p.children.is_none()));
    }

    #[test]
    fn test_smart_keeps_children_for_small_sets() {
        let (inspector, registry) = inspector();
        let table = StaticProcessTable::with_processes(vec![
            FakeProcess::new(100, "node.exe").cmdline("node server.js"),
            FakeProcess::new(101, "node.exe").parent(100),
            FakeProcess::new(102, "node.exe").parent(100),
        ]);
        let reply = inspector
            .find(
                &table,
                &registry,
                "node",
                DetailTier::Smart,
                false,
                false,
                &CancelFlag::new(),
            )
            .unwrap();
        let root = reply.processes.iter().find(|p| p.pid == 100).unwrap();
        assert_eq!(root.children_count, Some(2));
        assert_eq!(root.children.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn test_include_args_matches_cmdline() {
        let (inspector, registry) = inspector();
        let table = StaticProcessTable::with_processes(vec![FakeProcess::new(200, "python.exe")
            .cmdline("python manage.py runserver 8000")]);

        let without = inspector
            .find(
                &table,
                &registry,
                "manage",
                DetailTier::Quick,
                false,
                false,
                &CancelFlag::new(),
            )
            .unwrap();
        assert_eq!(without.count, 0);

        let with = inspector
            .find(
                &table,
                &registry,
                "manage",
                DetailTier::Quick,
                true,
                false,
                &CancelFlag::new(),
            )
            .unwrap();
        assert_eq!(with.count, 1);
    }

    #[test]
    fn test_protected_sort_first_then_name_then_pid() {
        let (inspector, registry) = inspector();
        let table = StaticProcessTable::with_processes(vec![
            FakeProcess::new(300, "zz-worker.exe").cmdline("zz-worker serve"),
            FakeProcess::new(301, "aa-worker.exe").cmdline("aa-worker serve"),
            FakeProcess::new(302, "mcp-worker.exe").cmdline("mcp-worker serve"),
            FakeProcess::new(299, "aa-worker.exe").cmdline("aa-worker serve"),
        ]);
        let reply = inspector
            .find(
                &table,
                &registry,
                "worker",
                DetailTier::Quick,
                false,
                false,
                &CancelFlag::new(),
            )
            .unwrap();
        let order: Vec<u32> = reply.processes.iter().map(|p| p.pid).collect();
        // Protected mcp-worker first, then by name, PID breaking the tie.
        assert_eq!(order, vec![302, 299, 301, 300]);
    }

    #[test]
    fn test_cancel_stops_at_checkpoint() {
        let (inspector, registry) = inspector();
        let table = chrome_host(3);
        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = inspector
            .find(
                &table,
                &registry,
                "chrome",
                DetailTier::Quick,
                false,
                false,
                &cancel,
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::Timeout(_)));
    }

    #[test]
    fn test_full_tier_carries_cpu() {
        let (inspector, registry) = inspector();
        let mut p = FakeProcess::new(400, "python.exe").cmdline("python train.py");
        p.cpu_percent = 37.5;
        let table = StaticProcessTable::with_processes(vec![p]);
        let reply = inspector
            .find(
                &table,
                &registry,
                "python",
                DetailTier::Full,
                false,
                false,
                &CancelFlag::new(),
            )
            .unwrap();
        assert_eq!(reply.processes[0].cpu_percent, Some(37.5));
    }

    #[test]
    fn test_cmdline_truncation() {
        let (inspector, registry) = inspector();
        let long = format!("node {}", "x".repeat(300));
        let table =
            StaticProcessTable::with_processes(vec![FakeProcess::new(500, "node.exe")
                .cmdline(&long)]);

        let truncated = inspector
            .find(
                &table,
                &registry,
                "node",
                DetailTier::Quick,
                false,
                false,
                &CancelFlag::new(),
            )
            .unwrap();
        assert!(truncated.processes[0].cmdline_truncated);
        assert!(truncated.processes[0].cmdline.ends_with("..."));

        let full = inspector
            .find(
                &table,
                &registry,
                "node",
                DetailTier::Quick,
                false,
                true,
                &CancelFlag::new(),
            )
            .unwrap();
        assert!(!full.processes[0].cmdline_truncated);
        assert_eq!(full.processes[0].cmdline, long);
    }
}
