//! Termination engine
//!
//! Executes kill_one and kill_tree under the full safety policy. The
//! protection guard and the orphan guard are not bypassable by any flag:
//! a protected verdict ends the operation, and a process with children can
//! only go down via tree termination. Once signalling has begun the engine
//! is not cancellable: a kill either completes or times out so the caller
//! gets a definitive result. No termination call is ever retried silently.

use crate::os::Terminator;
use crate::proc::{ProbeError, ProcessTable};
use crate::protection::ProtectionClassifier;
use crate::spawn::SpawnRegistry;
use crate::{CoreError, EngineConfig, Result};
use schema::{
    KillMethod, KillPlan, KillReply, KillTreeReply, PidName, TreeMethod, TreePlan,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Flags for kill_one
#[derive(Debug, Clone, Copy, Default)]
pub struct KillFlags {
    /// Escalate to the forceful signal when the graceful one is ignored
    pub force: bool,
    /// Allow killing a server-spawned process
    pub override_user_spawn: bool,
    /// Report without touching the process
    pub dry_run: bool,
}

/// Flags for kill_tree
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeFlags {
    /// Escalate to the forceful signal per process
    pub force: bool,
    /// Report without touching anything
    pub dry_run: bool,
}

/// Outcome of kill_one
#[derive(Debug)]
pub enum KillOutcome {
    /// The process was terminated
    Done(KillReply),
    /// Dry run: what would have happened
    Plan(KillPlan),
}

/// Outcome of kill_tree
#[derive(Debug)]
pub enum TreeOutcome {
    /// The tree was terminated
    Done(KillTreeReply),
    /// Dry run: the would-kill set
    Plan(TreePlan),
}

/// How often liveness is polled while waiting out a signal
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The termination engine
#[derive(Debug)]
pub struct TerminationEngine {
    config: Arc<EngineConfig>,
    classifier: Arc<ProtectionClassifier>,
}

impl TerminationEngine {
    /// Engine sharing the dispatcher's classifier
    #[must_use]
    pub fn new(config: Arc<EngineConfig>, classifier: Arc<ProtectionClassifier>) -> Self {
        Self { config, classifier }
    }

    /// Terminate a single process under the safety policy.
    ///
    /// # Errors
    ///
    /// The full taxonomy: `ProcessNotFound`, `ProtectedProcess`,
    /// `UserSpawnedGuard`, `HasChildren`, `PermissionDenied`,
    /// `TerminationFailed`.
    pub async fn kill_one(
        &self,
        pid: u32,
        flags: KillFlags,
        table: &dyn ProcessTable,
        terminator: &dyn Terminator,
        registry: &SpawnRegistry,
    ) -> Result<KillOutcome> {
        table.refresh();
        let snapshot = match table.detail(pid) {
            Ok(detail) => detail,
            Err(ProbeError::NotFound) => return Err(CoreError::ProcessNotFound(pid)),
            Err(ProbeError::AccessDenied) => return Err(CoreError::PermissionDenied(pid)),
        };

        // The protection guard. Neither force nor override reaches past it.
        let verdict = self.classifier.classify(pid, table)?;
        if verdict.protected {
            return Err(CoreError::ProtectedProcess {
                pid,
                name: snapshot.name,
                reason: verdict.reason,
            });
        }

        let user_spawned = registry.contains(pid);
        if user_spawned && !flags.override_user_spawn {
            return Err(CoreError::UserSpawnedGuard {
                pid,
                name: snapshot.name,
            });
        }

        // The orphan guard: not bypassable by force, the caller must opt
        // into tree termination instead.
        let children = table.children_of(pid);
        if !children.is_empty() {
            return Err(CoreError::HasChildren {
                pid,
                children: children
                    .into_iter()
                    .map(|c| PidName {
                        pid: c.pid,
                        name: c.name,
                    })
                    .collect(),
            });
        }

        let planned_method = if flags.force {
            KillMethod::Forceful
        } else {
            KillMethod::Graceful
        };
        if flags.dry_run {
            return Ok(KillOutcome::Plan(KillPlan {
                dry_run: true,
                target: PidName {
                    pid,
                    name: snapshot.name,
                },
                method: planned_method,
            }));
        }

        // Point of no return: not cancellable from here on.
        terminator.graceful(pid).await?;
        if self
            .wait_for_exit(pid, terminator, self.config.graceful_wait)
            .await
        {
            registry.discard(pid);
            self.classifier.forget(pid);
            return Ok(KillOutcome::Done(KillReply {
                message: format!(
                    "Process {} (PID {pid}) {}",
                    snapshot.name,
                    KillMethod::Graceful
                ),
                method: KillMethod::Graceful,
                user_spawned,
            }));
        }

        if flags.force {
            terminator.forceful(pid).await?;
            if self
                .wait_for_exit(pid, terminator, self.config.forceful_wait)
                .await
            {
                registry.discard(pid);
                self.classifier.forget(pid);
                return Ok(KillOutcome::Done(KillReply {
                    message: format!(
                        "Process {} (PID {pid}) {}",
                        snapshot.name,
                        KillMethod::Forceful
                    ),
                    method: KillMethod::Forceful,
                    user_spawned,
                }));
            }
        }

        warn!("Process {} survived termination", pid);
        Err(CoreError::TerminationFailed {
            pid,
            killed: vec![],
            failed: vec![pid],
        })
    }

    /// Terminate a process and all descendants under the safety policy.
    ///
    /// # Errors
    ///
    /// `ProcessNotFound`, `ProtectedProcess` (root), `ProtectedDescendant`,
    /// `InvalidArgument` (tree size), `TerminationFailed` (partial failure).
    pub async fn kill_tree(
        &self,
        pid: u32,
        flags: TreeFlags,
        table: &dyn ProcessTable,
        terminator: &dyn Terminator,
        registry: &SpawnRegistry,
    ) -> Result<TreeOutcome> {
        table.refresh();
        let root = match table.detail(pid) {
            Ok(detail) => detail,
            Err(ProbeError::NotFound) => return Err(CoreError::ProcessNotFound(pid)),
            Err(ProbeError::AccessDenied) => return Err(CoreError::PermissionDenied(pid)),
        };

        // Root protection first; descendants are not even inspected.
        let verdict = self.classifier.classify(pid, table)?;
        if verdict.protected {
            return Err(CoreError::ProtectedProcess {
                pid,
                name: root.name,
                reason: verdict.reason,
            });
        }

        let tree = self.collect_descendants(pid, &root.name, table)?;

        // Any protected descendant keeps the whole tree up.
        for node in tree.iter().skip(1) {
            let verdict = self.classifier.classify(node.pid, table).unwrap_or_else(|_| {
                schema::ProtectionVerdict::not_protected()
            });
            if verdict.protected {
                return Err(CoreError::ProtectedDescendant {
                    root: pid,
                    pid: node.pid,
                    name: node.name.clone(),
                });
            }
        }

        let method = if registry.contains(pid) && registry_has_group(registry, pid) {
            TreeMethod::JobObject
        } else {
            TreeMethod::Manual
        };

        if flags.dry_run {
            return Ok(TreeOutcome::Plan(TreePlan {
                dry_run: true,
                would_kill: tree.iter().map(|n| n.to_pid_name()).collect(),
                method,
            }));
        }

        // Atomic group termination when the registry holds a handle.
        if method == TreeMethod::JobObject {
            match registry.terminate_group(pid) {
                Some(Ok(())) => {
                    for node in &tree {
                        self.classifier.forget(node.pid);
                    }
                    registry.discard(pid);
                    return Ok(TreeOutcome::Done(KillTreeReply {
                        processes_killed: tree.len(),
                        tree: tree.iter().map(|n| n.to_pid_name()).collect(),
                        method: TreeMethod::JobObject,
                    }));
                }
                Some(Err(e)) => {
                    // Fall back to the manual walk; never retry silently
                    // within the same mechanism.
                    debug!("Group termination failed, falling back: {}", e);
                }
                None => {}
            }
        }

        self.manual_tree_kill(pid, &tree, flags, terminator, registry)
            .await
    }

    /// BFS over parent->children with a visited set keyed by
    /// (PID, creation time) so PID reuse mid-scan cannot loop.
    fn collect_descendants(
        &self,
        root_pid: u32,
        root_name: &str,
        table: &dyn ProcessTable,
    ) -> Result<Vec<TreeNode>> {
        let mut visited: HashSet<(u32, u64)> = HashSet::new();
        let mut tree = vec![TreeNode {
            pid: root_pid,
            name: root_name.to_string(),
            depth: 0,
        }];
        visited.insert((root_pid, table.start_time(root_pid).unwrap_or(0)));

        let mut cursor = 0;
        while cursor < tree.len() {
            let (parent_pid, parent_depth) = (tree[cursor].pid, tree[cursor].depth);
            cursor += 1;
            if parent_depth >= self.config.tree_depth_limit {
                continue;
            }
            for child in table.children_of(parent_pid) {
                let key = (child.pid, table.start_time(child.pid).unwrap_or(0));
                if !visited.insert(key) {
                    continue;
                }
                // Descendant budget; the root itself is not counted.
                if tree.len() > self.config.tree_size_limit {
                    return Err(CoreError::InvalidArgument {
                        message: format!(
                            "process tree exceeds {} descendants",
                            self.config.tree_size_limit
                        ),
                        suggestion:
                            "kill subtrees individually, starting from the deepest parents"
                                .to_string(),
                    });
                }
                tree.push(TreeNode {
                    pid: child.pid,
                    name: child.name,
                    depth: parent_depth + 1,
                });
            }
        }
        Ok(tree)
    }

    async fn manual_tree_kill(
        &self,
        root_pid: u32,
        tree: &[TreeNode],
        flags: TreeFlags,
        terminator: &dyn Terminator,
        registry: &SpawnRegistry,
    ) -> Result<TreeOutcome> {
        // Bottom-up: deepest first, root last, so nothing is orphaned
        // mid-walk.
        let mut order: Vec<&TreeNode> = tree.iter().collect();
        order.sort_by(|a, b| b.depth.cmp(&a.depth));

        let mut denied: Vec<u32> = Vec::new();
        for node in &order {
            match terminator.graceful(node.pid).await {
                Ok(()) => {}
                Err(CoreError::PermissionDenied(p)) => denied.push(p),
                Err(e) => return Err(e),
            }
        }

        // Graceful window, then engine-initiated escalation for survivors
        // (immediately when the caller asked for force).
        if !flags.force {
            self.wait_for_exit_all(&order, terminator, self.config.tree_graceful_wait)
                .await;
        }
        for node in &order {
            if terminator.alive(node.pid).await {
                match terminator.forceful(node.pid).await {
                    Ok(()) => {}
                    Err(CoreError::PermissionDenied(p)) => {
                        if !denied.contains(&p) {
                            denied.push(p);
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        self.wait_for_exit_all(&order, terminator, self.config.forceful_wait)
            .await;

        let mut killed = Vec::new();
        let mut failed = denied;
        for node in tree {
            if terminator.alive(node.pid).await {
                if !failed.contains(&node.pid) {
                    failed.push(node.pid);
                }
            } else {
                killed.push(node.pid);
                registry.discard(node.pid);
                self.classifier.forget(node.pid);
            }
        }

        if !failed.is_empty() {
            warn!(
                "Partial tree termination under {}: {} killed, {:?} survived",
                root_pid,
                killed.len(),
                failed
            );
            return Err(CoreError::TerminationFailed {
                pid: root_pid,
                killed,
                failed,
            });
        }

        Ok(TreeOutcome::Done(KillTreeReply {
            processes_killed: killed.len(),
            tree: tree.iter().map(|n| n.to_pid_name()).collect(),
            method: TreeMethod::Manual,
        }))
    }

    async fn wait_for_exit(
        &self,
        pid: u32,
        terminator: &dyn Terminator,
        timeout: Duration,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if !terminator.alive(pid).await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_for_exit_all(
        &self,
        nodes: &[&TreeNode],
        terminator: &dyn Terminator,
        timeout: Duration,
    ) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let mut any_alive = false;
            for node in nodes {
                if terminator.alive(node.pid).await {
                    any_alive = true;
                    break;
                }
            }
            if !any_alive || tokio::time::Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

fn registry_has_group(registry: &SpawnRegistry, pid: u32) -> bool {
    registry
        .snapshot()
        .iter()
        .any(|record| record.pid == pid && record.has_group)
}

#[derive(Debug, Clone)]
struct TreeNode {
    pid: u32,
    name: String,
    depth: usize,
}

impl TreeNode {
    fn to_pid_name(&self) -> PidName {
        PidName {
            pid: self.pid,
            name: self.name.clone(),
        }
    }
}
