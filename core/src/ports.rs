//! Parallel port scanner
//!
//! Probes the development port catalogue with a bounded worker pool: a
//! 200 ms TCP connect probe decides active/inactive, one listener-table
//! snapshot resolves owning PIDs, and the process table attaches names and
//! children counts. Total wall-clock budget for a scan is 500 ms.
//!
//! The listener table comes from `netstat -ano` on Windows and `ss -ltnp`
//! on Unix; both parsers are pure functions exercised directly by tests.

use crate::proc::ProcessTable;
use crate::spawn::SpawnRegistry;
use crate::{CoreError, EngineConfig, Result};
use async_trait::async_trait;
use schema::{CheckPortsReply, PortEntry, PortOwner, PortStatus};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// A snapshot of the OS's TCP listener table
#[async_trait]
pub trait ListenerTable: Send + Sync {
    /// Listening PIDs per port, first listener first
    ///
    /// # Errors
    ///
    /// Propagates failures to read the table; the scanner degrades to
    /// status-only entries.
    async fn listening_pids(&self) -> Result<BTreeMap<u16, Vec<u32>>>;
}

/// Real listener table backed by the platform's netstat/ss output
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemListenerTable;

impl SystemListenerTable {
    /// Create the platform listener table
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ListenerTable for SystemListenerTable {
    #[cfg(windows)]
    async fn listening_pids(&self) -> Result<BTreeMap<u16, Vec<u32>>> {
        let output = tokio::process::Command::new("netstat")
            .arg("-ano")
            .output()
            .await
            .map_err(CoreError::Io)?;
        Ok(parse_netstat(&String::from_utf8_lossy(&output.stdout)))
    }

    #[cfg(unix)]
    async fn listening_pids(&self) -> Result<BTreeMap<u16, Vec<u32>>> {
        let output = tokio::process::Command::new("ss")
            .arg("-ltnp")
            .output()
            .await
            .map_err(CoreError::Io)?;
        Ok(parse_ss(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// In-memory listener table for tests
#[derive(Debug, Default)]
pub struct StaticListenerTable {
    map: std::sync::Mutex<BTreeMap<u16, Vec<u32>>>,
}

impl StaticListenerTable {
    /// Empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind PIDs to a port
    pub fn bind(&self, port: u16, pids: Vec<u32>) {
        self.map
            .lock()
            .expect("listener table poisoned")
            .insert(port, pids);
    }

    /// Release a port
    pub fn release(&self, port: u16) {
        self.map.lock().expect("listener table poisoned").remove(&port);
    }
}

#[async_trait]
impl ListenerTable for StaticListenerTable {
    async fn listening_pids(&self) -> Result<BTreeMap<u16, Vec<u32>>> {
        Ok(self.map.lock().expect("listener table poisoned").clone())
    }
}

/// Parse `netstat -ano` output into port -> listening PIDs.
///
/// Only TCP rows in LISTENING state are kept; IPv4 and IPv6 rows for the
/// same port merge into one entry.
#[must_use]
pub fn parse_netstat(output: &str) -> BTreeMap<u16, Vec<u32>> {
    let mut table: BTreeMap<u16, Vec<u32>> = BTreeMap::new();
    for line in output.lines() {
        let line = line.trim();
        if !line.starts_with("TCP") {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 5 || parts[3] != "LISTENING" {
            continue;
        }
        let Some(port) = port_of(parts[1]) else {
            continue;
        };
        let Ok(pid) = parts[4].parse::<u32>() else {
            continue;
        };
        let pids = table.entry(port).or_default();
        if !pids.contains(&pid) {
            pids.push(pid);
        }
    }
    table
}

/// Parse `ss -ltnp` output into port -> listening PIDs
#[must_use]
pub fn parse_ss(output: &str) -> BTreeMap<u16, Vec<u32>> {
    let mut table: BTreeMap<u16, Vec<u32>> = BTreeMap::new();
    for line in output.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 4 || parts[0] != "LISTEN" {
            continue;
        }
        let Some(port) = port_of(parts[3]) else {
            continue;
        };
        // users:(("node",pid=123,fd=20),("node",pid=124,fd=20))
        let Some(process_col) = parts.iter().find(|p| p.starts_with("users:")) else {
            continue;
        };
        for chunk in process_col.split("pid=").skip(1) {
            let digits: String = chunk.chars().take_while(char::is_ascii_digit).collect();
            if let Ok(pid) = digits.parse::<u32>() {
                let pids = table.entry(port).or_default();
                if !pids.contains(&pid) {
                    pids.push(pid);
                }
            }
        }
    }
    table
}

/// Extract the port from an address like `0.0.0.0:8000` or `[::]:8000`
fn port_of(addr: &str) -> Option<u16> {
    addr.rsplit(':').next()?.parse().ok()
}

/// The port scanner
#[derive(Debug)]
pub struct PortScanner {
    config: Arc<EngineConfig>,
}

impl PortScanner {
    /// Scanner over the configured catalogue
    #[must_use]
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self { config }
    }

    /// Probe the catalogue (or one explicit port) and correlate owners.
    ///
    /// # Errors
    ///
    /// [`CoreError::Timeout`] when the scan exceeds its wall-clock budget.
    pub async fn check_ports(
        &self,
        table: &dyn ProcessTable,
        listeners: &dyn ListenerTable,
        registry: &SpawnRegistry,
        port: Option<u16>,
    ) -> Result<CheckPortsReply> {
        let budget = self.config.port_scan_budget;
        tokio::time::timeout(budget, self.scan(table, listeners, registry, port))
            .await
            .map_err(|_| {
                CoreError::Timeout(format!(
                    "port scan exceeded {} ms",
                    budget.as_millis()
                ))
            })?
    }

    async fn scan(
        &self,
        table: &dyn ProcessTable,
        listeners: &dyn ListenerTable,
        registry: &SpawnRegistry,
        port: Option<u16>,
    ) -> Result<CheckPortsReply> {
        let ports: Vec<u16> = match port {
            Some(p) => vec![p],
            None => self.config.dev_ports.keys().copied().collect(),
        };

        // Bounded parallel connect probes.
        let semaphore = Arc::new(Semaphore::new(self.config.port_workers));
        let probe_timeout = self.config.port_probe_timeout;
        let mut probes = JoinSet::new();
        for p in &ports {
            let p = *p;
            let semaphore = semaphore.clone();
            probes.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                (p, probe_port(p, probe_timeout).await)
            });
        }
        let mut statuses: BTreeMap<u16, PortStatus> = BTreeMap::new();
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((p, status)) => {
                    statuses.insert(p, status);
                }
                Err(e) => warn!("Port probe task failed: {}", e),
            }
        }

        // One listener snapshot for owner resolution.
        let listener_map = match listeners.listening_pids().await {
            Ok(map) => map,
            Err(e) => {
                debug!("Listener table unavailable: {}", e);
                BTreeMap::new()
            }
        };

        let registry_pids = registry.pids();
        table.refresh();

        let mut entries = BTreeMap::new();
        let mut hints = Vec::new();
        for p in ports {
            let status = statuses.get(&p).copied().unwrap_or(PortStatus::Unknown);
            let service = self.config.service_label(p);
            let mut entry = PortEntry {
                port: p,
                service,
                status,
                process: None,
                extra_processes: Vec::new(),
            };

            if status == PortStatus::Active {
                if let Some(pids) = listener_map.get(&p) {
                    if let Some((&owner_pid, extras)) = pids.split_first() {
                        let name = table
                            .row(owner_pid)
                            .map(|r| r.name)
                            .unwrap_or_else(|_| "unknown".to_string());
                        let children = table.children_of(owner_pid);
                        let total = 1 + extras.len() + children.len();
                        entry.process = Some(PortOwner {
                            pid: owner_pid,
                            name,
                            has_children: !children.is_empty() || !extras.is_empty(),
                            total_processes: u32::try_from(total).unwrap_or(u32::MAX),
                        });
                        entry.extra_processes = extras.to_vec();

                        if total > 1 {
                            hints.push(format!(
                                "Port {p}: {total} processes (parent + children); use kill_process_tree for clean shutdown"
                            ));
                        }
                        if registry_pids.contains(&owner_pid) {
                            hints.push(format!(
                                "Port {p} is held by a process this server spawned"
                            ));
                        }
                    }
                }
            }
            entries.insert(p, entry);
        }

        if hints.is_empty() {
            hints.push("All ports clear or single-process only".to_string());
        }

        Ok(CheckPortsReply {
            ports: entries,
            developer_hints: hints,
        })
    }
}

async fn probe_port(port: u16, timeout: std::time::Duration) -> PortStatus {
    match tokio::time::timeout(timeout, TcpStream::connect(("127.0.0.1", port))).await {
        Ok(Ok(_)) => PortStatus::Active,
        Ok(Err(_)) | Err(_) => PortStatus::Inactive,
    }
}
