//! Engine configuration
//!
//! Everything here is fixed at server start: the watched-port catalogue, the
//! infrastructure token list, the system-critical process names, the command
//! whitelist supplied by the external validator, and the cache/timeout knobs.
//! There is no on-disk persisted state.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Fixed engine configuration; see module docs
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Watched development ports and their conventional service labels
    pub dev_ports: BTreeMap<u16, String>,
    /// Case-insensitive substring tokens marking infrastructure processes
    pub infra_tokens: Vec<String>,
    /// Process names that are always system critical
    pub system_critical: Vec<String>,
    /// PIDs that are always system critical
    pub critical_pids: Vec<u32>,
    /// Executable base names treated as browsers by the smart-tier heuristic
    pub browser_names: Vec<String>,
    /// Match-set size above which browser-like searches downgrade to quick
    pub browser_downgrade_threshold: usize,
    /// Base names recognised as script interpreters for the script-content check
    pub script_interpreters: Vec<String>,
    /// Base names of shell wrappers that are skipped when resolving the real
    /// target of a background spawn
    pub wrapper_names: Vec<String>,
    /// Command whitelist for execute_command (prefix matched)
    pub allowed_commands: Vec<String>,
    /// Maximum cached protection verdicts
    pub protection_cache_capacity: usize,
    /// How long a cached verdict stays valid
    pub protection_cache_ttl: Duration,
    /// Interval of the background cache sweeper
    pub cache_sweep_interval: Duration,
    /// Interval of the spawn registry reaper
    pub reaper_interval: Duration,
    /// How long an exited spawn record lingers so status reads can observe it
    pub exited_linger: Duration,
    /// Maximum descendant depth for tree termination
    pub tree_depth_limit: usize,
    /// Maximum descendant count for tree termination
    pub tree_size_limit: usize,
    /// Parallel workers for the port scanner
    pub port_workers: usize,
    /// Per-port TCP connect probe timeout
    pub port_probe_timeout: Duration,
    /// Total wall-clock budget for a port scan
    pub port_scan_budget: Duration,
    /// How long kill_process waits after the graceful signal
    pub graceful_wait: Duration,
    /// How long kill_process waits after the forceful signal
    pub forceful_wait: Duration,
    /// Tree termination's graceful window before engine-initiated escalation
    pub tree_graceful_wait: Duration,
    /// How long to look for the real target behind a shell wrapper
    pub wrapper_resolve_window: Duration,
    /// Timeout for foreground execute_command
    pub foreground_timeout: Duration,
    /// Minimum query length for name searches
    pub min_query_len: usize,
    /// Append-only per-operation debug log
    pub debug_log_path: PathBuf,
    /// In-memory operation log capacity
    pub oplog_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut dev_ports = BTreeMap::new();
        dev_ports.insert(3000, "React Dev Server".to_string());
        dev_ports.insert(5000, "Flask/WebSocket Server".to_string());
        dev_ports.insert(8000, "Django/FastAPI Server".to_string());
        dev_ports.insert(8080, "Alternative Web Server".to_string());
        dev_ports.insert(5173, "Vite Dev Server".to_string());
        dev_ports.insert(4200, "Angular Dev Server".to_string());

        Self {
            dev_ports,
            infra_tokens: vec![
                "mcp".to_string(),
                "secure_mcp".to_string(),
                "claude".to_string(),
                "api-toolbox".to_string(),
            ],
            system_critical: vec![
                "System".to_string(),
                "csrss.exe".to_string(),
                "winlogon.exe".to_string(),
                "services.exe".to_string(),
                "lsass.exe".to_string(),
                "smss.exe".to_string(),
            ],
            critical_pids: vec![0, 4],
            browser_names: vec![
                "chrome.exe".to_string(),
                "msedge.exe".to_string(),
                "firefox.exe".to_string(),
            ],
            browser_downgrade_threshold: 20,
            script_interpreters: vec![
                "python".to_string(),
                "python3".to_string(),
                "py".to_string(),
                "node".to_string(),
                "ruby".to_string(),
                "perl".to_string(),
            ],
            wrapper_names: vec![
                "cmd.exe".to_string(),
                "conhost.exe".to_string(),
                "sh".to_string(),
                "bash".to_string(),
            ],
            allowed_commands: vec![
                "dir".to_string(),
                "ls".to_string(),
                "cat".to_string(),
                "type".to_string(),
                "echo".to_string(),
                "hostname".to_string(),
                "whoami".to_string(),
                "pwd".to_string(),
                "git status".to_string(),
                "git log".to_string(),
                "git diff".to_string(),
                "git branch".to_string(),
                "python".to_string(),
                "node".to_string(),
                "npm start".to_string(),
                "npm run dev".to_string(),
                "npm run build".to_string(),
                "flask run".to_string(),
                "uvicorn".to_string(),
                "ping".to_string(),
                "tree".to_string(),
            ],
            protection_cache_capacity: 256,
            protection_cache_ttl: Duration::from_secs(10),
            cache_sweep_interval: Duration::from_secs(5),
            reaper_interval: Duration::from_secs(1),
            exited_linger: Duration::from_secs(2),
            tree_depth_limit: 16,
            tree_size_limit: 1024,
            port_workers: 6,
            port_probe_timeout: Duration::from_millis(200),
            port_scan_budget: Duration::from_millis(500),
            graceful_wait: Duration::from_secs(3),
            forceful_wait: Duration::from_secs(2),
            tree_graceful_wait: Duration::from_secs(1),
            wrapper_resolve_window: Duration::from_secs(1),
            foreground_timeout: Duration::from_secs(30),
            min_query_len: 2,
            debug_log_path: PathBuf::from("secure-dev-manager_debug.log"),
            oplog_capacity: 512,
        }
    }
}

impl EngineConfig {
    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns [`crate::CoreError::InvalidArgument`] when a limit is zero or a
    /// required list is empty.
    pub fn validate(&self) -> crate::Result<()> {
        if self.dev_ports.is_empty() {
            return Err(invalid("dev_ports cannot be empty"));
        }
        if self.infra_tokens.is_empty() {
            return Err(invalid("infra_tokens cannot be empty"));
        }
        if self.port_workers == 0 || self.port_workers > 6 {
            return Err(invalid("port_workers must be between 1 and 6"));
        }
        if self.tree_size_limit == 0 || self.tree_depth_limit == 0 {
            return Err(invalid("tree limits must be greater than 0"));
        }
        if self.protection_cache_capacity == 0 {
            return Err(invalid("protection_cache_capacity must be greater than 0"));
        }
        if self.min_query_len == 0 {
            return Err(invalid("min_query_len must be greater than 0"));
        }
        Ok(())
    }

    /// Human label for a port, "Custom" when it is not in the catalogue
    #[must_use]
    pub fn service_label(&self, port: u16) -> String {
        self.dev_ports
            .get(&port)
            .cloned()
            .unwrap_or_else(|| "Custom".to_string())
    }

    /// Whether a command passes the whitelist (exact or prefix match)
    #[must_use]
    pub fn is_command_allowed(&self, command: &str) -> bool {
        let lowered = command.trim().to_lowercase();
        if lowered.is_empty() {
            return false;
        }
        self.allowed_commands
            .iter()
            .any(|allowed| lowered == *allowed || lowered.starts_with(&format!("{allowed} ")))
    }
}

fn invalid(message: &str) -> crate::CoreError {
    crate::CoreError::InvalidArgument {
        message: message.to_string(),
        suggestion: "fix the engine configuration before starting the server".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_limits() {
        let mut config = EngineConfig::default();
        config.port_workers = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.port_workers = 12;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.infra_tokens.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_service_labels() {
        let config = EngineConfig::default();
        assert_eq!(config.service_label(3000), "React Dev Server");
        assert_eq!(config.service_label(8000), "Django/FastAPI Server");
        assert_eq!(config.service_label(9999), "Custom");
    }

    #[test]
    fn test_command_whitelist() {
        let config = EngineConfig::default();
        assert!(config.is_command_allowed("npm run dev"));
        assert!(config.is_command_allowed("git status"));
        assert!(config.is_command_allowed("python manage.py runserver"));
        assert!(!config.is_command_allowed("taskkill /IM python.exe"));
        assert!(!config.is_command_allowed(""));
        // Prefix matching requires a word boundary.
        assert!(!config.is_command_allowed("gitgrep secrets"));
    }
}
