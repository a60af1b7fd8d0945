//! Operation log: bounded ring of recent operations plus an append-only file
//!
//! Every dispatched operation produces exactly one entry: timestamp, tool
//! name, elapsed seconds, and the outcome class. Dry runs are recorded and
//! marked as such so audit trails stay accurate.
//!
//! The in-memory ring is slot-addressed: an entry's monotonic sequence
//! number, taken modulo capacity, is the slot it lives in, so writing a new
//! entry into an occupied slot is the eviction. Nothing shuffles and no
//! drop counter is maintained; the number of overwritten entries falls out
//! of the arithmetic (`next_seq - retained`).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use tracing::warn;

/// A single recorded operation
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct OpEntry {
    /// Monotonic sequence number
    pub seq: u64,
    /// When the operation completed (RFC3339)
    pub timestamp: String,
    /// Canonical tool name
    pub tool: String,
    /// Wall-clock duration in seconds
    pub elapsed_seconds: f64,
    /// Outcome class: ok, rejected, or internal
    pub outcome: String,
    /// Whether the operation was a dry run
    pub dry_run: bool,
}

/// Slot-addressed circular buffer; see the module docs
#[derive(Debug)]
struct Ring {
    slots: Vec<Option<OpEntry>>,
    next_seq: u64,
}

impl Ring {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            next_seq: 0,
        }
    }

    fn slot_of(&self, seq: u64) -> usize {
        (seq % self.slots.len() as u64) as usize
    }

    fn push(&mut self, mut entry: OpEntry) {
        entry.seq = self.next_seq;
        let slot = self.slot_of(entry.seq);
        self.slots[slot] = Some(entry);
        self.next_seq += 1;
    }

    /// Oldest sequence number still addressable; everything below it has
    /// been overwritten.
    fn first_retained_seq(&self) -> u64 {
        self.next_seq.saturating_sub(self.slots.len() as u64)
    }

    /// Retained entries in sequence order, reconstructed by walking the
    /// addressable sequence window.
    fn ordered(&self) -> Vec<OpEntry> {
        (self.first_retained_seq()..self.next_seq)
            .filter_map(|seq| self.slots[self.slot_of(seq)].clone())
            .collect()
    }
}

/// The engine's operation log
#[derive(Debug)]
pub struct OpLog {
    ring: Mutex<Ring>,
    sink: Option<Mutex<File>>,
}

impl OpLog {
    /// Create an operation log with the given ring capacity (must be > 0)
    /// and an append-only file sink.
    ///
    /// When the file cannot be opened the log degrades to in-memory only;
    /// the condition is reported through tracing rather than failing the
    /// server start.
    #[must_use]
    pub fn new(capacity: usize, path: &Path) -> Self {
        assert!(capacity > 0, "OpLog capacity must be > 0");
        let sink = match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(Mutex::new(file)),
            Err(e) => {
                warn!("Operation log file {:?} unavailable: {}", path, e);
                None
            }
        };
        Self {
            ring: Mutex::new(Ring::with_capacity(capacity)),
            sink,
        }
    }

    /// In-memory-only log, used by tests
    #[must_use]
    pub fn in_memory(capacity: usize) -> Self {
        assert!(capacity > 0, "OpLog capacity must be > 0");
        Self {
            ring: Mutex::new(Ring::with_capacity(capacity)),
            sink: None,
        }
    }

    /// Record one operation
    pub fn record(&self, tool: &str, elapsed_seconds: f64, outcome: &str, dry_run: bool) {
        let entry = OpEntry {
            seq: 0,
            timestamp: schema::current_timestamp(),
            tool: tool.to_string(),
            elapsed_seconds,
            outcome: outcome.to_string(),
            dry_run,
        };

        if let Some(sink) = &self.sink {
            let line = format!(
                "{} tool={} elapsed={:.3} outcome={}{}\n",
                entry.timestamp,
                entry.tool,
                entry.elapsed_seconds,
                entry.outcome,
                if dry_run { " dry_run=true" } else { "" },
            );
            if let Ok(mut file) = sink.lock() {
                if let Err(e) = file.write_all(line.as_bytes()) {
                    warn!("Failed to append operation log line: {}", e);
                }
            }
        }

        if let Ok(mut ring) = self.ring.lock() {
            ring.push(entry);
        }
    }

    /// Snapshot the retained entries in sequence order. Returns
    /// (next_seq, entries) where `next_seq` can be used to resume with
    /// `iter_after` later.
    #[must_use]
    pub fn snapshot(&self) -> (u64, Vec<OpEntry>) {
        let ring = self.ring.lock().expect("oplog ring poisoned");
        (ring.next_seq, ring.ordered())
    }

    /// Retained entries with seq strictly greater than `after_seq`. A
    /// sequence number that has already been overwritten simply yields the
    /// whole retained window.
    #[must_use]
    pub fn iter_after(&self, after_seq: u64) -> Vec<OpEntry> {
        let ring = self.ring.lock().expect("oplog ring poisoned");
        ring.ordered()
            .into_iter()
            .filter(|e| e.seq > after_seq)
            .collect()
    }

    /// Number of entries overwritten so far
    #[must_use]
    pub fn total_dropped(&self) -> u64 {
        let ring = self.ring.lock().expect("oplog ring poisoned");
        ring.first_retained_seq()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overwrite_keeps_newest_window() {
        // Seven operations through a four-slot ring: the window slides so
        // only the last four survive, and the slide is the drop count.
        let log = OpLog::in_memory(4);
        let tools = [
            "find_process",
            "check_ports",
            "kill_process",
            "dev_status",
            "server_status",
            "kill_process_tree",
            "cleanup_user_processes",
        ];
        for (i, tool) in tools.iter().enumerate() {
            let outcome = if i % 3 == 2 { "rejected" } else { "ok" };
            log.record(tool, 0.001 * i as f64, outcome, false);
        }

        let (next_seq, entries) = log.snapshot();
        assert_eq!(next_seq, 7);
        assert_eq!(log.total_dropped(), 3);
        assert_eq!(
            entries.iter().map(|e| e.seq).collect::<Vec<_>>(),
            vec![3, 4, 5, 6]
        );
        // The retained window lines up with the tail of the input, outcomes
        // included.
        assert_eq!(entries[0].tool, "dev_status");
        assert_eq!(entries[3].tool, "cleanup_user_processes");
        assert_eq!(entries[2].outcome, "rejected");
        assert_eq!(entries[3].outcome, "ok");
    }

    #[test]
    fn test_accounting_is_consistent_across_many_wraps() {
        // After any number of pushes, retained + dropped must equal the
        // total ever recorded.
        let log = OpLog::in_memory(5);
        for i in 0..23 {
            log.record("find_process", 0.0, if i % 2 == 0 { "ok" } else { "rejected" }, false);
        }
        let (next_seq, entries) = log.snapshot();
        assert_eq!(next_seq, 23);
        assert_eq!(entries.len(), 5);
        assert_eq!(entries.len() as u64 + log.total_dropped(), next_seq);
        // Sequence order survives multiple wraps.
        assert!(entries.windows(2).all(|w| w[1].seq == w[0].seq + 1));
    }

    #[test]
    fn test_iter_after_evicted_seq_yields_whole_window() {
        let log = OpLog::in_memory(3);
        for tool in ["check_ports", "kill_process", "dev_status", "server_status"] {
            log.record(tool, 0.01, "ok", false);
        }
        // Seq 0 was overwritten by seq 3; resuming from it returns
        // everything still retained rather than failing.
        let tail = log.iter_after(0);
        assert_eq!(
            tail.iter().map(|e| e.seq).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        // Resuming from a live sequence number returns only what follows.
        let tail = log.iter_after(2);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].tool, "server_status");
    }

    #[test]
    fn test_partially_filled_ring() {
        let log = OpLog::in_memory(8);
        log.record("dev_status", 0.02, "ok", false);
        log.record("kill_process", 0.03, "rejected", true);

        let (next_seq, entries) = log.snapshot();
        assert_eq!(next_seq, 2);
        assert_eq!(entries.len(), 2);
        assert_eq!(log.total_dropped(), 0);
        assert!(entries[1].dry_run);
    }

    #[test]
    fn test_file_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secure-dev-manager_debug.log");
        let log = OpLog::new(8, &path);
        log.record("kill_process", 0.123, "ok", false);
        log.record("kill_process_tree", 0.456, "ok", true);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("tool=kill_process"));
        assert!(lines[0].contains("outcome=ok"));
        assert!(!lines[0].contains("dry_run"));
        assert!(lines[1].contains("dry_run=true"));
    }
}
