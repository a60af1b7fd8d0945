//! Verdict cache
//!
//! Bounded, TTL'd cache of protection verdicts keyed by PID. Reads go
//! through the read half of the lock; every structural mutation happens
//! under the single writer lock, so readers may observe an older verdict but
//! never a torn record. LRU bookkeeping uses a per-entry atomic tick so a
//! read never needs the writer lock.
//!
//! A cached verdict is only valid while the process keeps its creation time;
//! a changed creation time means PID reuse and evicts the entry.

use schema::ProtectionVerdict;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct CacheEntry {
    verdict: ProtectionVerdict,
    start_time: u64,
    inserted: Instant,
    last_used: AtomicU64,
}

/// Bounded TTL cache of protection verdicts
#[derive(Debug)]
pub struct VerdictCache {
    entries: RwLock<HashMap<u32, CacheEntry>>,
    capacity: usize,
    ttl: Duration,
    clock: AtomicU64,
}

impl VerdictCache {
    /// Create a cache with the given capacity and TTL
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::with_capacity(capacity)),
            capacity,
            ttl,
            clock: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Look up a non-expired verdict for (pid, creation time)
    #[must_use]
    pub fn get(&self, pid: u32, start_time: u64) -> Option<ProtectionVerdict> {
        let entries = self.entries.read().expect("verdict cache poisoned");
        let entry = entries.get(&pid)?;
        if entry.inserted.elapsed() > self.ttl || entry.start_time != start_time {
            return None;
        }
        entry.last_used.store(self.tick(), Ordering::Relaxed);
        Some(entry.verdict.clone())
    }

    /// Insert a verdict, evicting the least-recently-used entry when full
    pub fn insert(&self, pid: u32, start_time: u64, verdict: ProtectionVerdict) {
        let mut entries = self.entries.write().expect("verdict cache poisoned");
        if entries.len() >= self.capacity && !entries.contains_key(&pid) {
            if let Some(&oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.last_used.load(Ordering::Relaxed))
                .map(|(pid, _)| pid)
            {
                entries.remove(&oldest);
            }
        }
        let tick = self.tick();
        entries.insert(
            pid,
            CacheEntry {
                verdict,
                start_time,
                inserted: Instant::now(),
                last_used: AtomicU64::new(tick),
            },
        );
    }

    /// Drop the verdict for a PID, e.g. when the process is observed gone
    pub fn invalidate(&self, pid: u32) {
        self.entries
            .write()
            .expect("verdict cache poisoned")
            .remove(&pid);
    }

    /// Drop every expired entry; run periodically by the background sweeper
    pub fn sweep(&self) {
        let mut entries = self.entries.write().expect("verdict cache poisoned");
        entries.retain(|_, e| e.inserted.elapsed() <= self.ttl);
    }

    /// Number of cached verdicts
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().expect("verdict cache poisoned").len()
    }

    /// Whether the cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema::ProtectionReason;

    fn verdict(reason: ProtectionReason) -> ProtectionVerdict {
        ProtectionVerdict::new(reason)
    }

    #[test]
    fn test_hit_and_miss() {
        let cache = VerdictCache::new(4, Duration::from_secs(10));
        cache.insert(10, 111, verdict(ProtectionReason::PatternMatch));

        let hit = cache.get(10, 111).expect("fresh entry should hit");
        assert_eq!(hit.reason, ProtectionReason::PatternMatch);
        assert!(cache.get(11, 111).is_none());
    }

    #[test]
    fn test_pid_reuse_misses() {
        let cache = VerdictCache::new(4, Duration::from_secs(10));
        cache.insert(10, 111, verdict(ProtectionReason::NotProtected));
        // Same PID, different creation time: a reused PID must not inherit
        // the old verdict.
        assert!(cache.get(10, 222).is_none());
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = VerdictCache::new(4, Duration::from_millis(10));
        cache.insert(10, 111, verdict(ProtectionReason::NotProtected));
        std::thread::sleep(Duration::from_millis(25));
        assert!(cache.get(10, 111).is_none());

        cache.sweep();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lru_eviction() {
        let cache = VerdictCache::new(2, Duration::from_secs(10));
        cache.insert(1, 0, verdict(ProtectionReason::NotProtected));
        cache.insert(2, 0, verdict(ProtectionReason::NotProtected));
        // Touch 1 so 2 becomes the LRU entry.
        let _ = cache.get(1, 0);
        cache.insert(3, 0, verdict(ProtectionReason::NotProtected));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(1, 0).is_some());
        assert!(cache.get(2, 0).is_none());
        assert!(cache.get(3, 0).is_some());
    }

    #[test]
    fn test_invalidate() {
        let cache = VerdictCache::new(4, Duration::from_secs(10));
        cache.insert(10, 111, verdict(ProtectionReason::PatternMatch));
        cache.invalidate(10);
        assert!(cache.get(10, 111).is_none());
    }
}
