//! Cache statistics tracking

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Counters describing what a cache has done
#[derive(Debug)]
pub struct CacheStats {
    enabled: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    removals: AtomicU64,
    loads: AtomicU64,
    writes: AtomicU64,
    rollbacks: AtomicU64,
    invocations: AtomicU64,
    listener_failures: AtomicU64,
}

impl Default for CacheStats {
    fn default() -> Self {
        Self::new(true)
    }
}

impl CacheStats {
    /// Create a new stats tracker
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            removals: AtomicU64::new(0),
            loads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            rollbacks: AtomicU64::new(0),
            invocations: AtomicU64::new(0),
            listener_failures: AtomicU64::new(0),
        }
    }

    /// Whether counters are being recorded
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Turn recording on or off
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn bump(&self, counter: &AtomicU64, n: u64) {
        if self.is_enabled() {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_hit(&self) {
        self.bump(&self.hits, 1);
    }

    pub(crate) fn record_miss(&self) {
        self.bump(&self.misses, 1);
    }

    pub(crate) fn record_misses(&self, n: u64) {
        self.bump(&self.misses, n);
    }

    pub(crate) fn record_puts(&self, n: u64) {
        self.bump(&self.puts, n);
    }

    pub(crate) fn record_removals(&self, n: u64) {
        self.bump(&self.removals, n);
    }

    pub(crate) fn record_loads(&self, n: u64) {
        self.bump(&self.loads, n);
    }

    pub(crate) fn record_writes(&self, n: u64) {
        self.bump(&self.writes, n);
    }

    pub(crate) fn record_rollback(&self) {
        self.bump(&self.rollbacks, 1);
    }

    pub(crate) fn record_invocation(&self) {
        self.bump(&self.invocations, 1);
    }

    pub(crate) fn record_listener_failures(&self, n: u64) {
        self.bump(&self.listener_failures, n);
    }

    /// Lookups answered from the entry table
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups that found no entry in the table
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Values committed by puts and processors
    pub fn puts(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }

    /// Entries removed
    pub fn removals(&self) -> u64 {
        self.removals.load(Ordering::Relaxed)
    }

    /// Keys requested from the loader
    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    /// Keys handed to the writer (writes and deletes)
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Mutations undone after a writer failure
    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::Relaxed)
    }

    /// Entry processor invocations
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    /// Listener calls that returned an error
    pub fn listener_failures(&self) -> u64 {
        self.listener_failures.load(Ordering::Relaxed)
    }

    /// Calculate hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Reset all statistics
    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.puts,
            &self.removals,
            &self.loads,
            &self.writes,
            &self.rollbacks,
            &self.invocations,
            &self.listener_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_basic() {
        let stats = CacheStats::new(true);

        stats.record_hit();
        stats.record_hit();
        stats.record_miss();

        assert_eq!(stats.hits(), 2);
        assert_eq!(stats.misses(), 1);
        assert_eq!(stats.hit_ratio(), 2.0 / 3.0);
    }

    #[test]
    fn test_stats_reset() {
        let stats = CacheStats::new(true);

        stats.record_hit();
        stats.record_miss();
        stats.record_puts(3);
        stats.reset();

        assert_eq!(stats.hits(), 0);
        assert_eq!(stats.misses(), 0);
        assert_eq!(stats.puts(), 0);
        assert_eq!(stats.hit_ratio(), 0.0);
    }

    #[test]
    fn test_stats_disabled() {
        let stats = CacheStats::new(false);

        stats.record_hit();
        stats.record_writes(4);
        assert_eq!(stats.hits(), 0);
        assert_eq!(stats.writes(), 0);

        stats.set_enabled(true);
        stats.record_writes(4);
        assert_eq!(stats.writes(), 4);
    }
}
