use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use super::types::StatsSnapshot;

/// Process-lifetime cache counters.
///
/// Counters are relaxed atomics: monitoring data, not an audit trail.
#[derive(Debug)]
pub struct CacheStatistics {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
    started_at: Mutex<DateTime<Utc>>,
}

impl CacheStatistics {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            started_at: Mutex::new(started_at),
        }
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Hit percentage, 0 when nothing was read yet
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64 * 100.0
        }
    }

    pub fn total_operations(&self) -> u64 {
        self.hits()
            + self.misses()
            + self.sets.load(Ordering::Relaxed)
            + self.deletes.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> StatsSnapshot {
        let started_at = *self.started_at.lock();
        StatsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            evictions: self.evictions(),
            hit_rate: self.hit_rate(),
            total_operations: self.total_operations(),
            started_at,
            uptime_secs: (now - started_at).num_seconds().max(0),
        }
    }

    /// Operator reset: zero every counter and restart the clock
    pub fn reset(&self, now: DateTime<Utc>) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.sets,
            &self.deletes,
            &self.evictions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *self.started_at.lock() = now;
    }
}

impl Default for CacheStatistics {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_zero_without_reads() {
        let stats = CacheStatistics::default();
        assert_eq!(stats.hit_rate(), 0.0);
        assert_eq!(stats.total_operations(), 0);
    }

    #[test]
    fn test_hit_rate_arithmetic() {
        let stats = CacheStatistics::default();
        for _ in 0..3 {
            stats.record_hit();
        }
        stats.record_miss();
        stats.record_set();
        stats.record_delete();

        assert!((stats.hit_rate() - 75.0).abs() < f64::EPSILON);
        assert_eq!(stats.total_operations(), 6);
    }

    #[test]
    fn test_reset_zeroes_counters() {
        let stats = CacheStatistics::default();
        stats.record_hit();
        stats.record_eviction();

        let later = Utc::now() + chrono::Duration::seconds(10);
        stats.reset(later);

        let snapshot = stats.snapshot(later);
        assert_eq!(snapshot.hits, 0);
        assert_eq!(snapshot.evictions, 0);
        assert_eq!(snapshot.started_at, later);
        assert_eq!(snapshot.uptime_secs, 0);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let stats = std::sync::Arc::new(CacheStatistics::default());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record_miss();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stats.misses(), 4000);
    }
}
