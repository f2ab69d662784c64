use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Entry held by the in-process store
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub expires_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub tags: BTreeSet<String>,
    /// Insertion order, breaks LRU ties
    pub inserted_seq: u64,
}

impl<V> CacheEntry<V> {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Snapshot of the in-process store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalStats {
    pub total_keys: usize,
    pub max_size: usize,
    pub usage_percent: f64,
    pub total_tags: usize,
    pub evictions: u64,
}

/// Snapshot of the manager counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub hit_rate: f64,
    pub total_operations: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
}

/// Memory figures reported by the remote server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteInfo {
    pub used_memory: Option<u64>,
    pub used_memory_human: Option<String>,
    pub maxmemory: Option<u64>,
}

/// Result of `CacheManager::health_check`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub overall_health: bool,
    pub remote_configured: bool,
    pub remote_available: bool,
    pub remote_info: Option<RemoteInfo>,
    pub local_stats: LocalStats,
    pub statistics: StatsSnapshot,
    pub errors: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

/// Outcome of a warming run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmupStatus {
    Completed,
    WarmingDisabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupReport {
    pub status: WarmupStatus,
    pub succeeded: Vec<String>,
    /// (preloader name, error text)
    pub failed: Vec<(String, String)>,
}
