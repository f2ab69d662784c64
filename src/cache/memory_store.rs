use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use super::statistics::CacheStatistics;
use super::types::{CacheEntry, LocalStats};
use crate::app::CacheConfig;
use crate::utils::{log_debug, SharedClock, SharedDice};

/// Bounded in-process store with per-key expiry, LRU eviction and a tag index.
///
/// Every public method takes the single inner lock once and holds it for the whole
/// operation, so the entry map and the tag index are never observed half-updated.
/// The lock is never held across an `.await`.
#[derive(Debug)]
pub struct InProcessStore<V> {
    inner: Mutex<StoreInner<V>>,
    max_size: usize,
    default_ttl: Duration,
    domain_ttls: BTreeMap<String, u64>,
    domain_jitter_secs: u64,
    clock: SharedClock,
    dice: SharedDice,
    stats: Arc<CacheStatistics>,
}

#[derive(Debug)]
struct StoreInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    tags: HashMap<String, HashSet<String>>,
    next_seq: u64,
}

impl<V> Default for StoreInner<V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            tags: HashMap::new(),
            next_seq: 0,
        }
    }
}

impl<V> StoreInner<V> {
    /// Drop a key from the entry map and from every tag it belongs to
    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        for tag in &entry.tags {
            if let Some(keys) = self.tags.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tags.remove(tag);
                }
            }
        }
        Some(entry)
    }

    fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let expired: Vec<String> = self
            .entries
            .values()
            .filter(|entry| entry.is_expired(now))
            .map(|entry| entry.key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    /// Least recently accessed key, oldest insertion first on ties
    fn lru_key(&self) -> Option<String> {
        self.entries
            .values()
            .min_by_key(|entry| (entry.last_accessed_at, entry.inserted_seq))
            .map(|entry| entry.key.clone())
    }
}

impl<V: Clone> InProcessStore<V> {
    pub fn new(
        config: &CacheConfig,
        clock: SharedClock,
        dice: SharedDice,
        stats: Arc<CacheStatistics>,
    ) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            max_size: config.max_size.max(1),
            default_ttl: config.default_ttl(),
            domain_ttls: config.domain_ttls.clone(),
            domain_jitter_secs: config.domain_jitter_secs,
            clock,
            dice,
            stats,
        }
    }

    /// Live value for `key`, refreshing its access time
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.sweep(now);

        let entry = inner.entries.get_mut(key)?;
        entry.last_accessed_at = now;
        Some(entry.value.clone())
    }

    /// Insert or replace `key`. A new key arriving at capacity evicts the LRU entry.
    pub fn set(&self, key: &str, value: V, ttl: Option<Duration>, tags: &[String]) {
        let now = self.clock.now();
        let ttl = ttl.unwrap_or_else(|| self.ttl_for(key));

        let mut inner = self.inner.lock();
        inner.sweep(now);
        let tags = tags.iter().cloned().collect();
        self.insert(&mut inner, now, key, value, ttl, tags);
    }

    /// Store a copy fetched from another tier. A live entry keeps its tags.
    pub fn backfill(&self, key: &str, value: V, ttl: Duration) {
        let now = self.clock.now();

        let mut inner = self.inner.lock();
        inner.sweep(now);
        let tags = inner
            .entries
            .get(key)
            .map(|entry| entry.tags.clone())
            .unwrap_or_default();
        self.insert(&mut inner, now, key, value, ttl, tags);
    }

    fn insert(
        &self,
        inner: &mut StoreInner<V>,
        now: DateTime<Utc>,
        key: &str,
        value: V,
        ttl: Duration,
        tags: BTreeSet<String>,
    ) {
        if inner.remove(key).is_none() && inner.entries.len() >= self.max_size {
            if let Some(victim) = inner.lru_key() {
                inner.remove(&victim);
                self.stats.record_eviction();
                log_debug(format!("evicted '{}' from in-process store", victim));
            }
        }

        for tag in &tags {
            inner
                .tags
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }

        let inserted_seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                key: key.to_string(),
                value,
                expires_at: expiry_after(now, ttl),
                last_accessed_at: now,
                tags,
                inserted_seq,
            },
        );
    }

    pub fn delete(&self, key: &str) -> bool {
        self.inner.lock().remove(key).is_some()
    }

    /// Remove keys matching a glob pattern (`*` = everything); returns how many went
    pub fn clear(&self, pattern: &str) -> usize {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.sweep(now);

        if pattern == "*" {
            let removed = inner.entries.len();
            inner.entries.clear();
            inner.tags.clear();
            return removed;
        }

        let matcher = GlobMatcher::new(pattern);
        let doomed: Vec<String> = inner
            .entries
            .keys()
            .filter(|key| matcher.is_match(key))
            .cloned()
            .collect();
        for key in &doomed {
            inner.remove(key);
        }
        doomed.len()
    }

    pub fn invalidate_by_tags(&self, tags: &[String]) -> usize {
        let mut inner = self.inner.lock();
        let doomed: HashSet<String> = tags
            .iter()
            .filter_map(|tag| inner.tags.get(tag))
            .flat_map(|keys| keys.iter().cloned())
            .collect();

        doomed
            .iter()
            .filter(|key| inner.remove(key).is_some())
            .count()
    }

    pub fn stats(&self) -> LocalStats {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.sweep(now);

        let total_keys = inner.entries.len();
        LocalStats {
            total_keys,
            max_size: self.max_size,
            usage_percent: total_keys as f64 / self.max_size as f64 * 100.0,
            total_tags: inner.tags.len(),
            evictions: self.stats.evictions(),
        }
    }

    /// Presence check that does not count as an access
    pub fn contains(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.inner
            .lock()
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    pub fn len(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.sweep(now);
        inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.sweep(now);
        let mut keys: Vec<String> = inner.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Domain TTL (plus jitter) for keys naming a known domain, the default otherwise
    fn ttl_for(&self, key: &str) -> Duration {
        let domain_base = self
            .domain_ttls
            .iter()
            .filter(|(name, _)| key.contains(name.as_str()))
            .max_by_key(|(name, _)| name.len())
            .map(|(_, secs)| *secs);

        match domain_base {
            Some(base) => Duration::from_secs(base + self.dice.between(0, self.domain_jitter_secs)),
            None => self.default_ttl,
        }
    }
}

fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Glob matcher for key patterns: `*` matches any run, `?` one character
pub struct GlobMatcher {
    regex: Option<Regex>,
    literal: String,
}

impl GlobMatcher {
    pub fn new(pattern: &str) -> Self {
        let mut expr = String::with_capacity(pattern.len() + 8);
        expr.push('^');
        for c in pattern.chars() {
            match c {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                other => expr.push_str(&regex::escape(&other.to_string())),
            }
        }
        expr.push('$');

        Self {
            regex: Regex::new(&expr).ok(),
            literal: pattern.to_string(),
        }
    }

    pub fn is_match(&self, key: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(key),
            None => key == self.literal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{Clock, Dice, ManualClock};

    fn store_with(max_size: usize) -> (InProcessStore<String>, Arc<ManualClock>, Arc<CacheStatistics>) {
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        let stats = Arc::new(CacheStatistics::new(clock.now()));
        let config = CacheConfig {
            max_size,
            ..CacheConfig::deterministic(7)
        };
        let store = InProcessStore::new(
            &config,
            clock.clone(),
            Arc::new(Dice::seeded(7)),
            stats.clone(),
        );
        (store, clock, stats)
    }

    fn tags(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_missing_key_is_absent() {
        let (store, _, _) = store_with(10);
        assert_eq!(store.get("never-set"), None);
    }

    #[test]
    fn test_set_then_get() {
        let (store, _, _) = store_with(10);
        store.set("draw:42", "7 13 21".to_string(), None, &[]);
        assert_eq!(store.get("draw:42"), Some("7 13 21".to_string()));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (store, _, _) = store_with(10);
        store.set("k", "v".to_string(), None, &tags(&["t"]));
        assert!(store.delete("k"));
        assert!(!store.delete("k"));
        assert_eq!(store.stats().total_tags, 0);
    }

    #[test]
    fn test_ttl_expiry_with_manual_clock() {
        let (store, clock, _) = store_with(10);
        store.set("short", "v".to_string(), Some(Duration::from_secs(30)), &[]);

        clock.advance(Duration::from_secs(29));
        assert_eq!(store.get("short"), Some("v".to_string()));

        clock.advance(Duration::from_secs(2));
        assert_eq!(store.get("short"), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_lru_evicts_least_recently_accessed() {
        let (store, clock, stats) = store_with(5);
        for i in 0..5 {
            store.set(&format!("k{}", i), format!("v{}", i), None, &[]);
            clock.advance(Duration::from_secs(1));
        }

        store.get("k0");
        clock.advance(Duration::from_secs(1));
        store.set("k5", "v5".to_string(), None, &[]);

        assert_eq!(stats.evictions(), 1);
        assert_eq!(store.get("k0"), Some("v0".to_string()));
        assert_eq!(store.get("k1"), None);
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn test_lru_ties_break_on_insertion_order() {
        // clock never moves: every access time is equal
        let (store, _, _) = store_with(3);
        for key in ["a", "b", "c"] {
            store.set(key, key.to_string(), None, &[]);
        }
        store.set("d", "d".to_string(), None, &[]);

        assert!(!store.contains("a"));
        assert!(store.contains("b"));
        assert!(store.contains("d"));
    }

    #[test]
    fn test_replacing_key_does_not_evict() {
        let (store, _, stats) = store_with(2);
        store.set("a", "1".to_string(), None, &[]);
        store.set("b", "2".to_string(), None, &[]);
        store.set("a", "3".to_string(), None, &[]);

        assert_eq!(stats.evictions(), 0);
        assert_eq!(store.get("a"), Some("3".to_string()));
        assert_eq!(store.get("b"), Some("2".to_string()));
    }

    #[test]
    fn test_invalidate_by_tags() {
        let (store, _, _) = store_with(10);
        store.set("a", "1".to_string(), None, &tags(&["x"]));
        store.set("b", "2".to_string(), None, &tags(&["x", "y"]));
        store.set("c", "3".to_string(), None, &tags(&["z"]));

        assert_eq!(store.invalidate_by_tags(&tags(&["x", "unknown"])), 2);
        assert_eq!(store.get("a"), None);
        assert_eq!(store.get("b"), None);
        assert_eq!(store.get("c"), Some("3".to_string()));
        // "y" lost its only key and is pruned
        assert_eq!(store.stats().total_tags, 1);
    }

    #[test]
    fn test_retagging_drops_old_membership() {
        let (store, _, _) = store_with(10);
        store.set("a", "1".to_string(), None, &tags(&["old"]));
        store.set("a", "2".to_string(), None, &tags(&["new"]));

        assert_eq!(store.invalidate_by_tags(&tags(&["old"])), 0);
        assert_eq!(store.invalidate_by_tags(&tags(&["new"])), 1);
    }

    #[test]
    fn test_clear_with_patterns() {
        let (store, _, _) = store_with(10);
        for key in ["prediction:random:1", "prediction:markov:2", "stats:freq:1", "user:9"] {
            store.set(key, "v".to_string(), None, &[]);
        }

        assert_eq!(store.clear("prediction:*"), 2);
        assert_eq!(store.clear("user:?"), 1);
        assert_eq!(store.keys(), vec!["stats:freq:1".to_string()]);
        assert_eq!(store.clear("*"), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_domain_ttl_applies_without_override() {
        let (store, clock, _) = store_with(10);
        // "random" is 60s + up to 60s jitter; the default is 300s
        store.set("prediction:random:abc", "v".to_string(), None, &[]);
        store.set("plain", "v".to_string(), None, &[]);

        clock.advance(Duration::from_secs(121));
        assert!(!store.contains("prediction:random:abc"));
        assert!(store.contains("plain"));

        clock.advance(Duration::from_secs(180));
        assert!(!store.contains("plain"));
    }

    #[test]
    fn test_stats_snapshot() {
        let (store, _, _) = store_with(4);
        store.set("a", "1".to_string(), None, &tags(&["x"]));
        store.set("b", "2".to_string(), None, &tags(&["x", "y"]));

        let stats = store.stats();
        assert_eq!(stats.total_keys, 2);
        assert_eq!(stats.max_size, 4);
        assert_eq!(stats.total_tags, 2);
        assert!((stats.usage_percent - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_glob_matcher_escapes_regex_characters() {
        let matcher = GlobMatcher::new("a.b*");
        assert!(matcher.is_match("a.b-123"));
        assert!(!matcher.is_match("axb"));
    }

    #[test]
    fn test_backfill_keeps_existing_tags() {
        let (store, _, stats) = store_with(10);
        store.set("shared", "old".to_string(), None, &tags(&["predictions"]));
        store.backfill("shared", "fresh".to_string(), Duration::from_secs(60));

        assert_eq!(store.get("shared"), Some("fresh".to_string()));
        assert_eq!(store.invalidate_by_tags(&tags(&["predictions"])), 1);
        assert!(!store.contains("shared"));
        assert_eq!(stats.evictions(), 0);
    }

    #[test]
    fn test_backfill_of_unknown_key_is_untagged() {
        let (store, clock, _) = store_with(10);
        store.backfill("remote-only", "v".to_string(), Duration::from_secs(60));

        assert_eq!(store.stats().total_tags, 0);
        clock.advance(Duration::from_secs(61));
        assert_eq!(store.get("remote-only"), None);
    }

    #[test]
    fn test_concurrent_writers_respect_capacity() {
        let (store, _, _) = store_with(50);
        let store = Arc::new(store);
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let key = format!("t{}:{}", t, i);
                        store.set(&key, key.clone(), None, &[format!("t{}", t)]);
                        store.get(&key);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.len(), 50);
        let stats = store.stats();
        assert!(stats.total_tags <= 8);
    }
}
