use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use super::codec::ValueCodec;
use super::keys::{derive_key, sanitize, time_block, validate_key};
use super::memory_store::InProcessStore;
use super::remote::{RedisStore, RemoteStore};
use super::statistics::CacheStatistics;
use super::types::{HealthReport, LocalStats, StatsSnapshot};
use crate::app::CacheConfig;
use crate::constants::{TAG_PREDICTIONS, TAG_STATISTICS, TAG_USER_NUMBERS};
use crate::utils::{
    log_debug, log_warn, CacheError, CacheResult, Dice, SharedClock, SharedDice, SystemClock,
};

/// Two-tier cache: an always-present in-process store, optionally fronted by a
/// shared remote store.
///
/// Remote failures never reach the caller; they are logged and the local tier
/// answers instead. The only errors returned are caller contract violations
/// (malformed keys, zero TTL).
pub struct CacheManager {
    config: CacheConfig,
    local: InProcessStore<Bytes>,
    remote: Option<Arc<dyn RemoteStore>>,
    codec: ValueCodec,
    stats: Arc<CacheStatistics>,
    clock: SharedClock,
    dice: SharedDice,
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("max_size", &self.config.max_size)
            .field("remote", &self.remote.is_some())
            .field("codec", &self.codec)
            .finish()
    }
}

impl CacheManager {
    /// Local-only manager on the system clock
    pub fn new(config: CacheConfig) -> CacheResult<Self> {
        let dice = Arc::new(Dice::from_seed(config.rng_seed));
        Self::with_parts(config, None, Arc::new(SystemClock), dice)
    }

    /// Connect the remote tier if one is configured.
    ///
    /// A failed connection is logged and leaves this instance local-only for its
    /// whole lifetime; there is no reconnect.
    pub async fn connect(config: CacheConfig) -> CacheResult<Self> {
        config.validate()?;

        let remote: Option<Arc<dyn RemoteStore>> = match config.remote.url {
            Some(_) => match RedisStore::connect(&config.remote).await {
                Ok(store) => Some(Arc::new(store) as Arc<dyn RemoteStore>),
                Err(e) => {
                    log_warn("remote", format!("remote store unavailable, running local-only: {}", e));
                    None
                }
            },
            None => None,
        };

        let dice = Arc::new(Dice::from_seed(config.rng_seed));
        Self::with_parts(config, remote, Arc::new(SystemClock), dice)
    }

    /// Assemble a manager from explicit parts
    pub fn with_parts(
        config: CacheConfig,
        remote: Option<Arc<dyn RemoteStore>>,
        clock: SharedClock,
        dice: SharedDice,
    ) -> CacheResult<Self> {
        config.validate()?;

        let stats = Arc::new(CacheStatistics::new(clock.now()));
        let local = InProcessStore::new(&config, clock.clone(), dice.clone(), stats.clone());
        let codec = ValueCodec::new(config.compression_enabled, config.compression_threshold_bytes);

        Ok(Self {
            config,
            local,
            remote,
            codec,
            stats,
            clock,
            dice,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Direct access to the in-process tier, bypassing every randomization layer
    pub fn local(&self) -> &InProcessStore<Bytes> {
        &self.local
    }

    pub(crate) fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub(crate) fn dice(&self) -> &SharedDice {
        &self.dice
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        validate_key(key)?;

        if self.dice.chance(self.config.forced_miss_probability) {
            log_debug(format!("forced miss for '{}'", key));
            self.stats.record_miss();
            return Ok(None);
        }

        if let Some(remote) = &self.remote {
            match remote.get(key).await {
                Ok(Some(payload)) => match self.codec.decode::<T>(&payload) {
                    Ok(value) => {
                        self.local
                            .backfill(key, Bytes::from(payload), self.config.default_ttl());
                        self.stats.record_hit();
                        return Ok(Some(value));
                    }
                    Err(e) => log_warn("remote", format!("undecodable value for '{}': {}", key, e)),
                },
                Ok(None) => {}
                Err(e) => log_warn("remote", format!("get '{}' failed: {}", key, e)),
            }
        }

        match self.local.get(key) {
            Some(payload) => match self.codec.decode::<T>(&payload) {
                Ok(value) => {
                    self.stats.record_hit();
                    Ok(Some(value))
                }
                Err(e) => {
                    log_warn("local", format!("undecodable value for '{}': {}", key, e));
                    self.stats.record_miss();
                    Ok(None)
                }
            },
            None => {
                self.stats.record_miss();
                Ok(None)
            }
        }
    }

    /// Write through both tiers with a jittered TTL.
    ///
    /// `Ok(false)` means the value could not be encoded; nothing was written.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        tags: &[String],
    ) -> CacheResult<bool> {
        validate_key(key)?;
        for tag in tags {
            validate_key(tag)?;
        }
        if ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err(CacheError::InvalidTtl(format!("zero TTL for '{}'", key)));
        }

        let ttl = self.jittered_ttl(ttl.unwrap_or_else(|| self.config.default_ttl()));

        let payload = match self.codec.encode(value) {
            Ok(payload) => payload,
            Err(e) => {
                log_warn("codec", format!("cannot encode value for '{}': {}", key, e));
                return Ok(false);
            }
        };

        if let Some(remote) = &self.remote {
            let ttl_secs = ttl.as_secs();
            match remote.set_ex(key, &payload, ttl_secs).await {
                Ok(()) => {
                    for tag in tags {
                        if let Err(e) = remote.tag_add(tag, key, ttl_secs).await {
                            log_warn("remote", format!("tagging '{}' with '{}' failed: {}", key, tag, e));
                        }
                    }
                }
                Err(e) => log_warn("remote", format!("set '{}' failed: {}", key, e)),
            }
        }

        self.local.set(key, payload, Some(ttl), tags);
        self.stats.record_set();
        Ok(true)
    }

    /// True when either tier held the key
    pub async fn delete(&self, key: &str) -> CacheResult<bool> {
        validate_key(key)?;

        let mut removed = false;
        if let Some(remote) = &self.remote {
            match remote.delete(key).await {
                Ok(existed) => removed |= existed,
                Err(e) => log_warn("remote", format!("delete '{}' failed: {}", key, e)),
            }
        }
        removed |= self.local.delete(key);

        if removed {
            self.stats.record_delete();
        }
        Ok(removed)
    }

    /// Remove keys matching a glob pattern from both tiers; returns the combined count
    pub async fn clear(&self, pattern: &str) -> usize {
        let mut removed = 0;

        if let Some(remote) = &self.remote {
            let result = match remote.keys(pattern).await {
                Ok(keys) => remote.delete_many(&keys).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(count) => removed += count,
                Err(e) => log_warn("remote", format!("clear '{}' failed: {}", pattern, e)),
            }
        }

        removed + self.local.clear(pattern)
    }

    /// Drop every entry carrying any of `tags`. A key present in both tiers counts twice.
    pub async fn invalidate_by_tags(&self, tags: &[String]) -> usize {
        if tags.is_empty() {
            return 0;
        }

        let local_removed = self.local.invalidate_by_tags(tags);
        let mut remote_removed = 0;

        if let Some(remote) = &self.remote {
            match self.remote_tag_members(remote.as_ref(), tags).await {
                Ok(members) => {
                    // a copy backfilled before any local set carries no local tags
                    for key in &members {
                        self.local.delete(key);
                    }
                    match remote.delete_many(&members).await {
                        Ok(count) => remote_removed = count,
                        Err(e) => log_warn("remote", format!("tag invalidation failed: {}", e)),
                    }
                    if let Err(e) = remote.delete_tags(tags).await {
                        log_warn("remote", format!("dropping tag records failed: {}", e));
                    }
                }
                Err(e) => log_warn("remote", format!("reading tag members failed: {}", e)),
            }
        }

        local_removed + remote_removed
    }

    async fn remote_tag_members(
        &self,
        remote: &dyn RemoteStore,
        tags: &[String],
    ) -> CacheResult<Vec<String>> {
        let mut members = Vec::new();
        for tag in tags {
            members.extend(remote.tag_members(tag).await?);
        }
        members.sort();
        members.dedup();
        Ok(members)
    }

    /// Structured health report; never fails
    pub async fn health_check(&self) -> HealthReport {
        let mut errors = Vec::new();
        let remote_configured = self.config.remote.url.is_some();

        let (remote_available, remote_info) = match &self.remote {
            Some(remote) => match remote.ping().await {
                Ok(()) => match remote.info().await {
                    Ok(info) => (true, Some(info)),
                    Err(e) => {
                        log_warn("remote", format!("INFO failed: {}", e));
                        (true, None)
                    }
                },
                Err(e) => {
                    errors.push(format!("remote store unreachable: {}", e));
                    (false, None)
                }
            },
            None => {
                if remote_configured {
                    errors.push("remote store configured but not connected; running local-only".to_string());
                }
                (false, None)
            }
        };

        let local_stats = self.local.stats();
        if local_stats.usage_percent > self.config.high_water_percent {
            errors.push(format!(
                "in-process store at {:.1}% of capacity (limit {:.1}%)",
                local_stats.usage_percent, self.config.high_water_percent
            ));
        }

        HealthReport {
            overall_health: errors.is_empty(),
            remote_configured,
            remote_available,
            remote_info,
            local_stats,
            statistics: self.statistics(),
            errors,
            checked_at: self.clock.now(),
        }
    }

    pub fn statistics(&self) -> StatsSnapshot {
        self.stats.snapshot(self.clock.now())
    }

    pub fn local_stats(&self) -> LocalStats {
        self.local.stats()
    }

    /// Operator action: zero all counters
    pub fn reset_statistics(&self) {
        self.stats.reset(self.clock.now());
    }

    // ---- domain helpers ----

    pub async fn cache_prediction<T: Serialize + ?Sized>(
        &self,
        algorithm: &str,
        params: &Value,
        prediction: &T,
    ) -> bool {
        let domain = format!("prediction:{}", algorithm);
        let key = self.domain_key("prediction", algorithm, &domain, params);
        let tags = vec![TAG_PREDICTIONS.to_string(), format!("prediction:{}", sanitize(algorithm))];
        self.set_quietly(&key, prediction, self.domain_ttl(&domain), &tags)
            .await
    }

    /// Prediction read path: an extra independent skip on top of the forced miss
    pub async fn get_cached_prediction<T: DeserializeOwned>(
        &self,
        algorithm: &str,
        params: &Value,
    ) -> Option<T> {
        if self.dice.chance(self.config.prediction_skip_probability) {
            log_debug(format!("skipping cached prediction for '{}'", algorithm));
            self.stats.record_miss();
            return None;
        }

        let domain = format!("prediction:{}", algorithm);
        let key = self.domain_key("prediction", algorithm, &domain, params);
        self.get_quietly(&key).await
    }

    pub async fn cache_statistics<T: Serialize + ?Sized>(
        &self,
        stat_type: &str,
        params: &Value,
        statistics: &T,
    ) -> bool {
        let domain = format!("statistics:{}", stat_type);
        let key = self.domain_key("stats", stat_type, &domain, params);
        let tags = vec![TAG_STATISTICS.to_string(), format!("stats:{}", sanitize(stat_type))];
        self.set_quietly(&key, statistics, self.domain_ttl(&domain), &tags)
            .await
    }

    pub async fn get_cached_statistics<T: DeserializeOwned>(
        &self,
        stat_type: &str,
        params: &Value,
    ) -> Option<T> {
        let domain = format!("statistics:{}", stat_type);
        let key = self.domain_key("stats", stat_type, &domain, params);
        self.get_quietly(&key).await
    }

    pub async fn cache_user_numbers<T: Serialize + ?Sized>(&self, user_id: &str, numbers: &T) -> bool {
        let params = json!({ "user_id": user_id });
        let key = self.domain_key("user", TAG_USER_NUMBERS, TAG_USER_NUMBERS, &params);
        let tags = vec![TAG_USER_NUMBERS.to_string(), format!("user:{}", sanitize(user_id))];
        self.set_quietly(&key, numbers, self.domain_ttl(TAG_USER_NUMBERS), &tags)
            .await
    }

    pub async fn get_cached_user_numbers<T: DeserializeOwned>(&self, user_id: &str) -> Option<T> {
        let params = json!({ "user_id": user_id });
        let key = self.domain_key("user", TAG_USER_NUMBERS, TAG_USER_NUMBERS, &params);
        self.get_quietly(&key).await
    }

    /// Time-bucketed, variant-salted key. `domain` selects the bucket width.
    fn domain_key(&self, namespace: &str, name: &str, domain: &str, params: &Value) -> String {
        let block = time_block(self.clock.now(), self.config.bucket_secs(domain));
        let variant = self.dice.between(1, u64::from(self.config.key_variants)) as u32;
        derive_key(namespace, name, params, block, variant)
    }

    fn domain_ttl(&self, domain: &str) -> Option<Duration> {
        self.config.domain_ttl(domain).map(Duration::from_secs)
    }

    /// Base TTL +/- jitter, never below the configured floor
    pub(crate) fn jittered_ttl(&self, base: Duration) -> Duration {
        let secs = i64::try_from(base.as_secs())
            .unwrap_or(i64::MAX)
            .saturating_add(self.dice.jitter(self.config.ttl_jitter_secs));
        Duration::from_secs((secs.max(0) as u64).max(self.config.min_ttl_secs))
    }

    pub(crate) async fn get_quietly<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.get(key).await {
            Ok(value) => value,
            Err(e) => {
                log_warn("cache", format!("get rejected: {}", e));
                None
            }
        }
    }

    pub(crate) async fn set_quietly<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        tags: &[String],
    ) -> bool {
        match self.set(key, value, ttl, tags).await {
            Ok(stored) => stored,
            Err(e) => {
                log_warn("cache", format!("set rejected: {}", e));
                false
            }
        }
    }
}
