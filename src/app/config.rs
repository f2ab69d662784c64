use anyhow::{Context, Result};
use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::utils::CacheError;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries in the in-process store
    pub max_size: usize,
    /// TTL used when a caller does not supply one
    pub default_ttl_secs: u64,
    /// Floor for jittered TTLs
    pub min_ttl_secs: u64,
    /// Manager-level TTL jitter bound (applied as +/-)
    pub ttl_jitter_secs: u64,
    /// Extra jitter (0..=n) on per-domain TTLs chosen by the in-process store
    pub domain_jitter_secs: u64,
    /// Compress encoded values above the threshold
    pub compression_enabled: bool,
    pub compression_threshold_bytes: usize,
    /// Run preloaders at startup
    pub warming_enabled: bool,
    /// Probability that a manager `get` reports a miss regardless of state
    pub forced_miss_probability: f64,
    /// Extra skip probability on the prediction read path
    pub prediction_skip_probability: f64,
    /// Probability that the call wrapper bypasses the cache
    pub call_skip_probability: f64,
    /// Key variants are drawn from 1..=key_variants
    pub key_variants: u32,
    /// Local usage above this percentage marks the cache degraded
    pub high_water_percent: f64,
    /// Time bucket width for domains missing from `domain_buckets`
    pub default_bucket_secs: u64,
    /// Fixed RNG seed, mostly for tests and reproductions
    pub rng_seed: Option<u64>,
    /// Base TTL per domain name, matched as a substring of the key
    pub domain_ttls: BTreeMap<String, u64>,
    /// Time bucket width per domain name
    pub domain_buckets: BTreeMap<String, u64>,
    /// Optional shared store
    pub remote: RemoteConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            default_ttl_secs: DEFAULT_TTL_SECS,
            min_ttl_secs: MIN_TTL_SECS,
            ttl_jitter_secs: TTL_JITTER_SECS,
            domain_jitter_secs: DOMAIN_JITTER_SECS,
            compression_enabled: true,
            compression_threshold_bytes: COMPRESSION_THRESHOLD_BYTES,
            warming_enabled: true,
            forced_miss_probability: FORCED_MISS_PROBABILITY,
            prediction_skip_probability: PREDICTION_SKIP_PROBABILITY,
            call_skip_probability: CALL_SKIP_PROBABILITY,
            key_variants: KEY_VARIANTS,
            high_water_percent: HIGH_WATER_PERCENT,
            default_bucket_secs: DEFAULT_BUCKET_SECS,
            rng_seed: None,
            domain_ttls: to_table(DEFAULT_DOMAIN_TTLS),
            domain_buckets: to_table(DEFAULT_DOMAIN_BUCKETS),
            remote: RemoteConfig::default(),
        }
    }
}

/// Remote (Redis-compatible) store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// e.g. redis://127.0.0.1:6379/0; unset means local-only
    pub url: Option<String>,
    pub connect_timeout_ms: u64,
    pub operation_timeout_ms: u64,
    /// Prefix for tag index records
    pub tag_prefix: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: None,
            connect_timeout_ms: REMOTE_CONNECT_TIMEOUT_MS,
            operation_timeout_ms: REMOTE_OPERATION_TIMEOUT_MS,
            tag_prefix: REMOTE_TAG_PREFIX.to_string(),
        }
    }
}

impl RemoteConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

impl CacheConfig {
    /// Defaults with every source of randomness switched off
    pub fn deterministic(seed: u64) -> Self {
        Self {
            forced_miss_probability: 0.0,
            prediction_skip_probability: 0.0,
            call_skip_probability: 0.0,
            key_variants: 1,
            rng_seed: Some(seed),
            ..Self::default()
        }
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// Base TTL for the longest domain name contained in `key`
    pub fn domain_ttl(&self, key: &str) -> Option<u64> {
        longest_match(&self.domain_ttls, key)
    }

    /// Time bucket width for `domain`, falling back to the default width
    pub fn bucket_secs(&self, domain: &str) -> u64 {
        longest_match(&self.domain_buckets, domain).unwrap_or(self.default_bucket_secs)
    }

    /// Reject values the cache cannot work with
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.max_size == 0 {
            return Err(CacheError::Config("max_size must be at least 1".into()));
        }
        if self.default_ttl_secs == 0 || self.min_ttl_secs == 0 {
            return Err(CacheError::Config(
                "default_ttl_secs and min_ttl_secs must be positive".into(),
            ));
        }
        if self.key_variants == 0 {
            return Err(CacheError::Config("key_variants must be at least 1".into()));
        }
        for (name, p) in [
            ("forced_miss_probability", self.forced_miss_probability),
            ("prediction_skip_probability", self.prediction_skip_probability),
            ("call_skip_probability", self.call_skip_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(CacheError::Config(format!(
                    "{} must be within [0, 1], got {}",
                    name, p
                )));
            }
        }
        if self.default_bucket_secs == 0 || self.domain_buckets.values().any(|&w| w == 0) {
            return Err(CacheError::Config("time bucket widths must be positive".into()));
        }
        Ok(())
    }
}

fn to_table(entries: &[(&str, u64)]) -> BTreeMap<String, u64> {
    entries
        .iter()
        .map(|(name, secs)| (name.to_string(), *secs))
        .collect()
}

fn longest_match(table: &BTreeMap<String, u64>, haystack: &str) -> Option<u64> {
    table
        .iter()
        .filter(|(name, _)| haystack.contains(name.as_str()))
        .max_by_key(|(name, _)| name.len())
        .map(|(_, secs)| *secs)
}

/// Load configuration from multiple sources
pub fn load_config() -> Result<CacheConfig> {
    let global_config = get_config_dir()?.join("config.toml");
    let local_config = PathBuf::from(".lotto-cache/config.toml");
    load_config_from(&[global_config, local_config])
}

/// Layer defaults, the given TOML files (missing ones skipped) and the environment
pub fn load_config_from(paths: &[PathBuf]) -> Result<CacheConfig> {
    let mut figment = Figment::from(Serialized::defaults(CacheConfig::default()));

    for path in paths {
        if path.exists() {
            figment = figment.merge(Toml::file(path));
        }
    }

    // LOTTO_CACHE_MAX_SIZE, LOTTO_CACHE_REMOTE__URL, ...
    figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: CacheConfig = figment
        .extract()
        .context("Failed to load configuration")?;
    config.validate()?;
    Ok(config)
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    if let Some(proj_dirs) = ProjectDirs::from("", "", APP_NAME) {
        let config_dir = proj_dirs.config_dir();
        std::fs::create_dir_all(config_dir)?;
        Ok(config_dir.to_path_buf())
    } else {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .context("Could not determine home directory")?;
        let config_dir = PathBuf::from(home).join(".config").join(APP_NAME);
        std::fs::create_dir_all(&config_dir)?;
        Ok(config_dir)
    }
}

/// Save configuration to file
pub fn save_config(config: &CacheConfig, path: Option<&Path>) -> Result<PathBuf> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => get_config_dir()?.join("config.toml"),
    };

    let toml_string = toml::to_string_pretty(config)?;
    std::fs::write(&path, toml_string)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;

    Ok(path)
}

/// Create a default configuration file if it doesn't exist
pub fn init_config() -> Result<Option<PathBuf>> {
    let config_file = get_config_dir()?.join("config.toml");
    if config_file.exists() {
        return Ok(None);
    }
    save_config(&CacheConfig::default(), Some(&config_file)).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = CacheConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_size, DEFAULT_MAX_SIZE);
        assert!(config.remote.url.is_none());
    }

    #[test]
    fn test_domain_lookup_prefers_longest_name() {
        let mut config = CacheConfig::default();
        config.domain_ttls.insert("hot".to_string(), 10);
        config.domain_ttls.insert("hot_cold".to_string(), 20);

        assert_eq!(config.domain_ttl("prediction:hot_cold:abc"), Some(20));
        assert_eq!(config.domain_ttl("prediction:hot:abc"), Some(10));
        assert_eq!(config.domain_ttl("nothing-here"), None);
    }

    #[test]
    fn test_bucket_falls_back_to_default() {
        let config = CacheConfig::default();
        assert_eq!(config.bucket_secs("no-such-domain"), config.default_bucket_secs);
    }

    #[test]
    fn test_validate_rejects_bad_probability() {
        let config = CacheConfig {
            forced_miss_probability: 1.5,
            ..CacheConfig::default()
        };
        assert!(matches!(config.validate(), Err(CacheError::Config(_))));

        let config = CacheConfig {
            max_size: 0,
            ..CacheConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            "max_size = 42\nforced_miss_probability = 0.0\n\n[remote]\noperation_timeout_ms = 100\n",
        )
        .unwrap();

        let config = load_config_from(&[path]).unwrap();
        assert_eq!(config.max_size, 42);
        assert_eq!(config.forced_miss_probability, 0.0);
        assert_eq!(config.remote.operation_timeout_ms, 100);
        // untouched values keep their defaults
        assert_eq!(config.default_ttl_secs, DEFAULT_TTL_SECS);
    }

    #[test]
    fn test_save_then_load_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("saved.toml");
        let config = CacheConfig {
            key_variants: 3,
            ..CacheConfig::default()
        };

        save_config(&config, Some(&path)).unwrap();
        let loaded = load_config_from(&[path]).unwrap();
        assert_eq!(loaded.key_variants, 3);
        assert_eq!(loaded.domain_ttls, config.domain_ttls);
    }
}
