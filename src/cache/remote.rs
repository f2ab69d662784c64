use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

use super::types::RemoteInfo;
use crate::app::RemoteConfig;
use crate::utils::{log_info, CacheError, CacheResult};

const SCAN_BATCH: usize = 500;

/// SADD the member, then move the set's expiry only forward. A set shared by
/// short- and long-lived keys must outlive the longest of them.
const TAG_ADD_SCRIPT: &str = r#"
redis.call('SADD', KEYS[1], ARGV[1])
local requested = tonumber(ARGV[2])
local current = redis.call('TTL', KEYS[1])
if current < requested then
  redis.call('EXPIRE', KEYS[1], requested)
  return requested
end
return current
"#;

/// Shared key/value service sitting behind the in-process tier.
///
/// Implementations must be safe for concurrent use; the manager calls them without
/// holding any lock.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn ping(&self) -> CacheResult<()>;

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> CacheResult<()>;

    /// True when the key existed
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    async fn delete_many(&self, keys: &[String]) -> CacheResult<usize>;

    /// Keys matching a glob pattern
    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>>;

    /// Add `key` to the tag's member set; the set's expiry is only ever extended
    async fn tag_add(&self, tag: &str, key: &str, ttl_secs: u64) -> CacheResult<()>;

    async fn tag_members(&self, tag: &str) -> CacheResult<Vec<String>>;

    /// Drop the member-set records themselves
    async fn delete_tags(&self, tags: &[String]) -> CacheResult<usize>;

    async fn info(&self) -> CacheResult<RemoteInfo>;
}

/// Redis-backed remote store with per-operation timeouts
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    tag_script: redis::Script,
    operation_timeout: Duration,
    tag_prefix: String,
    url: String,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("url", &self.url)
            .field("operation_timeout", &self.operation_timeout)
            .finish()
    }
}

impl RedisStore {
    /// Connect and ping, both bounded by the connect timeout
    pub async fn connect(config: &RemoteConfig) -> CacheResult<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| CacheError::Config("remote.url is not set".to_string()))?;

        let client = redis::Client::open(url.as_str())?;
        let conn = timeout(config.connect_timeout(), ConnectionManager::new(client))
            .await
            .map_err(|_| CacheError::Timeout(config.connect_timeout_ms))??;

        let store = Self {
            conn,
            tag_script: redis::Script::new(TAG_ADD_SCRIPT),
            operation_timeout: config.operation_timeout(),
            tag_prefix: config.tag_prefix.clone(),
            url,
        };

        timeout(config.connect_timeout(), store.ping())
            .await
            .map_err(|_| CacheError::Timeout(config.connect_timeout_ms))??;

        log_info("remote", format!("connected to {}", store.url));
        Ok(store)
    }

    async fn run<T, F>(&self, fut: F) -> CacheResult<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match timeout(self.operation_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(CacheError::Timeout(self.operation_timeout.as_millis() as u64)),
        }
    }

    fn tag_key(&self, tag: &str) -> String {
        format!("{}{}", self.tag_prefix, tag)
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let pong: String = self.run(redis::cmd("PING").query_async(&mut conn)).await?;
        if pong.eq_ignore_ascii_case("PONG") {
            Ok(())
        } else {
            Err(CacheError::Remote(format!("unexpected PING reply: {}", pong)))
        }
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = self
            .run(redis::cmd("GET").arg(key).query_async(&mut conn))
            .await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let _: () = self
            .run(
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("EX")
                    .arg(ttl_secs.max(1))
                    .query_async(&mut conn),
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = self
            .run(redis::cmd("DEL").arg(key).query_async(&mut conn))
            .await?;
        Ok(removed > 0)
    }

    async fn delete_many(&self, keys: &[String]) -> CacheResult<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let removed: i64 = self
            .run(redis::cmd("DEL").arg(keys).query_async(&mut conn))
            .await?;
        Ok(removed.max(0) as usize)
    }

    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = self
                .run(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn),
                )
                .await?;
            // tag records share the keyspace but are not cache entries
            keys.extend(batch.into_iter().filter(|key| !key.starts_with(&self.tag_prefix)));
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN may return a key more than once
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn tag_add(&self, tag: &str, key: &str, ttl_secs: u64) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .run(
                self.tag_script
                    .key(self.tag_key(tag))
                    .arg(key)
                    .arg(ttl_secs.max(1))
                    .invoke_async(&mut conn),
            )
            .await?;
        Ok(())
    }

    async fn tag_members(&self, tag: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = self
            .run(
                redis::cmd("SMEMBERS")
                    .arg(self.tag_key(tag))
                    .query_async(&mut conn),
            )
            .await?;
        Ok(members)
    }

    async fn delete_tags(&self, tags: &[String]) -> CacheResult<usize> {
        let tag_keys: Vec<String> = tags.iter().map(|tag| self.tag_key(tag)).collect();
        self.delete_many(&tag_keys).await
    }

    async fn info(&self) -> CacheResult<RemoteInfo> {
        let mut conn = self.conn.clone();
        let text: String = self
            .run(redis::cmd("INFO").arg("memory").query_async(&mut conn))
            .await?;
        Ok(parse_memory_info(&text))
    }
}

/// Pull the memory figures out of an `INFO memory` reply
pub fn parse_memory_info(text: &str) -> RemoteInfo {
    let mut info = RemoteInfo::default();
    for line in text.lines() {
        let Some((field, value)) = line.trim().split_once(':') else {
            continue;
        };
        match field {
            "used_memory" => info.used_memory = value.parse().ok(),
            "used_memory_human" => info.used_memory_human = Some(value.to_string()),
            "maxmemory" => info.maxmemory = value.parse().ok(),
            _ => {}
        }
    }
    info
}
