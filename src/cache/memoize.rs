use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

use super::cache_manager::CacheManager;
use super::keys::{call_key, time_block};
use crate::constants::CALL_BUCKET_SECS;
use crate::utils::log_debug;

/// How to cache one call: the caller names the function and hands over its
/// arguments, nothing is inferred.
#[derive(Debug, Clone)]
pub struct CallRecipe {
    pub function: String,
    pub args: Value,
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
}

impl CallRecipe {
    pub fn new(function: impl Into<String>, args: Value) -> Self {
        Self {
            function: function.into(),
            args,
            ttl: None,
            tags: Vec::new(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

impl CacheManager {
    /// Run `compute` through the cache.
    ///
    /// Now and then (`call_skip_probability`) the cache read is skipped so fresh
    /// values keep being produced. `Ok` results are stored; `Err` results are
    /// returned untouched and never cached. Cache-side problems only get logged.
    pub async fn memoize<T, E, F, Fut>(&self, recipe: &CallRecipe, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let block = time_block(self.clock().now(), CALL_BUCKET_SECS);
        let key = call_key(&recipe.function, &recipe.args, block);

        if self.dice().chance(self.config().call_skip_probability) {
            log_debug(format!("bypassing cache for call '{}'", recipe.function));
        } else if let Some(cached) = self.get_quietly::<T>(&key).await {
            return Ok(cached);
        }

        let value = compute().await?;
        self.set_quietly(&key, &value, recipe.ttl, &recipe.tags).await;
        Ok(value)
    }
}
