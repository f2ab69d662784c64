// Gateway module for cache - follows the Train Station Pattern
// All external access must go through this gateway

// Private submodules - not directly accessible from outside
mod cache_manager;
mod codec;
mod keys;
mod memoize;
mod memory_store;
mod remote;
mod statistics;
mod types;
mod warming;

// Public re-exports - the ONLY way to access cache functionality
pub use cache_manager::CacheManager;
pub use codec::ValueCodec;
pub use keys::{call_key, canonical_json, derive_key, param_digest, time_block, validate_key};
pub use memoize::CallRecipe;
pub use memory_store::{GlobMatcher, InProcessStore};
pub use remote::{parse_memory_info, RedisStore, RemoteStore};
pub use statistics::CacheStatistics;
pub use types::{
    CacheEntry, HealthReport, LocalStats, RemoteInfo, StatsSnapshot, WarmupReport, WarmupStatus,
};
pub use warming::{Preloader, SeedEntry};

use crate::app::CacheConfig;
use crate::utils::CacheResult;

/// Build the process-wide cache service, connecting the remote tier when configured
pub async fn init(config: CacheConfig) -> CacheResult<std::sync::Arc<CacheManager>> {
    CacheManager::connect(config).await.map(std::sync::Arc::new)
}
