pub mod app;
pub mod cache;
pub mod cli;
pub mod constants;
pub mod utils;

pub use app::{load_config, CacheConfig};
pub use cache::{CacheManager, CallRecipe, HealthReport, InProcessStore, Preloader, RemoteStore};
pub use utils::{CacheError, CacheResult};
