use thiserror::Error;

/// Main error type for the cache subsystem
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    #[error("Invalid TTL: {0}")]
    InvalidTtl(String),

    #[error("Remote store error: {0}")]
    Remote(String),

    #[error("Remote store timed out after {0} ms")]
    Timeout(u64),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Remote(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Codec(err.to_string())
    }
}

/// Result alias used throughout the cache modules
pub type CacheResult<T> = Result<T, CacheError>;
