/// Constants module to avoid magic numbers in the codebase

// Naming
pub const APP_NAME: &str = "lotto-cache";
pub const ENV_PREFIX: &str = "LOTTO_CACHE_";

// In-process store
pub const DEFAULT_MAX_SIZE: usize = 1000;
pub const DEFAULT_TTL_SECS: u64 = 300;
pub const DOMAIN_JITTER_SECS: u64 = 60;

// Manager TTL randomization
pub const TTL_JITTER_SECS: u64 = 30;
pub const MIN_TTL_SECS: u64 = 10;

// Anti-predictability
pub const FORCED_MISS_PROBABILITY: f64 = 0.05;
pub const PREDICTION_SKIP_PROBABILITY: f64 = 0.5;
pub const CALL_SKIP_PROBABILITY: f64 = 0.2;
pub const KEY_VARIANTS: u32 = 5;

// Key derivation
pub const DEFAULT_BUCKET_SECS: u64 = 300;
pub const CALL_BUCKET_SECS: u64 = 60;
pub const PARAM_DIGEST_LEN: usize = 16;
pub const KEY_DIGEST_LEN: usize = 32;
pub const MAX_KEY_LEN: usize = 250;

// Encoding
pub const COMPRESSION_THRESHOLD_BYTES: usize = 512;

// Health
pub const HIGH_WATER_PERCENT: f64 = 95.0;

// Remote store
pub const REMOTE_CONNECT_TIMEOUT_MS: u64 = 1000;
pub const REMOTE_OPERATION_TIMEOUT_MS: u64 = 250;
pub const REMOTE_TAG_PREFIX: &str = "tag:";

// Tags applied by the domain helpers
pub const TAG_PREDICTIONS: &str = "predictions";
pub const TAG_STATISTICS: &str = "statistics";
pub const TAG_USER_NUMBERS: &str = "user_numbers";

// Base TTL (seconds) per prediction algorithm / statistic kind
pub const DEFAULT_DOMAIN_TTLS: &[(&str, u64)] = &[
    ("random", 60),
    ("frequency", 600),
    ("hot_cold", 300),
    ("pattern", 900),
    ("markov", 450),
    ("statistics", 1800),
    ("user_numbers", 3600),
];

// Time bucket width (seconds) per domain; volatile predictions roll over faster
pub const DEFAULT_DOMAIN_BUCKETS: &[(&str, u64)] = &[
    ("random", 60),
    ("frequency", 300),
    ("hot_cold", 180),
    ("pattern", 600),
    ("markov", 300),
    ("statistics", 3600),
    ("user_numbers", 3600),
];
