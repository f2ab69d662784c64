use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::constants::{KEY_DIGEST_LEN, MAX_KEY_LEN, PARAM_DIGEST_LEN};
use crate::utils::{CacheError, CacheResult};

/// floor(now / interval) in unix seconds
pub fn time_block(now: DateTime<Utc>, interval_secs: u64) -> i64 {
    let interval = interval_secs.clamp(1, i64::MAX as u64) as i64;
    now.timestamp().div_euclid(interval)
}

/// JSON text with object keys sorted at every level
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Short, order-independent digest of caller parameters
pub fn param_digest(params: &Value) -> String {
    let mut digest = sha256_hex(&canonical_json(params));
    digest.truncate(PARAM_DIGEST_LEN);
    digest
}

/// Key for a domain value: `<namespace>:<name>:<digest>`.
///
/// The digest covers the name, the time block, the variant and the parameter digest,
/// so the same logical request rolls onto a new key every bucket and may land on any
/// of the variants within one bucket.
pub fn derive_key(namespace: &str, name: &str, params: &Value, block: i64, variant: u32) -> String {
    let material = format!("{}:{}:{}:{}", name, block, variant, param_digest(params));
    let mut digest = sha256_hex(&material);
    digest.truncate(KEY_DIGEST_LEN);
    format!("{}:{}:{}", namespace, sanitize(name), digest)
}

/// Key for a memoized call: function identity, arguments and a time block
pub fn call_key(function: &str, args: &Value, block: i64) -> String {
    let material = format!("{}:{}:{}", function, canonical_json(args), block);
    let mut digest = sha256_hex(&material);
    digest.truncate(KEY_DIGEST_LEN);
    format!("call:{}:{}", sanitize(function), digest)
}

/// Domain names go into keys verbatim, minus anything key validation would reject
pub(crate) fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_whitespace() || c.is_control() { '_' } else { c })
        .take(64)
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Keys must be non-empty, bounded and free of whitespace/control characters
pub fn validate_key(key: &str) -> CacheResult<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidKey("key is empty".to_string()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(CacheError::InvalidKey(format!(
            "key is {} bytes, limit is {}",
            key.len(),
            MAX_KEY_LEN
        )));
    }
    if key.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(CacheError::InvalidKey(format!(
            "key {:?} contains whitespace or control characters",
            key
        )));
    }
    Ok(())
}
