//! Idempotency keys and records.
//!
//! Key format: `{user_id}:{operation}:{hex(sha256(canonical payload))}`.
//! The canonical payload is the payload's JSON form with object keys sorted
//! at every level, so field order never changes the digest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shared_types::{RepositoryResult, UserId};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub user_id: UserId,
    pub operation: String,
    pub payload_hash: String,
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.user_id, self.operation, self.payload_hash)
    }
}

/// Deterministic key for `operation` by `user_id` over `payload`.
pub fn generate_idempotency_key<P: Serialize + ?Sized>(
    user_id: &UserId,
    operation: &str,
    payload: &P,
) -> RepositoryResult<IdempotencyKey> {
    let value = serde_json::to_value(payload)?;
    let canonical = canonical_json(&value);
    let digest = Sha256::digest(canonical.as_bytes());
    Ok(IdempotencyKey {
        user_id: user_id.clone(),
        operation: operation.to_string(),
        payload_hash: hex::encode(digest),
    })
}

/// Compact JSON with object keys sorted recursively.
pub fn canonical_json(value: &serde_json::Value) -> String {
    use serde_json::Value;
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    let key = Value::String(k.clone()).to_string();
                    format!("{key}:{}", canonical_json(&map[k]))
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        scalar => scalar.to_string(),
    }
}

/// Cached outcome of the first successful execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: IdempotencyKey,
    pub result: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn new(key: IdempotencyKey, result: serde_json::Value) -> Self {
        Self {
            key,
            result,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    /// Records older than this are evicted by the cleanup sweep.
    pub retention: Duration,
    pub cleanup_interval: Duration,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(24 * 60 * 60),
            cleanup_interval: Duration::from_secs(60 * 60),
        }
    }
}
