//! TTL cache for responses of cacheable engine operations.

use cascade_core::EngineRequest;
use dashmap::DashMap;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};

/// Engine input fields that change per call without changing the result
pub const VOLATILE_FIELDS: [&str; 4] = ["engineToken", "authToken", "timestamp", "requestedAt"];

const PURGE_THRESHOLD: usize = 1024;

/// Stable key for an envelope: hex SHA-256 with volatile input fields removed
pub fn cache_key(request: &EngineRequest) -> String {
    let mut input = request.engine_input.clone();
    if let Value::Object(map) = &mut input {
        for field in VOLATILE_FIELDS {
            map.remove(field);
        }
    }

    let canonical = serde_json::json!({
        "operationType": request.operation_type,
        "engineInput": input,
    });

    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// Process-local response cache
#[derive(Debug)]
pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Live entry for `key`; expired entries are dropped on the way
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Some(entry.value.clone());
            }
        }
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        None
    }

    pub fn insert(&self, key: String, value: Value) {
        if self.entries.len() >= PURGE_THRESHOLD {
            self.purge_expired();
        }
        self.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Drop every expired entry
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
