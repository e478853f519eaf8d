//! Read-side cache.
//!
//! Dashboard aggregates are cached with a short TTL by the read path. The
//! ingestion core only ever calls [`ReadCache::delete`] to invalidate them.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;

use crate::errors::CacheError;

/// Key-value cache with per-entry TTL.
#[async_trait]
pub trait ReadCache: Send + Sync {
    /// Fetch a live entry.
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    /// Store `value` for `ttl`.
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError>;

    /// Remove an entry. Returns whether a live entry was removed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;
}

struct Entry {
    value: Value,
    expires_at: Instant,
}

/// In-process [`ReadCache`].
///
/// Expiry uses the monotonic clock. When full, expired entries are purged
/// first and then the entry closest to expiry is evicted.
pub struct InMemoryTtlCache {
    entries: Mutex<HashMap<String, Entry>>,
    max_entries: usize,
}

impl InMemoryTtlCache {
    /// Create a cache holding at most `max_entries` (minimum 1).
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// Number of stored entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl ReadCache for InMemoryTtlCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Ok(Some(entry.value.clone())),
            Some(_) => {
                let _ = entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        if !entries.contains_key(key) && entries.len() >= self.max_entries {
            entries.retain(|_, e| e.expires_at > now);
            if entries.len() >= self.max_entries {
                let soonest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.expires_at)
                    .map(|(k, _)| k.clone());
                if let Some(k) = soonest {
                    let _ = entries.remove(&k);
                }
            }
        }
        let _ = entries.insert(
            key.to_owned(),
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let removed = self.entries.lock().remove(key);
        Ok(removed.is_some_and(|e| e.expires_at > Instant::now()))
    }
}
