//! Durable key-value store abstraction.
//!
//! The scheduler keeps task payloads in hashes and the one-shot due index in
//! a sorted set; the temporary memory tier uses plain keys with a TTL. Both
//! go through [`DurableStore`], backed by Redis in production and by
//! [`MemoryStore`] in tests and single-process runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use murmur_core::error::MurmurError;

/// Errors from the durable store.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Store internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for MurmurError {
    fn from(err: StoreError) -> Self {
        MurmurError::Storage(err.to_string())
    }
}

/// Key-value, hash and sorted-set operations over a durable backend.
///
/// Sorted-set scores are whole seconds.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration)
        -> Result<(), StoreError>;
    async fn del(&self, key: &str) -> Result<bool, StoreError>;
    /// Keys beginning with `prefix`, in lexicographic order.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;
    async fn hdel(&self, key: &str, field: &str) -> Result<bool, StoreError>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<(), StoreError>;
    /// Members with `min <= score <= max`, ascending by score.
    async fn zrange_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<Vec<String>, StoreError>;
    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError>;
}

pub type SharedStore = Arc<dyn DurableStore>;

#[derive(Default)]
struct Inner {
    strings: HashMap<String, (String, Option<Instant>)>,
    hashes: HashMap<String, HashMap<String, String>>,
    zsets: HashMap<String, HashMap<String, i64>>,
}

impl Inner {
    fn purge_expired(&mut self, now: Instant) {
        self.strings
            .retain(|_, (_, expires)| expires.map_or(true, |at| at > now));
    }
}

/// In-process implementation of [`DurableStore`].
///
/// Honors TTLs lazily on access. Can be switched offline to exercise
/// store-unavailable paths.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    online: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            online: AtomicBool::new(true),
        }
    }

    /// Simulate the backend going away (or coming back).
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        let mut inner = self
            .inner
            .lock()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        inner.purge_expired(Instant::now());
        Ok(inner)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock()?.strings.get(key).map(|(v, _)| v.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.lock()?
            .strings
            .insert(key.to_string(), (value.to_string(), None));
        Ok(())
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let expires = Instant::now() + ttl;
        self.lock()?
            .strings
            .insert(key.to_string(), (value.to_string(), Some(expires)));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let removed = inner.strings.remove(key).is_some()
            | inner.hashes.remove(key).is_some()
            | inner.zsets.remove(key).is_some();
        Ok(removed)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.lock()?;
        let mut keys: Vec<String> = inner
            .strings
            .keys()
            .chain(inner.hashes.keys())
            .chain(inner.zsets.keys())
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .lock()?
            .hashes
            .get(key)
            .and_then(|h| h.get(field))
            .cloned())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.lock()?
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let removed = match inner.hashes.get_mut(key) {
            Some(hash) => hash.remove(field).is_some(),
            None => false,
        };
        if inner.hashes.get(key).is_some_and(|h| h.is_empty()) {
            inner.hashes.remove(key);
        }
        Ok(removed)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        Ok(self.lock()?.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<(), StoreError> {
        self.lock()?
            .zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<Vec<String>, StoreError> {
        let inner = self.lock()?;
        let Some(zset) = inner.zsets.get(key) else {
            return Ok(Vec::new());
        };
        let mut hits: Vec<(&String, i64)> = zset
            .iter()
            .filter(|(_, score)| (min..=max).contains(*score))
            .map(|(m, s)| (m, *s))
            .collect();
        hits.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        Ok(hits.into_iter().map(|(m, _)| m.clone()).collect())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let removed = match inner.zsets.get_mut(key) {
            Some(zset) => zset.remove(member).is_some(),
            None => false,
        };
        if inner.zsets.get(key).is_some_and(|z| z.is_empty()) {
            inner.zsets.remove(key);
        }
        Ok(removed)
    }
}
