//! Short-lived memories in the durable store's TTL cache.
//!
//! Keys look like `temp:group:{group_id}:user:{user_ref}:{message_ref}` and
//! expire on their own; nothing here deletes them.

use std::time::Duration;

use tracing::debug;

use murmur_storage::{MessageRef, SharedStore, StoreError};

const KEY_PREFIX: &str = "temp:group:";

pub struct TemporaryMemory {
    store: SharedStore,
    ttl: Duration,
}

impl TemporaryMemory {
    pub fn new(store: SharedStore, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn key(group_id: i64, user_ref: &str, message_ref: MessageRef) -> String {
        format!("{KEY_PREFIX}{group_id}:user:{user_ref}:{message_ref}")
    }

    /// Cache `content` and return its key.
    pub async fn save(
        &self,
        group_id: i64,
        user_ref: &str,
        message_ref: MessageRef,
        content: &str,
    ) -> Result<String, StoreError> {
        let key = Self::key(group_id, user_ref, message_ref);
        self.store.set_with_ttl(&key, content, self.ttl).await?;
        debug!(key = %key, ttl_secs = self.ttl.as_secs(), "Temporary memory cached");
        Ok(key)
    }

    /// Up to `limit` unexpired memories of a group, oldest first.
    pub async fn recent(&self, group_id: i64, limit: usize) -> Result<Vec<String>, StoreError> {
        let prefix = format!("{KEY_PREFIX}{group_id}:");
        let mut keys = self.store.keys_with_prefix(&prefix).await?;
        keys.sort_by_key(|key| message_ref_of(key));
        let skip = keys.len().saturating_sub(limit);

        let mut memories = Vec::with_capacity(limit.min(keys.len()));
        for key in keys.into_iter().skip(skip) {
            if let Some(content) = self.store.get(&key).await? {
                if !content.is_empty() {
                    memories.push(content);
                }
            }
        }
        Ok(memories)
    }
}

fn message_ref_of(key: &str) -> MessageRef {
    key.rsplit(':')
        .next()
        .and_then(|tail| tail.parse().ok())
        .unwrap_or(0)
}
