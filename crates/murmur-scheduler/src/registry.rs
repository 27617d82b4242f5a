//! Mapping from periodic task ids to cron engine entries.
//!
//! Lookups take the read lock. Registration, removal, and reload go through
//! [`PeriodicRegistry::edit`], which holds the write lock for as long as the
//! caller needs, including across the store round-trips that must stay
//! consistent with the engine.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{RwLock, RwLockWriteGuard};

use crate::cron::{CronEngine, CronSchedule, EntryId};

pub struct PeriodicRegistry {
    engine: Arc<CronEngine>,
    entries: RwLock<HashMap<String, EntryId>>,
}

impl PeriodicRegistry {
    pub fn new(engine: Arc<CronEngine>) -> Self {
        Self {
            engine,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<CronEngine> {
        &self.engine
    }

    pub async fn contains(&self, task_id: &str) -> bool {
        self.entries.read().await.contains_key(task_id)
    }

    pub async fn entry_id(&self, task_id: &str) -> Option<EntryId> {
        self.entries.read().await.get(task_id).copied()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Registered task ids, sorted.
    pub async fn task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Take the write lock.
    pub async fn edit(&self) -> RegistryEdit<'_> {
        RegistryEdit {
            engine: &self.engine,
            entries: self.entries.write().await,
        }
    }
}

/// Exclusive access to the registry and its engine entries.
pub struct RegistryEdit<'a> {
    engine: &'a CronEngine,
    entries: RwLockWriteGuard<'a, HashMap<String, EntryId>>,
}

impl RegistryEdit<'_> {
    /// Register a job for `task_id`, replacing any previous entry.
    pub fn register<F, Fut>(&mut self, task_id: &str, schedule: CronSchedule, job: F) -> EntryId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if let Some(old) = self.entries.remove(task_id) {
            self.engine.remove(old);
        }
        let entry = self.engine.add(schedule, job);
        self.entries.insert(task_id.to_string(), entry);
        entry
    }

    /// Remove the entry for `task_id`. Returns whether one existed.
    pub fn unregister(&mut self, task_id: &str) -> bool {
        match self.entries.remove(task_id) {
            Some(entry) => {
                self.engine.remove(entry);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.entries.contains_key(task_id)
    }

    /// Drop every entry. Returns how many were removed.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        for (_, entry) in self.entries.drain() {
            self.engine.remove(entry);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn daily() -> CronSchedule {
        CronSchedule::parse("0 0 8 * * *").unwrap()
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let engine = Arc::new(CronEngine::new());
        let registry = PeriodicRegistry::new(Arc::clone(&engine));

        let entry = registry.edit().await.register("task_1", daily(), || async {});
        assert!(registry.contains("task_1").await);
        assert_eq!(registry.entry_id("task_1").await, Some(entry));
        assert!(engine.contains(entry));

        assert!(registry.edit().await.unregister("task_1"));
        assert!(!registry.edit().await.unregister("task_1"));
        assert!(!engine.contains(entry));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_register_replaces_existing_entry() {
        let engine = Arc::new(CronEngine::new());
        let registry = PeriodicRegistry::new(Arc::clone(&engine));

        let first = registry.edit().await.register("task_1", daily(), || async {});
        let second = registry.edit().await.register("task_1", daily(), || async {});
        assert_ne!(first, second);
        assert!(!engine.contains(first));
        assert_eq!(engine.len(), 1);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_clear_drops_engine_entries() {
        let engine = Arc::new(CronEngine::new());
        let registry = PeriodicRegistry::new(Arc::clone(&engine));
        {
            let mut edit = registry.edit().await;
            edit.register("b", daily(), || async {});
            edit.register("a", daily(), || async {});
            assert!(edit.contains("a"));
        }
        assert_eq!(registry.task_ids().await, vec!["a", "b"]);

        assert_eq!(registry.edit().await.clear(), 2);
        assert!(engine.is_empty());
        assert!(registry.is_empty().await);
    }
}
