//! Murmur Storage crate - SQLite message archive and the durable key-value store.
//!
//! Provides a WAL-mode SQLite database with migrations for the raw chat
//! archive (users, chat histories, vector links, group settings) and the
//! [`DurableStore`] abstraction used by the task scheduler and the temporary
//! memory cache, with in-process and Redis implementations.

pub mod db;
pub mod durable;
pub mod migrations;
pub mod redis_store;
pub mod repository;

pub use db::Database;
pub use durable::{DurableStore, MemoryStore, SharedStore, StoreError};
pub use redis_store::RedisStore;
pub use repository::{
    GroupSettings, GroupSettingsRepository, MessageRef, MessageStore, SqliteMessageStore,
    StoredMemory,
};
