//! Repository implementations for SQLite-backed persistence.
//!
//! [`MessageStore`] is the narrow contract the memory pipeline needs from the
//! raw-message archive: persist an utterance, remember which vector was built
//! from it, and hydrate vector ids back into text. [`SqliteMessageStore`] is
//! the production implementation. [`GroupSettingsRepository`] holds the
//! per-group switches.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};

use murmur_core::error::MurmurError;
use murmur_core::types::{InboundMessage, Timestamp};

use crate::db::Database;

/// Identifier of a raw message in the archive.
pub type MessageRef = i64;

/// A long-term memory hydrated from its vector id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMemory {
    pub vector_id: String,
    pub message_ref: MessageRef,
    pub content: String,
    pub group_id: i64,
    pub created_at: Timestamp,
}

/// Raw-message archive as seen by the memory pipeline.
pub trait MessageStore: Send + Sync {
    /// Persist an utterance (creating or refreshing its author) and return
    /// the new message reference.
    fn save_raw_message(&self, message: &InboundMessage) -> Result<MessageRef, MurmurError>;

    /// Record that `vector_id` was embedded from `message_ref`.
    fn link_vector(
        &self,
        vector_id: &str,
        message_ref: MessageRef,
        content: &str,
    ) -> Result<(), MurmurError>;

    /// Hydrate vector ids. Unknown ids are omitted; the result follows the
    /// order of `vector_ids`.
    fn find_by_vector_ids(&self, vector_ids: &[String]) -> Result<Vec<StoredMemory>, MurmurError>;
}

/// SQLite implementation of [`MessageStore`].
pub struct SqliteMessageStore {
    db: Arc<Database>,
}

impl SqliteMessageStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Count archived raw messages.
    pub fn count(&self) -> Result<u64, MurmurError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM chat_histories", [], |row| row.get(0))
                .map_err(|e| MurmurError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }

    /// Fetch the content of a raw message.
    pub fn find_content(&self, message_ref: MessageRef) -> Result<Option<String>, MurmurError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT content FROM chat_histories WHERE id = ?1",
                rusqlite::params![message_ref],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| MurmurError::Storage(e.to_string()))
        })
    }
}

impl MessageStore for SqliteMessageStore {
    fn save_raw_message(&self, message: &InboundMessage) -> Result<MessageRef, MurmurError> {
        let now = Utc::now().timestamp();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (user_ref, nickname) VALUES (?1, ?2)
                 ON CONFLICT(user_ref) DO UPDATE
                 SET nickname = excluded.nickname, updated_at = strftime('%s', 'now')
                 WHERE users.nickname != excluded.nickname",
                rusqlite::params![message.user_ref, message.nickname],
            )
            .map_err(|e| MurmurError::Storage(format!("Failed to upsert user: {}", e)))?;

            let user_id: i64 = conn
                .query_row(
                    "SELECT id FROM users WHERE user_ref = ?1",
                    rusqlite::params![message.user_ref],
                    |row| row.get(0),
                )
                .map_err(|e| MurmurError::Storage(e.to_string()))?;

            conn.execute(
                "INSERT INTO chat_histories (user_id, group_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![user_id, message.group_id, message.content, now],
            )
            .map_err(|e| MurmurError::Storage(format!("Failed to save chat history: {}", e)))?;

            Ok(conn.last_insert_rowid())
        })
    }

    fn link_vector(
        &self,
        vector_id: &str,
        message_ref: MessageRef,
        content: &str,
    ) -> Result<(), MurmurError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO member_embeddings (vector_id, content_summary, ref_msg_id)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(vector_id) DO UPDATE
                 SET content_summary = excluded.content_summary, ref_msg_id = excluded.ref_msg_id",
                rusqlite::params![vector_id, content, message_ref],
            )
            .map_err(|e| MurmurError::Storage(format!("Failed to link vector: {}", e)))?;
            Ok(())
        })
    }

    fn find_by_vector_ids(&self, vector_ids: &[String]) -> Result<Vec<StoredMemory>, MurmurError> {
        if vector_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; vector_ids.len()].join(", ");
        let sql = format!(
            "SELECT e.vector_id, e.ref_msg_id, e.content_summary, h.group_id, h.created_at
             FROM member_embeddings e
             JOIN chat_histories h ON h.id = e.ref_msg_id
             WHERE e.vector_id IN ({})",
            placeholders
        );

        let mut found: HashMap<String, StoredMemory> = self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| MurmurError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(vector_ids.iter()), |row| {
                    Ok(StoredMemory {
                        vector_id: row.get(0)?,
                        message_ref: row.get(1)?,
                        content: row.get(2)?,
                        group_id: row.get(3)?,
                        created_at: Timestamp(row.get(4)?),
                    })
                })
                .map_err(|e| MurmurError::Storage(e.to_string()))?;

            let mut found = HashMap::new();
            for row in rows {
                let memory = row.map_err(|e| MurmurError::Storage(e.to_string()))?;
                found.insert(memory.vector_id.clone(), memory);
            }
            Ok(found)
        })?;

        Ok(vector_ids
            .iter()
            .filter_map(|id| found.remove(id))
            .collect())
    }
}

/// Per-group feature switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSettings {
    /// Whether the bot speaks in this group at all.
    pub is_active: bool,
    /// Whether messages from this group are archived into memory.
    pub rag_enabled: bool,
}

impl Default for GroupSettings {
    fn default() -> Self {
        Self {
            is_active: true,
            rag_enabled: true,
        }
    }
}

/// Repository for the `groups` table.
pub struct GroupSettingsRepository {
    db: Arc<Database>,
}

impl GroupSettingsRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Settings for a group; groups never configured get the defaults.
    pub fn get(&self, group_id: i64) -> Result<GroupSettings, MurmurError> {
        self.db.with_conn(|conn| {
            let row: Option<(bool, bool)> = conn
                .query_row(
                    "SELECT is_active, rag_enabled FROM groups WHERE group_id = ?1",
                    rusqlite::params![group_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(|e| MurmurError::Storage(e.to_string()))?;

            Ok(row
                .map(|(is_active, rag_enabled)| GroupSettings {
                    is_active,
                    rag_enabled,
                })
                .unwrap_or_default())
        })
    }

    pub fn set_active(&self, group_id: i64, active: bool) -> Result<(), MurmurError> {
        self.upsert(group_id, "is_active", active)
    }

    pub fn set_rag_enabled(&self, group_id: i64, enabled: bool) -> Result<(), MurmurError> {
        self.upsert(group_id, "rag_enabled", enabled)
    }

    fn upsert(&self, group_id: i64, column: &'static str, value: bool) -> Result<(), MurmurError> {
        let sql = format!(
            "INSERT INTO groups (group_id, {column}) VALUES (?1, ?2)
             ON CONFLICT(group_id) DO UPDATE
             SET {column} = excluded.{column}, updated_at = strftime('%s', 'now')"
        );
        self.db.with_conn(|conn| {
            conn.execute(&sql, rusqlite::params![group_id, value])
                .map_err(|e| MurmurError::Storage(format!("Failed to update group: {}", e)))?;
            Ok(())
        })
    }
}
