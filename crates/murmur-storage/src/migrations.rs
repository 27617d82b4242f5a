//! Database schema migrations.
//!
//! Applies the initial schema: users, chat_histories, member_embeddings,
//! groups, and the schema_migrations bookkeeping table.

use rusqlite::Connection;
use tracing::info;

use murmur_core::error::MurmurError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), MurmurError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| MurmurError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| MurmurError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<(), MurmurError> {
    conn.execute_batch(
        "
        -- Chat participants, keyed by the platform account id.
        CREATE TABLE IF NOT EXISTS users (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_ref    TEXT NOT NULL UNIQUE,
            nickname    TEXT NOT NULL DEFAULT '',
            created_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            updated_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        -- Raw utterances. Every archived message lands here first.
        CREATE TABLE IF NOT EXISTS chat_histories (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     INTEGER NOT NULL,
            group_id    INTEGER NOT NULL,
            content     TEXT NOT NULL,
            created_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_chat_histories_group
            ON chat_histories (group_id, created_at DESC);

        -- Association between a vector id and the message it was built from.
        CREATE TABLE IF NOT EXISTS member_embeddings (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            vector_id       TEXT NOT NULL UNIQUE,
            content_summary TEXT NOT NULL,
            ref_msg_id      INTEGER NOT NULL,
            created_at      INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            FOREIGN KEY (ref_msg_id) REFERENCES chat_histories(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_member_embeddings_ref
            ON member_embeddings (ref_msg_id);

        -- Per-group switches. Absent rows mean both switches are on.
        CREATE TABLE IF NOT EXISTS groups (
            group_id    INTEGER PRIMARY KEY NOT NULL,
            is_active   INTEGER NOT NULL DEFAULT 1,
            rag_enabled INTEGER NOT NULL DEFAULT 1,
            updated_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        INSERT INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| MurmurError::Storage(format!("Migration v1 failed: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        conn
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let versions: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(versions, 1);
    }

    #[test]
    fn test_chat_history_requires_user() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO chat_histories (user_id, group_id, content) VALUES (999, 1, 'orphan')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_vector_id_is_unique() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        conn.execute("INSERT INTO users (user_ref) VALUES ('1')", [])
            .unwrap();
        conn.execute(
            "INSERT INTO chat_histories (user_id, group_id, content) VALUES (1, 1, 'hi there')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO member_embeddings (vector_id, content_summary, ref_msg_id) VALUES ('msg_1', 'hi there', 1)",
            [],
        )
        .unwrap();

        let dup = conn.execute(
            "INSERT INTO member_embeddings (vector_id, content_summary, ref_msg_id) VALUES ('msg_1', 'again', 1)",
            [],
        );
        assert!(dup.is_err());
    }

    #[test]
    fn test_group_switch_defaults() {
        let conn = open_test_conn();
        run_migrations(&conn).unwrap();

        conn.execute("INSERT INTO groups (group_id) VALUES (7)", [])
            .unwrap();
        let (active, rag): (i64, i64) = conn
            .query_row(
                "SELECT is_active, rag_enabled FROM groups WHERE group_id = 7",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!((active, rag), (1, 1));
    }
}
