//! The SQLite message archive.
//!
//! Holds every archived chat line (`chat_histories`), the speakers seen so
//! far (`users`) and the per-group switches (`groups`). The vector index
//! refers back to archive rows by id.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

use murmur_core::error::MurmurError;

use crate::migrations;

/// Handle on the archive. One connection, serialised behind a mutex.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the archive file, creating it and its directory on first use.
    pub fn new(path: &Path) -> Result<Self, MurmurError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| {
            MurmurError::Storage(format!("Cannot open message archive {}: {}", path.display(), e))
        })?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")
            .map_err(|e| MurmurError::Storage(format!("Cannot enable WAL on archive: {}", e)))?;

        let db = Self::prepare(conn)?;
        info!(path = %path.display(), "Message archive ready");
        Ok(db)
    }

    /// A throwaway archive for tests and dry runs.
    pub fn in_memory() -> Result<Self, MurmurError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| MurmurError::Storage(format!("Cannot create scratch archive: {}", e)))?;
        Self::prepare(conn)
    }

    fn prepare(conn: Connection) -> Result<Self, MurmurError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| MurmurError::Storage(format!("Cannot enable foreign keys: {}", e)))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Run `f` against the archive connection. Callers map their own
    /// rusqlite errors.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, MurmurError>
    where
        F: FnOnce(&Connection) -> Result<T, MurmurError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| MurmurError::Storage(format!("Archive connection poisoned: {}", e)))?;
        f(&conn)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}
