//! Database handle and schema bootstrap.
//!
//! One SQLite file backs the whole agent state: filesystem tables, the
//! key-value store, and the tool-call log. The schema is applied
//! idempotently on every open; `chunk_size` is installed on first open and
//! cached in memory for the lifetime of the handle.

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::error::{Result, StoreError};

/// Chunk size installed on first open, in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// The root directory inode number.
const ROOT_INO: i64 = 1;

/// Mode bits for the root directory (directory type | 0755).
const ROOT_MODE: i64 = 0o040_755;

const SCHEMA: &str = r#"
-- Recognized keys: chunk_size (decimal text). Written once, never changed.
CREATE TABLE IF NOT EXISTS fs_config (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- File, directory, and symlink metadata. Root is always ino=1.
CREATE TABLE IF NOT EXISTS fs_inode (
    ino INTEGER PRIMARY KEY AUTOINCREMENT,
    mode INTEGER NOT NULL,
    uid INTEGER NOT NULL DEFAULT 0,
    gid INTEGER NOT NULL DEFAULT 0,
    size INTEGER NOT NULL DEFAULT 0,
    atime INTEGER NOT NULL,
    mtime INTEGER NOT NULL,
    ctime INTEGER NOT NULL
);

-- Edges from a parent directory to a named child.
CREATE TABLE IF NOT EXISTS fs_dentry (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    parent_ino INTEGER NOT NULL,
    ino INTEGER NOT NULL,
    UNIQUE (parent_ino, name)
);
CREATE INDEX IF NOT EXISTS idx_fs_dentry_lookup ON fs_dentry(parent_ino, name);
CREATE INDEX IF NOT EXISTS idx_fs_dentry_ino ON fs_dentry(ino);

-- File content, split into chunk_size slices. chunk_index is 0-based and
-- contiguous; the last chunk may be short.
CREATE TABLE IF NOT EXISTS fs_data (
    ino INTEGER NOT NULL,
    chunk_index INTEGER NOT NULL,
    data BLOB NOT NULL,
    PRIMARY KEY (ino, chunk_index)
);

-- Raw symlink targets, keyed by the symlink's inode.
CREATE TABLE IF NOT EXISTS fs_symlink (
    ino INTEGER PRIMARY KEY,
    target TEXT NOT NULL
);

-- JSON-encoded values. Sandbox policy metadata lives under the ooss: prefix.
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Tool invocation log. Times are unix seconds; duration_ms is derived.
CREATE TABLE IF NOT EXISTS tool_calls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    parameters TEXT,
    result TEXT,
    error TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    started_at INTEGER NOT NULL,
    completed_at INTEGER,
    duration_ms INTEGER
);
"#;

/// Shared handle to the embedded database.
///
/// Cheap to clone; all clones use the same connection. Callers are expected
/// to serialize multi-statement sequences themselves unless they go through
/// [`Database::transaction`].
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    chunk_size: usize,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::bootstrap(conn, DEFAULT_CHUNK_SIZE)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::bootstrap(conn, DEFAULT_CHUNK_SIZE)
    }

    /// In-memory database with a non-default chunk size.
    ///
    /// The requested size only takes effect on a fresh database; an existing
    /// `chunk_size` config row always wins.
    pub fn in_memory_with_chunk_size(chunk_size: usize) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::bootstrap(conn, chunk_size)
    }

    fn bootstrap(conn: Connection, default_chunk_size: usize) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;

        conn.execute(
            "INSERT OR IGNORE INTO fs_config (key, value) VALUES ('chunk_size', ?1)",
            params![default_chunk_size.to_string()],
        )?;
        let raw: String = conn.query_row(
            "SELECT value FROM fs_config WHERE key = 'chunk_size'",
            [],
            |row| row.get(0),
        )?;
        let chunk_size = raw.parse::<usize>().map_err(|_| StoreError::InvalidConfig {
            key: "chunk_size".into(),
            value: raw,
        })?;

        let now = unix_now();
        conn.execute(
            "INSERT INTO fs_inode (ino, mode, uid, gid, size, atime, mtime, ctime)
             SELECT ?1, ?2, 0, 0, 0, ?3, ?3, ?3
             WHERE NOT EXISTS (SELECT 1 FROM fs_inode WHERE ino = ?1)",
            params![ROOT_INO, ROOT_MODE, now],
        )?;

        tracing::debug!(chunk_size, "database ready");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            chunk_size,
        })
    }

    /// Chunk size for file data, fixed at bootstrap.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Run a closure against the locked connection.
    pub fn with<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn).map_err(StoreError::from)
    }

    /// Run a closure inside a transaction; rolls back if it errors.
    pub fn transaction<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

/// Current time as whole unix seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_creates_root() {
        let db = Database::in_memory().unwrap();
        let (mode, size): (i64, i64) = db
            .with(|conn| {
                conn.query_row(
                    "SELECT mode, size FROM fs_inode WHERE ino = 1",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
            })
            .unwrap();
        assert_eq!(mode, 0o040_755);
        assert_eq!(size, 0);
    }

    #[test]
    fn test_default_chunk_size() {
        let db = Database::in_memory().unwrap();
        assert_eq!(db.chunk_size(), DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_chunk_size_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.db");

        {
            let conn = Connection::open(&path).unwrap();
            let db = Database::bootstrap(conn, 512).unwrap();
            assert_eq!(db.chunk_size(), 512);
        }

        // A different default on reopen must not override the stored value.
        let db = Database::open(&path).unwrap();
        assert_eq!(db.chunk_size(), 512);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = Database::in_memory().unwrap();
        let result = db.transaction(|conn| {
            conn.execute(
                "INSERT INTO kv_store (key, value) VALUES ('k', '1')",
                [],
            )?;
            // Duplicate primary key forces an error after the first insert.
            conn.execute(
                "INSERT INTO kv_store (key, value) VALUES ('k', '2')",
                [],
            )?;
            Ok(())
        });
        assert!(result.is_err());

        let count: i64 = db
            .with(|conn| conn.query_row("SELECT COUNT(*) FROM kv_store", [], |row| row.get(0)))
            .unwrap();
        assert_eq!(count, 0);
    }
}
