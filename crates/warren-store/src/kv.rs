//! Typed key-value store with JSON-encoded values.

use rusqlite::{params, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::db::Database;
use crate::error::Result;

/// Key-value store over the `kv_store` table.
#[derive(Debug, Clone)]
pub struct KvStore {
    db: Database,
}

impl KvStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Fetch and decode a value. `None` when the key is absent.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let text: Option<String> = self.db.with(|conn| {
            conn.query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
        })?;
        match text {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    /// Insert or replace a value.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.db.with(|conn| {
            conn.execute(
                "INSERT INTO kv_store (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, text],
            )
        })?;
        Ok(())
    }

    /// Remove a key. Returns whether a row was deleted.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let affected = self
            .db
            .with(|conn| conn.execute("DELETE FROM kv_store WHERE key = ?1", params![key]))?;
        Ok(affected > 0)
    }

    /// Sorted keys starting with `prefix`.
    pub fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let pattern = format!("{prefix}%");
        self.db.with(|conn| {
            let mut stmt =
                conn.prepare("SELECT key FROM kv_store WHERE key LIKE ?1 ORDER BY key")?;
            let rows = stmt.query_map(params![pattern], |row| row.get(0))?;
            rows.collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[test]
    fn test_typed_roundtrip() {
        let kv = KvStore::new(Database::in_memory().unwrap());

        kv.set("point", &Point { x: 1, y: 2 }).unwrap();
        let loaded: Point = kv.get("point").unwrap().unwrap();
        assert_eq!(loaded, Point { x: 1, y: 2 });

        kv.set("point", &Point { x: 3, y: 4 }).unwrap();
        let loaded: Point = kv.get("point").unwrap().unwrap();
        assert_eq!(loaded.x, 3);
    }

    #[test]
    fn test_missing_key() {
        let kv = KvStore::new(Database::in_memory().unwrap());
        let loaded: Option<String> = kv.get("nope").unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_delete() {
        let kv = KvStore::new(Database::in_memory().unwrap());
        kv.set("k", &"v").unwrap();
        assert!(kv.delete("k").unwrap());
        assert!(!kv.delete("k").unwrap());
        let loaded: Option<String> = kv.get("k").unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_prefix_scan_sorted() {
        let kv = KvStore::new(Database::in_memory().unwrap());
        kv.set("ooss:b", &1).unwrap();
        kv.set("ooss:a", &2).unwrap();
        kv.set("other", &3).unwrap();

        let keys = kv.keys("ooss:").unwrap();
        assert_eq!(keys, vec!["ooss:a".to_string(), "ooss:b".to_string()]);
    }
}
