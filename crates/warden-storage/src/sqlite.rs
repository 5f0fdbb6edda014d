//! SQLite-backed [`StorageBackend`] — a durable drop-in replacement for
//! [`crate::MemoryStorage`].

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};
use warden_types::Json;

use crate::{StorageBackend, StorageError};

/// A file-backed storage driver using SQLite as the durability layer.
///
/// All operations take a blocking `std::sync::Mutex` around a single
/// `rusqlite::Connection` and run the actual SQLite call inside
/// `tokio::task::spawn_blocking`, the standard pattern for wrapping a
/// synchronous driver behind an async trait without blocking the runtime.
pub struct SqliteStorage {
    conn: std::sync::Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Opens (creating if necessary) a SQLite-backed store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path).map_err(|e| StorageError::Backend(e.to_string()))?;
        Self::from_connection(conn)
    }

    /// Opens a private in-memory SQLite database. Useful for tests that
    /// want to exercise the SQLite code path without touching disk.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(|e| StorageError::Backend(e.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv_store (
                collection TEXT NOT NULL,
                key        TEXT NOT NULL,
                value      TEXT NOT NULL,
                PRIMARY KEY (collection, key)
            )",
            [],
        )
        .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(Self { conn: std::sync::Arc::new(Mutex::new(conn)) })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = std::sync::Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().expect("sqlite connection mutex poisoned");
            f(&guard)
        })
        .await
        .map_err(|e| StorageError::Backend(format!("blocking task panicked: {e}")))?
        .map_err(|e| StorageError::Backend(e.to_string()))
    }
}

#[async_trait::async_trait]
impl StorageBackend for SqliteStorage {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Json>, StorageError> {
        let collection = collection.to_string();
        let key = key.to_string();
        let raw: Option<String> = self
            .with_conn({
                let collection = collection.clone();
                let key = key.clone();
                move |conn| {
                    conn.query_row(
                        "SELECT value FROM kv_store WHERE collection = ?1 AND key = ?2",
                        params![collection, key],
                        |row| row.get(0),
                    )
                    .map(Some)
                    .or_else(|e| if matches!(e, rusqlite::Error::QueryReturnedNoRows) { Ok(None) } else { Err(e) })
                }
            })
            .await?;

        match raw {
            None => Ok(None),
            Some(s) => serde_json::from_str(&s)
                .map(Some)
                .map_err(|e| StorageError::Corrupt { collection, key, message: e.to_string() }),
        }
    }

    async fn set(&self, collection: &str, key: &str, value: Json) -> Result<(), StorageError> {
        let collection = collection.to_string();
        let key = key.to_string();
        let value = serde_json::to_string(&value).expect("JSON value must serialize");
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO kv_store (collection, key, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(collection, key) DO UPDATE SET value = excluded.value",
                params![collection, key, value],
            )
            .map(|_| ())
        })
        .await
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<(), StorageError> {
        let collection = collection.to_string();
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM kv_store WHERE collection = ?1 AND key = ?2", params![collection, key]).map(|_| ())
        })
        .await
    }

    async fn list(&self, collection: &str) -> Result<Vec<(String, Json)>, StorageError> {
        let collection = collection.to_string();
        let rows: Vec<(String, String)> = self
            .with_conn({
                let collection = collection.clone();
                move |conn| {
                    let mut stmt = conn.prepare("SELECT key, value FROM kv_store WHERE collection = ?1")?;
                    let rows = stmt.query_map(params![collection], |row| Ok((row.get(0)?, row.get(1)?)))?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()
                }
            })
            .await?;

        rows.into_iter()
            .map(|(key, raw)| {
                serde_json::from_str(&raw)
                    .map(|v| (key.clone(), v))
                    .map_err(|e| StorageError::Corrupt { collection: collection.clone(), key, message: e.to_string() })
            })
            .collect()
    }

    async fn has(&self, collection: &str, key: &str) -> Result<bool, StorageError> {
        let collection = collection.to_string();
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM kv_store WHERE collection = ?1 AND key = ?2",
                params![collection, key],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n > 0)
        })
        .await
    }

    async fn count(&self, collection: &str) -> Result<usize, StorageError> {
        let collection = collection.to_string();
        self.with_conn(move |conn| {
            conn.query_row("SELECT COUNT(*) FROM kv_store WHERE collection = ?1", params![collection], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as usize)
        })
        .await
    }

    async fn clear(&self, collection: &str) -> Result<(), StorageError> {
        let collection = collection.to_string();
        self.with_conn(move |conn| conn.execute("DELETE FROM kv_store WHERE collection = ?1", params![collection]).map(|_| ())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = SqliteStorage::open_in_memory().unwrap();
        store.set("c", "k", serde_json::json!({"a": 1})).await.unwrap();
        assert_eq!(store.get("c", "k").await.unwrap(), Some(serde_json::json!({"a": 1})));
    }

    #[tokio::test]
    async fn persists_across_reopen_with_file_backing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.sqlite3");

        {
            let store = SqliteStorage::open(&path).unwrap();
            store.set("c", "k", serde_json::json!("value")).await.unwrap();
        }

        let store = SqliteStorage::open(&path).unwrap();
        assert_eq!(store.get("c", "k").await.unwrap(), Some(serde_json::json!("value")));
    }

    #[tokio::test]
    async fn overwrite_replaces_value() {
        let store = SqliteStorage::open_in_memory().unwrap();
        store.set("c", "k", serde_json::json!(1)).await.unwrap();
        store.set("c", "k", serde_json::json!(2)).await.unwrap();
        assert_eq!(store.get("c", "k").await.unwrap(), Some(serde_json::json!(2)));
        assert_eq!(store.count("c").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn list_and_clear() {
        let store = SqliteStorage::open_in_memory().unwrap();
        store.set("c", "a", serde_json::json!(1)).await.unwrap();
        store.set("c", "b", serde_json::json!(2)).await.unwrap();
        assert_eq!(store.list("c").await.unwrap().len(), 2);
        store.clear("c").await.unwrap();
        assert_eq!(store.count("c").await.unwrap(), 0);
    }
}
