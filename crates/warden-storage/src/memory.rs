//! In-memory [`StorageBackend`] — the testing default.

use std::collections::HashMap;

use tokio::sync::RwLock;
use warden_types::Json;

use crate::{StorageBackend, StorageError};

/// A non-persistent, process-local storage backend. All data is lost when
/// the process terminates — this is the intended default for tests and for
/// lightweight deployments that do not need durability.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    collections: RwLock<HashMap<String, HashMap<String, Json>>>,
}

impl MemoryStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl StorageBackend for MemoryStorage {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Json>, StorageError> {
        let collections = self.collections.read().await;
        Ok(collections.get(collection).and_then(|c| c.get(key)).cloned())
    }

    async fn set(&self, collection: &str, key: &str, value: Json) -> Result<(), StorageError> {
        let mut collections = self.collections.write().await;
        collections.entry(collection.to_string()).or_default().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<(), StorageError> {
        let mut collections = self.collections.write().await;
        if let Some(c) = collections.get_mut(collection) {
            c.remove(key);
        }
        Ok(())
    }

    async fn list(&self, collection: &str) -> Result<Vec<(String, Json)>, StorageError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|c| c.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn has(&self, collection: &str, key: &str) -> Result<bool, StorageError> {
        let collections = self.collections.read().await;
        Ok(collections.get(collection).map(|c| c.contains_key(key)).unwrap_or(false))
    }

    async fn count(&self, collection: &str) -> Result<usize, StorageError> {
        let collections = self.collections.read().await;
        Ok(collections.get(collection).map(HashMap::len).unwrap_or(0))
    }

    async fn clear(&self, collection: &str) -> Result<(), StorageError> {
        let mut collections = self.collections.write().await;
        collections.remove(collection);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = MemoryStorage::new();
        store.set("c", "k", serde_json::json!({"a": 1})).await.unwrap();
        assert_eq!(store.get("c", "k").await.unwrap(), Some(serde_json::json!({"a": 1})));
    }

    #[tokio::test]
    async fn missing_key_returns_none() {
        let store = MemoryStorage::new();
        assert_eq!(store.get("c", "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_removes_key_and_is_idempotent() {
        let store = MemoryStorage::new();
        store.set("c", "k", serde_json::json!(1)).await.unwrap();
        store.delete("c", "k").await.unwrap();
        assert!(!store.has("c", "k").await.unwrap());
        store.delete("c", "k").await.unwrap();
    }

    #[tokio::test]
    async fn count_and_clear() {
        let store = MemoryStorage::new();
        store.set("c", "a", serde_json::json!(1)).await.unwrap();
        store.set("c", "b", serde_json::json!(2)).await.unwrap();
        assert_eq!(store.count("c").await.unwrap(), 2);
        store.clear("c").await.unwrap();
        assert_eq!(store.count("c").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn collections_are_independent() {
        let store = MemoryStorage::new();
        store.set("c1", "k", serde_json::json!(1)).await.unwrap();
        assert!(!store.has("c2", "k").await.unwrap());
    }
}
