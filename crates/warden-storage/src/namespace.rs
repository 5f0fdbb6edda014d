//! Module-namespaced [`StorageBackend`] wrapper.

use std::sync::Arc;

use warden_types::Json;

use crate::{StorageBackend, StorageError};

/// Wraps any [`StorageBackend`] so that a single module only ever sees the
/// slice of the key space prefixed with its own id.
///
/// Per §4.2: "Storage is namespaced: the module sees a collection key space
/// automatically prefixed by `"<module-id>::"` so no two modules can touch
/// each other's data." The prefix is applied to the *collection* name, not
/// the key, so a module's `"state"` collection and another module's
/// `"state"` collection never collide.
pub struct NamespacedStorage {
    module_id: String,
    inner: Arc<dyn StorageBackend>,
}

impl NamespacedStorage {
    /// Wraps `inner` for exclusive use by `module_id`.
    pub fn new(module_id: impl Into<String>, inner: Arc<dyn StorageBackend>) -> Self {
        Self { module_id: module_id.into(), inner }
    }

    fn namespaced(&self, collection: &str) -> String {
        format!("{}::{}", self.module_id, collection)
    }
}

#[async_trait::async_trait]
impl StorageBackend for NamespacedStorage {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Json>, StorageError> {
        self.inner.get(&self.namespaced(collection), key).await
    }

    async fn set(&self, collection: &str, key: &str, value: Json) -> Result<(), StorageError> {
        self.inner.set(&self.namespaced(collection), key, value).await
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<(), StorageError> {
        self.inner.delete(&self.namespaced(collection), key).await
    }

    async fn list(&self, collection: &str) -> Result<Vec<(String, Json)>, StorageError> {
        self.inner.list(&self.namespaced(collection)).await
    }

    async fn has(&self, collection: &str, key: &str) -> Result<bool, StorageError> {
        self.inner.has(&self.namespaced(collection), key).await
    }

    async fn count(&self, collection: &str) -> Result<usize, StorageError> {
        self.inner.count(&self.namespaced(collection)).await
    }

    async fn clear(&self, collection: &str) -> Result<(), StorageError> {
        self.inner.clear(&self.namespaced(collection)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStorage;

    #[tokio::test]
    async fn two_modules_cannot_see_each_others_keys() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        let a = NamespacedStorage::new("module-a", Arc::clone(&backend));
        let b = NamespacedStorage::new("module-b", Arc::clone(&backend));

        a.set("state", "k", serde_json::json!("a-value")).await.unwrap();
        b.set("state", "k", serde_json::json!("b-value")).await.unwrap();

        assert_eq!(a.get("state", "k").await.unwrap(), Some(serde_json::json!("a-value")));
        assert_eq!(b.get("state", "k").await.unwrap(), Some(serde_json::json!("b-value")));

        // Confirm the underlying backend really did prefix the collection.
        assert_eq!(
            backend.get("module-a::state", "k").await.unwrap(),
            Some(serde_json::json!("a-value"))
        );
    }
}
