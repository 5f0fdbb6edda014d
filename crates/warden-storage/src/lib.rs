#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **warden-storage** – Narrow storage contract consumed from the external
//! store, plus the implementations that satisfy it.
//!
//! The core never assumes persistence or transactional semantics beyond
//! single-key atomicity. The in-memory backend is the testing default; the
//! SQLite-backed driver is a drop-in replacement offering durability. Both
//! implement the same [`StorageBackend`] trait so the rest of the
//! workspace is written against the trait, never a concrete backend.
//!
//! [`NamespacedStorage`] is the wrapper the Module Lifecycle Manager gives
//! each module's context: it transparently prefixes every collection name
//! with `"<module-id>::"` so no two modules can see each other's keys.

pub mod memory;
pub mod namespace;
pub mod sqlite;

pub use memory::MemoryStorage;
pub use namespace::NamespacedStorage;
pub use sqlite::SqliteStorage;

use warden_types::Json;

/// Errors a [`StorageBackend`] implementation may surface.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The underlying backend failed for a backend-specific reason.
    #[error("storage backend error: {0}")]
    Backend(String),
    /// A stored value could not be decoded back into JSON.
    #[error("corrupt stored value in collection {collection:?} key {key:?}: {message}")]
    Corrupt {
        /// Collection the bad value was read from.
        collection: String,
        /// Key the bad value was read from.
        key: String,
        /// Decode error detail.
        message: String,
    },
}

/// Per-collection key/value storage contract.
///
/// Collections are opaque string namespaces chosen by callers (typically a
/// module id or a module id joined with a logical sub-collection name by
/// [`NamespacedStorage`]). Keys and values are opaque strings/JSON; the
/// backend does not interpret them.
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync {
    /// Fetches the value stored at `key` in `collection`, if any.
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Json>, StorageError>;

    /// Stores `value` at `key` in `collection`, overwriting any existing
    /// value. Single-key atomic; no cross-key transactional guarantee.
    async fn set(&self, collection: &str, key: &str, value: Json) -> Result<(), StorageError>;

    /// Removes `key` from `collection`. Not an error if the key is absent.
    async fn delete(&self, collection: &str, key: &str) -> Result<(), StorageError>;

    /// Lists every `(key, value)` pair currently stored in `collection`.
    async fn list(&self, collection: &str) -> Result<Vec<(String, Json)>, StorageError>;

    /// Reports whether `key` exists in `collection`.
    async fn has(&self, collection: &str, key: &str) -> Result<bool, StorageError>;

    /// Counts the number of keys stored in `collection`.
    async fn count(&self, collection: &str) -> Result<usize, StorageError>;

    /// Removes every key in `collection`.
    async fn clear(&self, collection: &str) -> Result<(), StorageError>;
}
