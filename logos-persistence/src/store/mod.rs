//! Key-value backends for persisted document updates.
//!
//! Architecture:
//! ```text
//! ┌─────────────┐   set/remove    ┌──────────────────────────────┐
//! │ Provider    │ ──────────────► │ dyn BlobStore (shared)       │
//! │ (root)      │                 │                              │
//! ├─────────────┤   keys/get      │  "@<ts>-<n>"        root     │
//! │ Provider    │ ◄────────────── │  "<guid>@<ts>-<n>"  subdocs  │
//! │ (subdocs)   │                 │                              │
//! └─────────────┘                 └──────────────────────────────┘
//! ```
//!
//! One store instance is shared by a root provider and all of its
//! descendants. Each provider owns a disjoint key scope; the store itself
//! knows nothing about scopes, documents or compaction.
//!
//! Backends:
//! - [`MemoryStore`]: in-process map, for tests and prototyping
//! - `RocksStore`: RocksDB column family (feature `rocksdb`)
//! - [`CompressedStore`]: LZ4 value compression on top of any backend

use async_trait::async_trait;
use std::sync::Arc;

pub mod compressed;
pub mod memory;
#[cfg(feature = "rocksdb")]
pub mod rocks;

pub use compressed::CompressedStore;
pub use memory::MemoryStore;
#[cfg(feature = "rocksdb")]
pub use rocks::{RocksStore, RocksStoreConfig};

/// Backend errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The backend rejected or failed the operation
    #[error("backend error: {0}")]
    Backend(String),
    /// A stored value could not be decoded
    #[error("corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },
    /// A key listed moments ago is gone
    #[error("record not found: {0}")]
    NotFound(String),
    /// The blocking worker running the operation died
    #[error("storage task failed: {0}")]
    TaskFailed(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        StoreError::TaskFailed(e.to_string())
    }
}

/// Asynchronous key-value store holding opaque byte values.
///
/// No transactional or ordering guarantees are assumed beyond completion of
/// each individual call. Every method may fail; callers treat a failure as
/// non-recoverable for the operation in progress.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// All keys currently present, in no particular order.
    async fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// The value under `key`, `None` if absent.
    async fn get_item(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set_item(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Delete `key`. Removing an absent key is not an error.
    async fn remove_item(&self, key: &str) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: BlobStore + ?Sized> BlobStore for Arc<S> {
    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        (**self).keys().await
    }

    async fn get_item(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get_item(key).await
    }

    async fn set_item(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        (**self).set_item(key, value).await
    }

    async fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        (**self).remove_item(key).await
    }
}

/// Shared handle to a store, as held by every provider of one document tree.
pub type SharedStore = Arc<dyn BlobStore>;
