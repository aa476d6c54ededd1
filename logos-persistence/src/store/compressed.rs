//! Transparent LZ4 compression of stored values.
//!
//! Wraps any [`BlobStore`] and compresses every value on `set_item`,
//! decompressing on `get_item`. Keys pass through untouched, so key scoping
//! and compaction behave exactly as on the inner store.
//!
//! Value layout: LZ4 block with the uncompressed size prepended
//! (`lz4_flex::compress_prepend_size`).
//!
//! Full-state snapshots of text-heavy documents are repetitive and compress
//! well; small incremental updates gain less.
//!
//! Reference: Patterson & Hennessy, Section 5.7 (Data Compression)

use async_trait::async_trait;

use super::{BlobStore, StoreError};

/// Compress a value (standalone utility).
pub fn lz4_compress(data: &[u8]) -> Vec<u8> {
    lz4_flex::compress_prepend_size(data)
}

/// Decompress a value written by [`lz4_compress`].
pub fn lz4_decompress(key: &str, compressed: &[u8]) -> Result<Vec<u8>, StoreError> {
    lz4_flex::decompress_size_prepended(compressed).map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// [`BlobStore`] decorator compressing values with LZ4.
#[derive(Debug, Default, Clone)]
pub struct CompressedStore<S> {
    inner: S,
}

impl<S: BlobStore> CompressedStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// The wrapped store (values there are compressed).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait]
impl<S: BlobStore> BlobStore for CompressedStore<S> {
    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.inner.keys().await
    }

    async fn get_item(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match self.inner.get_item(key).await? {
            Some(compressed) => lz4_decompress(key, &compressed).map(Some),
            None => Ok(None),
        }
    }

    async fn set_item(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let compressed = lz4_compress(value);
        self.inner.set_item(key, &compressed).await
    }

    async fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        self.inner.remove_item(key).await
    }
}
