//! RocksDB-backed store.
//!
//! All records live in one column family, `updates`, keyed by the UTF-8
//! storage key. Values are the raw update / snapshot bytes; RocksDB's own LZ4
//! block compression applies underneath.
//!
//! RocksDB calls block, so every operation runs on tokio's blocking pool.
//!
//! Reference: Kleppmann, DDIA, Chapter 3 (LSM Trees, SSTables)

use async_trait::async_trait;
use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, IteratorMode, Options,
    WriteOptions, DB,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{BlobStore, StoreError};

/// Column family holding every persisted record.
const CF_UPDATES: &str = "updates";

/// RocksDB store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RocksStoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files (default: 256)
    pub max_open_files: i32,
    /// Write buffer size (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for RocksStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("logos_persistence"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 256,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl RocksStoreConfig {
    /// Config for testing (small caches, given directory).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 4 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 1024 * 1024,
        }
    }
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// Durable [`BlobStore`] on top of RocksDB.
#[derive(Clone)]
pub struct RocksStore {
    db: Arc<DB>,
    config: RocksStoreConfig,
}

impl RocksStore {
    /// Open (or create) the database at the configured path.
    pub fn open(config: RocksStoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf = ColumnFamilyDescriptor::new(CF_UPDATES, Self::cf_options(&config));
        let db = DB::open_cf_descriptors(&db_opts, &config.path, vec![cf])?;

        log::info!("Opened RocksDB store at {}", config.path.display());

        Ok(Self {
            db: Arc::new(db),
            config,
        })
    }

    fn cf_options(config: &RocksStoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);

        // Many small writes, whole-CF scans on keys()
        opts.set_compression_type(DBCompressionType::Lz4);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_write_buffer_number(4);

        opts
    }

    fn write_options(sync: bool) -> WriteOptions {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(sync);
        write_opts
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Force a memtable flush.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

fn cf_handle(db: &DB) -> Result<&rocksdb::ColumnFamily, StoreError> {
    db.cf_handle(CF_UPDATES)
        .ok_or_else(|| StoreError::Backend(format!("Column family '{CF_UPDATES}' not found")))
}

#[async_trait]
impl BlobStore for RocksStore {
    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let db = self.db.clone();

        tokio::task::spawn_blocking(move || {
            let cf = cf_handle(&db)?;
            let mut keys = Vec::new();
            for item in db.iterator_cf(cf, IteratorMode::Start) {
                let (key, _) = item?;
                let key = String::from_utf8(key.to_vec()).map_err(|e| StoreError::Corrupt {
                    key: String::from_utf8_lossy(e.as_bytes()).into_owned(),
                    reason: "key is not valid UTF-8".into(),
                })?;
                keys.push(key);
            }
            Ok(keys)
        })
        .await?
    }

    async fn get_item(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let db = self.db.clone();
        let key = key.to_string();

        tokio::task::spawn_blocking(move || {
            let cf = cf_handle(&db)?;
            Ok(db.get_cf(cf, key.as_bytes())?)
        })
        .await?
    }

    async fn set_item(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let db = self.db.clone();
        let key = key.to_string();
        let value = value.to_vec();
        let sync = self.config.sync_writes;

        tokio::task::spawn_blocking(move || {
            let cf = cf_handle(&db)?;
            db.put_cf_opt(cf, key.as_bytes(), &value, &Self::write_options(sync))?;
            Ok(())
        })
        .await?
    }

    async fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        let db = self.db.clone();
        let key = key.to_string();
        let sync = self.config.sync_writes;

        tokio::task::spawn_blocking(move || {
            let cf = cf_handle(&db)?;
            db.delete_cf_opt(cf, key.as_bytes(), &Self::write_options(sync))?;
            Ok(())
        })
        .await?
    }
}
