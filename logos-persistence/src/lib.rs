//! # logos-persistence
//!
//! Update-log persistence for Logos documents.
//!
//! Persists the incremental update history of a CRDT document, and of every
//! sub-document it embeds, into an asynchronous key-value store.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   update    ┌─────────────┐  set/remove  ┌─────────────┐
//! │ Document    │ ──────────► │ Provider    │ ───────────► │ BlobStore   │
//! │ (root)      │ ◄────────── │ (root, "@") │ ◄─────────── │ (shared)    │
//! └──────┬──────┘   restore   └──────┬──────┘   keys/get   └──────▲──────┘
//!        │ subdocs                   │ children                   │
//!        ▼                           ▼                            │
//! ┌─────────────┐             ┌─────────────┐                     │
//! │ Sub-document│ ◄─────────► │ Provider    │ ────────────────────┘
//! │             │             │ ("<guid>@") │
//! └─────────────┘             └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`provider`]: per-document provider, events and teardown
//! - [`update_log`]: write queue, drain cycle and compaction
//! - [`restore`]: feeding stored records back at startup
//! - [`subdocs`]: child providers for loaded / removed sub-documents
//! - [`progress`]: pending/completed counters and their transitions
//! - [`keys`]: `[<guid>]@<epoch-ms>-<n>` key codec
//! - [`store`]: `BlobStore` trait and backends (memory, RocksDB, LZ4)
//! - [`document`]: `Document` trait; implemented for `yrs::Doc` in [`ydoc`]
//!
//! ## Guarantees
//!
//! | Property | Mechanism |
//! |----------|-----------|
//! | No lost update | queue popped only after its write is confirmed |
//! | Bounded record count | compaction at `update_limit` records |
//! | Single writer per provider | busy flag + I/O gate |
//! | Order-free restore | CRDT merge is commutative and idempotent |

pub mod config;
pub mod document;
pub mod error;
pub mod keys;
pub mod progress;
pub mod provider;
pub mod restore;
pub mod store;
pub mod subdocs;
pub mod update_log;
pub mod ydoc;

// Re-exports for convenience
pub use config::ProviderConfig;
pub use document::{
    DestroyCallback, Document, DocumentError, DocumentSignal, SubdocCallback, SubdocChanges,
    Subscription, UpdateCallback,
};
pub use error::{FailureCause, PersistenceError, Stage};
pub use keys::{KeyError, KeyScope, StorageKey};
pub use progress::{SyncProgress, Transition};
pub use provider::{Provider, ProviderEvent};
pub use store::{BlobStore, CompressedStore, MemoryStore, SharedStore, StoreError};
#[cfg(feature = "rocksdb")]
pub use store::{RocksStore, RocksStoreConfig};
