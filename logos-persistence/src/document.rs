//! The mergeable document a provider persists.
//!
//! The engine never interprets update bytes. It relies on the document for:
//! - reporting every update together with the origin that produced it,
//! - merging stored updates back in (commutative and idempotent),
//! - encoding its full state as a single update (for compaction),
//! - announcing sub-document changes and its own destruction.
//!
//! [`yrs::Doc`] implements this trait (see [`crate::ydoc`]); tests use small
//! in-memory doubles.

use std::any::Any;
use std::fmt;

/// Document engine errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DocumentError {
    /// Update bytes could not be decoded
    #[error("could not decode update: {0}")]
    Decode(String),
    /// Decoded update could not be integrated
    #[error("could not apply update: {0}")]
    Apply(String),
    /// Full state could not be encoded
    #[error("could not encode document state: {0}")]
    Encode(String),
    /// An observer could not be registered
    #[error("could not observe document: {0}")]
    Observe(String),
}

/// Document-level notifications raised by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentSignal {
    /// Stored records have been applied to the document
    Loaded,
    /// Every known update of the document is persisted
    Synced,
}

/// Observer registration. Dropping it detaches the observer.
pub struct Subscription {
    _guard: Box<dyn Any + Send + Sync>,
}

impl Subscription {
    pub fn new<T: Any + Send + Sync>(guard: T) -> Self {
        Self {
            _guard: Box::new(guard),
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Subscription")
    }
}

/// Sub-document changes reported by one transaction.
#[derive(Debug, Clone)]
pub struct SubdocChanges<D> {
    pub added: Vec<D>,
    pub removed: Vec<D>,
    pub loaded: Vec<D>,
    /// Sub-documents still present once the transaction committed
    pub live: Vec<D>,
}

impl<D> Default for SubdocChanges<D> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            removed: Vec::new(),
            loaded: Vec::new(),
            live: Vec::new(),
        }
    }
}

/// Called with the encoded update and the origin tag of the transaction that
/// produced it (`None` for untagged local edits).
pub type UpdateCallback = Box<dyn Fn(&[u8], Option<&[u8]>) + Send + Sync + 'static>;

/// Called with the sub-document changes of one transaction.
pub type SubdocCallback<D> = Box<dyn Fn(SubdocChanges<D>) + Send + Sync + 'static>;

/// Called once when the document is destroyed.
pub type DestroyCallback = Box<dyn Fn() + Send + Sync + 'static>;

/// Capability interface of the mergeable document.
///
/// Handles are cheap to clone and refer to the same in-memory instance.
/// Callbacks may run synchronously inside the document's own transaction, so
/// they must not call back into the document.
pub trait Document: Clone + Send + Sync + 'static {
    /// Stable identifier, shared by every replica of the document.
    fn guid(&self) -> String;

    /// Whether both handles refer to the same in-memory instance. Two
    /// instances may share a guid.
    fn is_same_instance(&self, other: &Self) -> bool;

    /// Sub-documents currently embedded in this document.
    fn subdocs(&self) -> Vec<Self>;

    /// The full document state as one update.
    fn encode_state_as_update(&self) -> Result<Vec<u8>, DocumentError>;

    /// Merge `update`, tagging the transaction with `origin`.
    fn apply_update(&self, update: &[u8], origin: &[u8]) -> Result<(), DocumentError>;

    fn on_update(&self, callback: UpdateCallback) -> Result<Subscription, DocumentError>;

    fn on_subdocs(&self, callback: SubdocCallback<Self>) -> Result<Subscription, DocumentError>;

    fn on_destroy(&self, callback: DestroyCallback) -> Result<Subscription, DocumentError>;

    /// Receive a document-level notification. Engines without such a
    /// mechanism ignore it.
    fn signal(&self, _signal: DocumentSignal) {}
}
