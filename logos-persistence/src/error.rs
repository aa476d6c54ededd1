//! Provider error taxonomy.
//!
//! Every failure of a persistence step breaks the provider (and its
//! descendants) down and surfaces once as [`PersistenceError::Breakdown`].
//! Nothing is retried.

use std::fmt;

use crate::document::DocumentError;
use crate::store::StoreError;

/// Step of the engine that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    /// Reading stored records back into the document
    Restore,
    /// Writing a queued update
    Write,
    /// Writing the snapshot or removing superseded records
    Compaction,
    /// Removing the records of a removed sub-document
    SubdocCleanup { guid: String },
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Restore => f.write_str("could not restore document from persistence"),
            Stage::Write => f.write_str("could not persist document update"),
            Stage::Compaction => f.write_str("could not compact document updates"),
            Stage::SubdocCleanup { guid } => {
                write!(f, "could not remove persistence for subdoc {guid}")
            }
        }
    }
}

/// Underlying cause of a breakdown.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureCause {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Document(#[from] DocumentError),
}

/// Errors surfaced by a [`Provider`](crate::Provider).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PersistenceError {
    /// A persistence step failed; the provider is inert
    #[error("{stage}, reason: {source}")]
    Breakdown { stage: Stage, source: FailureCause },
    /// The provider was destroyed before reaching the awaited state
    #[error("provider destroyed")]
    Destroyed,
    /// No tokio runtime to run the provider's tasks on
    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),
    /// The document refused an observer
    #[error(transparent)]
    Document(#[from] DocumentError),
}

impl PersistenceError {
    pub fn breakdown(stage: Stage, source: impl Into<FailureCause>) -> Self {
        PersistenceError::Breakdown {
            stage,
            source: source.into(),
        }
    }

    /// The failed stage, for breakdowns.
    pub fn stage(&self) -> Option<&Stage> {
        match self {
            PersistenceError::Breakdown { stage, .. } => Some(stage),
            _ => None,
        }
    }
}
