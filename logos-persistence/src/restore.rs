//! Restore sequencer.
//!
//! Runs once per provider, right after construction, with `busy` held so
//! nothing is written meanwhile. Every record of the scope is fed back into
//! the document, tagged with the provider's origin so the resulting update
//! events are not persisted again. Records may be applied in any order.

use std::sync::Arc;

use crate::document::{Document, DocumentSignal};
use crate::error::{PersistenceError, Stage};
use crate::provider::Inner;
use crate::store::StoreError;

impl<D: Document> Inner<D> {
    pub(crate) async fn restore(self: Arc<Self>) {
        match self.apply_stored_records().await {
            Ok(true) => self.drain().await,
            Ok(false) => log::debug!("Provider {} went inert while restoring", self.id),
            Err(err) => self.fail(err),
        }
    }

    /// `Ok(false)` if the provider went inert before finishing.
    async fn apply_stored_records(&self) -> Result<bool, PersistenceError> {
        let restore_failed = |e: StoreError| PersistenceError::breakdown(Stage::Restore, e);

        let Some(store) = self.store() else {
            return Ok(false);
        };
        let _gate = self.io_gate.lock().await;

        let keys = self.scope.filter(store.keys().await.map_err(restore_failed)?);
        if self.is_inert() {
            return Ok(false);
        }

        // Replace the phantom pending update by the real record count
        let count = keys.len();
        self.update_progress(|state| {
            state.progress.release_phantom();
            state.progress.add_pending(count);
        });

        for key in &keys {
            let record = store
                .get_item(key)
                .await
                .map_err(restore_failed)?
                .ok_or_else(|| restore_failed(StoreError::NotFound(key.clone())))?;
            if self.is_inert() {
                return Ok(false);
            }

            self.doc
                .apply_update(&record, &self.origin)
                .map_err(|e| PersistenceError::breakdown(Stage::Restore, e))?;
            self.update_progress(|state| state.progress.complete_one());
        }

        if self.is_inert() {
            return Ok(false);
        }
        // Sub-document providers signal their own document too, not only the root
        if !keys.is_empty() {
            self.doc.signal(DocumentSignal::Loaded);
            log::info!(
                "Provider {} restored {} records of {}",
                self.id,
                keys.len(),
                self.scope
            );
        }
        Ok(true)
    }
}
