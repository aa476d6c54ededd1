//! Sub-document lifecycle.
//!
//! A provider follows its document's sub-document events:
//! - `removed`: the child provider is broken down and forgotten. Its records
//!   are deleted unless the guid is still embedded in the document (a copy
//!   of the same sub-document may live on).
//! - `loaded`: a child provider is created, writing under `<guid>@`.
//! - `added`: nothing to do until the sub-document is loaded.
//!
//! Removal processing comes first, so a sub-document moved within one
//! transaction ends up tracked.

use std::sync::Arc;

use crate::document::{Document, SubdocChanges};
use crate::error::{PersistenceError, Stage};
use crate::keys::KeyScope;
use crate::provider::{Inner, Provider};
use crate::store::{SharedStore, StoreError};

impl<D: Document> Inner<D> {
    pub(crate) fn handle_subdocs(self: &Arc<Self>, changes: SubdocChanges<D>) {
        if self.is_inert() {
            return;
        }

        for subdoc in &changes.removed {
            let child = {
                let mut state = self.state();
                let index = state
                    .children
                    .iter()
                    .position(|(tracked, _)| tracked.is_same_instance(subdoc));
                index.map(|index| state.children.remove(index).1)
            };
            if let Some(child) = &child {
                child.inner.breakdown(None);
            }

            let guid = subdoc.guid();
            if guid == self.guid || changes.live.iter().any(|live| live.guid() == guid) {
                log::debug!("Subdoc {guid} removed but still present, keeping its records");
                continue;
            }

            let Some(store) = self.store() else {
                continue;
            };
            log::info!("Subdoc {guid} removed from {}, deleting its records", self.guid);

            let inner = self.clone();
            self.runtime.spawn(async move {
                inner.remove_stored_subdoc(store, guid, child).await;
            });
        }

        for subdoc in changes.loaded {
            self.provide_for(subdoc);
        }
    }

    fn provide_for(self: &Arc<Self>, subdoc: D) {
        let guid = subdoc.guid();
        // A document embedding a copy of itself
        if guid == self.guid || self.child_for(&subdoc).is_some() {
            return;
        }
        let Some(store) = self.store() else {
            return;
        };

        let child = match Provider::with_parent(store, subdoc.clone(), self) {
            Ok(child) => child,
            Err(err) => {
                log::error!("Could not persist subdoc {guid}: {err}");
                return;
            }
        };

        let mut state = self.state();
        if state.store.is_none() {
            drop(state);
            child.inner.breakdown(None);
            return;
        }
        log::info!("Persisting subdoc {guid} of {} as {}", self.guid, child.id());
        state.children.push((subdoc, child));
    }

    /// Delete every record of a removed sub-document once its provider's
    /// in-flight I/O has settled.
    async fn remove_stored_subdoc(
        self: Arc<Self>,
        store: SharedStore,
        guid: String,
        child: Option<Provider<D>>,
    ) {
        let _gate = match &child {
            Some(child) => Some(child.inner.io_gate.lock().await),
            None => None,
        };
        if self.is_inert() {
            return;
        }

        let reregistered = self
            .state()
            .children
            .iter()
            .any(|(tracked, _)| tracked.guid() == guid);
        if reregistered {
            log::debug!("Subdoc {guid} re-registered, keeping its records");
            return;
        }

        if let Err(e) = self.remove_scope(&store, &KeyScope::Subdoc(guid.clone())).await {
            self.fail(PersistenceError::breakdown(Stage::SubdocCleanup { guid }, e));
        }
    }

    async fn remove_scope(&self, store: &SharedStore, scope: &KeyScope) -> Result<(), StoreError> {
        let keys = scope.filter(store.keys().await?);
        for key in &keys {
            store.remove_item(key).await?;
            if self.is_inert() {
                break;
            }
        }
        log::debug!("Removed {} records of {scope}", keys.len());
        Ok(())
    }
}
