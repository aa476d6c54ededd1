//! [`Document`] implementation for Yrs documents.
//!
//! Updates are exchanged in the v1 encoding. Sub-document events map 1:1 onto
//! `observe_subdocs`; the live set is read from the committing transaction.
//!
//! Yrs has no document-level event bus, so [`DocumentSignal`]s are dropped.
//! Observe `Loaded`/`Synced` through the provider instead:
//! [`Provider::when_synced`](crate::Provider::when_synced) and the
//! `ProviderEvent::Synced` event.

use yrs::updates::decoder::Decode;
use yrs::{Doc, Origin, ReadTxn, StateVector, Transact, Update};

use crate::document::{
    DestroyCallback, Document, DocumentError, DocumentSignal, SubdocCallback, SubdocChanges,
    Subscription, UpdateCallback,
};

impl Document for Doc {
    fn guid(&self) -> String {
        Doc::guid(self).to_string()
    }

    fn is_same_instance(&self, other: &Self) -> bool {
        self.client_id() == other.client_id() && Doc::guid(self) == Doc::guid(other)
    }

    fn subdocs(&self) -> Vec<Self> {
        let txn = self.transact();
        txn.subdocs().cloned().collect()
    }

    fn encode_state_as_update(&self) -> Result<Vec<u8>, DocumentError> {
        let txn = self.transact();
        Ok(txn.encode_state_as_update_v1(&StateVector::default()))
    }

    fn apply_update(&self, update: &[u8], origin: &[u8]) -> Result<(), DocumentError> {
        let update =
            Update::decode_v1(update).map_err(|e| DocumentError::Decode(e.to_string()))?;
        let mut txn = self.transact_mut_with(Origin::from(origin));
        txn.apply_update(update)
            .map_err(|e| DocumentError::Apply(e.to_string()))
    }

    fn on_update(&self, callback: UpdateCallback) -> Result<Subscription, DocumentError> {
        let subscription = self
            .observe_update_v1(move |txn, event| {
                callback(&event.update, txn.origin().map(AsRef::<[u8]>::as_ref));
            })
            .map_err(|e| DocumentError::Observe(format!("{e:?}")))?;
        Ok(Subscription::new(subscription))
    }

    fn on_subdocs(&self, callback: SubdocCallback<Self>) -> Result<Subscription, DocumentError> {
        let subscription = self
            .observe_subdocs(move |txn, event| {
                callback(SubdocChanges {
                    added: event.added().cloned().collect(),
                    removed: event.removed().cloned().collect(),
                    loaded: event.loaded().cloned().collect(),
                    live: txn.subdocs().cloned().collect(),
                });
            })
            .map_err(|e| DocumentError::Observe(format!("{e:?}")))?;
        Ok(Subscription::new(subscription))
    }

    fn on_destroy(&self, callback: DestroyCallback) -> Result<Subscription, DocumentError> {
        let subscription = self
            .observe_destroy(move |_, _| callback())
            .map_err(|e| DocumentError::Observe(format!("{e:?}")))?;
        Ok(Subscription::new(subscription))
    }

    /// No-op: a `yrs::Doc` cannot carry load/sync notifications.
    fn signal(&self, _signal: DocumentSignal) {}
}
