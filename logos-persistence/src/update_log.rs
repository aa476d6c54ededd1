//! Write path: update queue, drain cycle and compaction.
//!
//! Updates are queued in arrival order. One drain cycle per provider writes
//! them oldest first, each under a freshly minted key. Whenever the scope
//! holds `update_limit` records or more, the full document state is written
//! as one snapshot and every record it supersedes is removed.
//!
//! Compaction leaves the queue alone: updates that arrive while it runs are
//! written by the same cycle right after. Writing an update the snapshot
//! already contains is harmless, merging is idempotent.

use std::sync::Arc;

use crate::document::Document;
use crate::error::{PersistenceError, Stage};
use crate::keys::{next_key_among, now_millis};
use crate::provider::Inner;
use crate::store::SharedStore;

impl<D: Document> Inner<D> {
    pub(crate) fn handle_update(self: &Arc<Self>, update: &[u8], origin: Option<&[u8]>) {
        // Our own restore transactions
        if origin == Some(self.origin.as_slice()) {
            return;
        }
        self.enqueue(update.to_vec());
    }

    pub(crate) fn enqueue(self: &Arc<Self>, update: Vec<u8>) {
        let mut accepted = false;
        let mut start_drain = false;

        self.update_progress(|state| {
            state.queue.push_back(update);
            state.progress.add_pending(1);
            accepted = true;
            if !state.busy {
                state.busy = true;
                start_drain = true;
            }
        });

        if !accepted {
            log::debug!("Provider {} is inert, update dropped", self.id);
            return;
        }
        if start_drain {
            let inner = self.clone();
            self.runtime.spawn(async move { inner.drain().await });
        }
    }

    /// The sole writer loop. Runs with `busy` set and clears it under the
    /// same lock that observes the empty queue.
    pub(crate) async fn drain(self: Arc<Self>) {
        let Some(store) = self.store() else {
            return;
        };
        let mut keys = match store.keys().await {
            Ok(keys) => self.scope.filter(keys),
            Err(e) => {
                self.fail(PersistenceError::breakdown(Stage::Write, e));
                return;
            }
        };

        loop {
            let (store, update) = {
                let mut state = self.state();
                match (state.store.clone(), state.queue.front().cloned()) {
                    (Some(store), Some(update)) => (store, update),
                    _ => {
                        state.busy = false;
                        return;
                    }
                }
            };

            let gate = self.io_gate.lock().await;
            if self.is_inert() {
                return;
            }

            let key = next_key_among(&self.scope, now_millis(), &keys);
            if let Err(e) = store.set_item(&key, &update).await {
                drop(gate);
                self.fail(PersistenceError::breakdown(Stage::Write, e));
                return;
            }
            log::debug!("Provider {} wrote {} ({} bytes)", self.id, key, update.len());
            keys.push(key);

            self.update_progress(|state| {
                state.queue.pop_front();
                state.progress.complete_one();
            });

            if keys.len() >= self.config.update_limit {
                match self.compact(&store, &keys).await {
                    Ok(Some(snapshot_key)) => keys = vec![snapshot_key],
                    Ok(None) => return,
                    Err(err) => {
                        drop(gate);
                        self.fail(err);
                        return;
                    }
                }
            }
        }
    }

    /// Replace `keys` by one full-state snapshot. The snapshot is confirmed
    /// before anything is removed. `Ok(None)` if the provider went inert.
    async fn compact(
        &self,
        store: &SharedStore,
        keys: &[String],
    ) -> Result<Option<String>, PersistenceError> {
        if self.is_inert() {
            return Ok(None);
        }

        let snapshot = self
            .doc
            .encode_state_as_update()
            .map_err(|e| PersistenceError::breakdown(Stage::Compaction, e))?;
        let snapshot_key = next_key_among(&self.scope, now_millis(), keys);

        store
            .set_item(&snapshot_key, &snapshot)
            .await
            .map_err(|e| PersistenceError::breakdown(Stage::Compaction, e))?;
        if self.is_inert() {
            return Ok(None);
        }

        for key in keys {
            store
                .remove_item(key)
                .await
                .map_err(|e| PersistenceError::breakdown(Stage::Compaction, e))?;
            if self.is_inert() {
                return Ok(None);
            }
        }

        log::info!(
            "Provider {} compacted {} records of {} into {} ({} bytes)",
            self.id,
            keys.len(),
            self.scope,
            snapshot_key,
            snapshot.len()
        );
        Ok(Some(snapshot_key))
    }
}
