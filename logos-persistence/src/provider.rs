//! Per-document persistence provider.
//!
//! A [`Provider`] binds one [`Document`] to a key scope of a shared
//! [`BlobStore`](crate::store::BlobStore):
//!
//! ```text
//!   Document ──update──► enqueue ──► queue ──► drain ──set_item──► store
//!      ▲                                         │
//!      │                                         └── compact (≥ update_limit keys)
//!      └──────── restore (at construction) ◄──keys/get_item──────── store
//! ```
//!
//! Sub-documents reported as loaded get their own child provider writing
//! under `<guid>@`. Children share the store and the configuration of the
//! root and report `SubdocSynced` on their parent's event channel.
//!
//! Handles are cheap to clone. Dropping every handle of a provider detaches
//! it from its document; [`Provider::destroy`] additionally deletes its
//! stored records.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, watch};
use uuid::Uuid;

use crate::config::ProviderConfig;
use crate::document::{Document, DocumentSignal, SubdocChanges, Subscription};
use crate::error::PersistenceError;
use crate::keys::KeyScope;
use crate::progress::{SyncProgress, Transition};
use crate::store::{SharedStore, StoreError};

/// Events emitted by a provider.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    /// First update of a burst is pending (progress 0.0)
    SyncStarted { progress: f64 },
    /// Burst in progress
    SyncContinued { progress: f64 },
    /// Burst completed (progress 1.0); `Synced` follows
    SyncFinished { progress: f64 },
    /// Nothing left to persist or restore
    Synced,
    /// The provider stopped while unsynchronized (progress 1.0)
    SyncAborted { progress: f64 },
    /// A child provider reached `Synced` (parent only)
    SubdocSynced { provider: Uuid, guid: String },
}

/// Coarse state observed by [`Provider::when_synced`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SyncStatus {
    Syncing,
    Synced,
    Failed(PersistenceError),
    Stopped,
}

/// Mutable provider state, guarded by one short-lived lock.
pub(crate) struct State<D: Document> {
    /// A restore or drain cycle is running
    pub(crate) busy: bool,
    pub(crate) progress: SyncProgress,
    /// Updates not yet written, oldest first
    pub(crate) queue: VecDeque<Vec<u8>>,
    /// Child document instance → its provider
    pub(crate) children: Vec<(D, Provider<D>)>,
    /// `None` once the provider is inert
    pub(crate) store: Option<SharedStore>,
    pub(crate) failure: Option<PersistenceError>,
    pub(crate) destroyed: bool,
}

pub(crate) struct Inner<D: Document> {
    pub(crate) id: Uuid,
    /// Origin tag of the transactions the provider applies itself
    pub(crate) origin: Vec<u8>,
    pub(crate) doc: D,
    pub(crate) guid: String,
    pub(crate) scope: KeyScope,
    pub(crate) config: ProviderConfig,
    pub(crate) parent: Option<Weak<Inner<D>>>,
    pub(crate) state: Mutex<State<D>>,
    pub(crate) events: broadcast::Sender<ProviderEvent>,
    /// Unbounded feed of every event, for the receiver handed out by
    /// `take_event_rx`. Cleared once that receiver is dropped.
    initial_tx: Mutex<Option<mpsc::UnboundedSender<ProviderEvent>>>,
    initial_rx: Mutex<Option<mpsc::UnboundedReceiver<ProviderEvent>>>,
    status: watch::Sender<SyncStatus>,
    /// Held around every write, compaction, restore and scope wipe
    pub(crate) io_gate: tokio::sync::Mutex<()>,
    pub(crate) runtime: Handle,
    subscriptions: Mutex<Vec<Subscription>>,
}

/// Persistence provider for one document of a document tree.
pub struct Provider<D: Document> {
    pub(crate) inner: Arc<Inner<D>>,
}

impl<D: Document> Clone for Provider<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<D: Document> fmt::Debug for Provider<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("id", &self.inner.id)
            .field("scope", &self.inner.scope)
            .field("synced", &self.is_synced())
            .finish()
    }
}

impl<D: Document> Provider<D> {
    /// Start persisting `doc` (the root of its tree) into `store`.
    ///
    /// Stored records are restored in the background; the provider reports
    /// unsynchronized until that is done. Must be called within a tokio
    /// runtime.
    pub fn new(store: SharedStore, doc: D, config: ProviderConfig) -> Result<Self, PersistenceError> {
        let runtime =
            Handle::try_current().map_err(|e| PersistenceError::NoRuntime(e.to_string()))?;
        Self::create(store, doc, config, None, runtime)
    }

    pub(crate) fn with_parent(
        store: SharedStore,
        doc: D,
        parent: &Arc<Inner<D>>,
    ) -> Result<Self, PersistenceError> {
        Self::create(
            store,
            doc,
            parent.config.clone(),
            Some(Arc::downgrade(parent)),
            parent.runtime.clone(),
        )
    }

    fn create(
        store: SharedStore,
        doc: D,
        config: ProviderConfig,
        parent: Option<Weak<Inner<D>>>,
        runtime: Handle,
    ) -> Result<Self, PersistenceError> {
        let id = Uuid::new_v4();
        let guid = doc.guid();
        let scope = match parent {
            Some(_) => KeyScope::Subdoc(guid.clone()),
            None => KeyScope::Root,
        };
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (initial_tx, initial_rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(SyncStatus::Syncing);

        let inner = Arc::new(Inner {
            id,
            origin: format!("logos-persistence/{id}").into_bytes(),
            doc,
            guid,
            scope,
            config,
            parent,
            state: Mutex::new(State {
                busy: true,
                progress: SyncProgress::restoring(),
                queue: VecDeque::new(),
                children: Vec::new(),
                store: Some(store),
                failure: None,
                destroyed: false,
            }),
            events,
            initial_tx: Mutex::new(Some(initial_tx)),
            initial_rx: Mutex::new(Some(initial_rx)),
            status,
            io_gate: tokio::sync::Mutex::new(()),
            runtime,
            subscriptions: Mutex::new(Vec::new()),
        });

        let subscriptions = inner.observe_document()?;
        *lock(&inner.subscriptions) = subscriptions;

        log::debug!("Provider {} created for {} ({})", id, inner.scope, inner.guid);

        let task = inner.clone();
        inner.runtime.spawn(async move { task.restore().await });

        Ok(Self { inner })
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn document(&self) -> &D {
        &self.inner.doc
    }

    pub fn guid(&self) -> &str {
        &self.inner.guid
    }

    /// Key scope this provider reads and writes.
    pub fn scope(&self) -> &KeyScope {
        &self.inner.scope
    }

    /// No update is waiting to be persisted or restored.
    pub fn is_synced(&self) -> bool {
        self.inner.state().progress.is_synced()
    }

    /// This provider and every directly tracked child are synchronized.
    pub fn is_fully_synced(&self) -> bool {
        let children = {
            let state = self.inner.state();
            if !state.progress.is_synced() {
                return false;
            }
            state.children.iter().map(|(_, child)| child.clone()).collect::<Vec<_>>()
        };
        children.iter().all(Provider::is_synced)
    }

    /// Whether `subdoc` is tracked and synchronized.
    pub fn subdoc_is_synced(&self, subdoc: &D) -> bool {
        self.subdoc_provider(subdoc)
            .map(|child| child.is_synced())
            .unwrap_or(false)
    }

    /// The child provider tracking this sub-document instance.
    pub fn subdoc_provider(&self, subdoc: &D) -> Option<Provider<D>> {
        self.inner.child_for(subdoc)
    }

    /// A new receiver for events emitted from now on.
    ///
    /// Holds at most `event_capacity` undelivered events; a slow receiver
    /// lags and skips the oldest.
    pub fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.inner.events.subscribe()
    }

    /// Take the receiver created with the provider (can only be called once).
    ///
    /// Unbounded: it holds every event since construction, restore progress
    /// included, however large the restored backlog. Events accumulate until
    /// it is taken, so take it (and drop it if unused) early.
    pub fn take_event_rx(&self) -> Option<mpsc::UnboundedReceiver<ProviderEvent>> {
        lock(&self.inner.initial_rx).take()
    }

    /// Wait until the provider is synchronized.
    ///
    /// Fails with the breakdown error if a persistence step failed, or with
    /// [`PersistenceError::Destroyed`] if the provider stopped first.
    pub async fn when_synced(&self) -> Result<(), PersistenceError> {
        let mut rx = self.inner.status.subscribe();
        loop {
            let status = rx.borrow_and_update().clone();
            match status {
                SyncStatus::Synced => return Ok(()),
                SyncStatus::Failed(err) => return Err(err),
                SyncStatus::Stopped => return Err(PersistenceError::Destroyed),
                SyncStatus::Syncing => {}
            }
            if rx.changed().await.is_err() {
                return Err(PersistenceError::Destroyed);
            }
        }
    }

    /// Last breakdown error, if any.
    pub fn failure(&self) -> Option<PersistenceError> {
        self.inner.state().failure.clone()
    }

    /// Whether [`Provider::destroy`] has been called.
    pub fn is_destroyed(&self) -> bool {
        self.inner.state().destroyed
    }

    /// Persist an update produced outside the document's own update stream.
    ///
    /// No-op once the provider is inert.
    pub fn enqueue(&self, update: Vec<u8>) {
        self.inner.enqueue(update);
    }

    /// Stop persisting and delete every record of this provider's scope.
    ///
    /// Idempotent. Children are broken down in memory; their records stay.
    /// Waits for an in-flight write to land before wiping the scope.
    pub async fn destroy(&self) -> Result<(), StoreError> {
        let inner = &self.inner;
        let store = {
            let mut state = inner.state();
            if state.destroyed {
                return Ok(());
            }
            state.destroyed = true;
            state.store.clone()
        };
        inner.breakdown(None);

        let Some(store) = store else {
            log::debug!("Provider {} destroyed while inert", inner.id);
            return Ok(());
        };

        let _gate = inner.io_gate.lock().await;
        let keys = inner.scope.filter(store.keys().await?);
        for key in &keys {
            store.remove_item(key).await?;
        }

        log::info!(
            "Provider {} destroyed, removed {} records of {}",
            inner.id,
            keys.len(),
            inner.scope
        );
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<D: Document> Inner<D> {
    pub(crate) fn state(&self) -> MutexGuard<'_, State<D>> {
        lock(&self.state)
    }

    /// The store handle, `None` once inert.
    pub(crate) fn store(&self) -> Option<SharedStore> {
        self.state().store.clone()
    }

    pub(crate) fn is_inert(&self) -> bool {
        self.state().store.is_none()
    }

    pub(crate) fn child_for(&self, doc: &D) -> Option<Provider<D>> {
        self.state()
            .children
            .iter()
            .find(|(tracked, _)| tracked.is_same_instance(doc))
            .map(|(_, child)| child.clone())
    }

    fn observe_document(self: &Arc<Self>) -> Result<Vec<Subscription>, PersistenceError> {
        let weak = Arc::downgrade(self);
        let on_update = self.doc.on_update(Box::new(move |update: &[u8], origin: Option<&[u8]>| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_update(update, origin);
            }
        }))?;

        let weak = Arc::downgrade(self);
        let on_subdocs = self.doc.on_subdocs(Box::new(move |changes: SubdocChanges<D>| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_subdocs(changes);
            }
        }))?;

        let weak = Arc::downgrade(self);
        let on_destroy = self.doc.on_destroy(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                let provider = Provider {
                    inner: inner.clone(),
                };
                inner.runtime.spawn(async move {
                    if let Err(e) = provider.destroy().await {
                        log::warn!("Provider {} teardown after document destroy: {e}", provider.id());
                    }
                });
            }
        }))?;

        Ok(vec![on_update, on_subdocs, on_destroy])
    }

    /// Map a progress transition to events. Called with the state lock held
    /// so observers see transitions in counter order. Returns `true` when the
    /// document should receive [`DocumentSignal::Synced`].
    pub(crate) fn publish(&self, transition: Transition) -> bool {
        match transition {
            Transition::Started => {
                self.emit(ProviderEvent::SyncStarted { progress: 0.0 });
                self.set_status(SyncStatus::Syncing);
                false
            }
            Transition::Continued(progress) => {
                self.emit(ProviderEvent::SyncContinued { progress });
                self.set_status(SyncStatus::Syncing);
                false
            }
            Transition::Finished => {
                self.emit(ProviderEvent::SyncFinished { progress: 1.0 });
                self.announce_synced();
                true
            }
            Transition::Synced => {
                self.announce_synced();
                true
            }
        }
    }

    /// Apply one counter mutation and publish the result. No-op when inert.
    pub(crate) fn update_progress(&self, mutate: impl FnOnce(&mut State<D>)) {
        let synced = {
            let mut state = self.state();
            if state.store.is_none() {
                return;
            }
            mutate(&mut *state);
            let transition = state.progress.report();
            self.publish(transition)
        };
        if synced {
            self.doc.signal(DocumentSignal::Synced);
        }
    }

    fn announce_synced(&self) {
        self.emit(ProviderEvent::Synced);
        self.set_status(SyncStatus::Synced);

        if let Some(parent) = self.parent.as_ref().and_then(Weak::upgrade) {
            parent.emit(ProviderEvent::SubdocSynced {
                provider: self.id,
                guid: self.guid.clone(),
            });
        }
    }

    pub(crate) fn emit(&self, event: ProviderEvent) {
        let mut initial = lock(&self.initial_tx);
        if let Some(tx) = initial.as_ref() {
            if tx.send(event.clone()).is_err() {
                *initial = None;
            }
        }
        drop(initial);

        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn set_status(&self, status: SyncStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    /// Make this provider and all tracked descendants inert. Storage is left
    /// untouched.
    pub(crate) fn breakdown(&self, failure: Option<PersistenceError>) {
        let children = {
            let mut state = self.state();
            state.store = None;
            state.busy = false;
            state.queue.clear();
            if state.progress.abort() {
                self.emit(ProviderEvent::SyncAborted { progress: 1.0 });
            }
            match failure {
                Some(err) => {
                    state.failure = Some(err.clone());
                    self.set_status(SyncStatus::Failed(err));
                }
                None => {
                    if state.failure.is_none() {
                        self.set_status(SyncStatus::Stopped);
                    }
                }
            }
            std::mem::take(&mut state.children)
        };

        // Detach outside the state lock: dropping a subscription may wait on
        // the document
        let subscriptions = std::mem::take(&mut *lock(&self.subscriptions));
        drop(subscriptions);

        for (_, child) in children {
            child.inner.breakdown(None);
        }
    }

    /// Failure-escalating breakdown.
    pub(crate) fn fail(&self, err: PersistenceError) {
        if self.is_inert() {
            log::warn!("Provider {} failed after going inert: {err}", self.id);
            return;
        }
        log::error!("Provider {} ({}) broke down: {err}", self.id, self.scope);
        self.breakdown(Some(err));
    }
}
