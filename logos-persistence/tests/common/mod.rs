//! Shared test doubles.
//!
//! - [`TestDoc`]: a grow-only set CRDT implementing `Document`
//! - [`TestStore`]: a `MemoryStore` wrapper that tracks concurrent writes per
//!   key scope and can fail or hold writes on demand

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};

use logos_persistence::{
    BlobStore, DestroyCallback, Document, DocumentError, DocumentSignal, MemoryStore,
    ProviderEvent, StoreError, SubdocCallback, SubdocChanges, Subscription, UpdateCallback,
};

// ─── TestDoc ─────────────────────────────────────────────────────────────────

const UPDATE_HEADER: &[u8] = b"set:";

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

type UpdateFn = Arc<dyn Fn(&[u8], Option<&[u8]>) + Send + Sync>;
type SubdocFn = Arc<dyn Fn(SubdocChanges<TestDoc>) + Send + Sync>;
type DestroyFn = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Observers {
    next_id: u64,
    update: Vec<(u64, UpdateFn)>,
    subdocs: Vec<(u64, SubdocFn)>,
    destroy: Vec<(u64, DestroyFn)>,
}

struct DocInner {
    guid: String,
    instance: u64,
    items: Mutex<BTreeSet<String>>,
    subdocs: Mutex<Vec<TestDoc>>,
    signals: Mutex<Vec<DocumentSignal>>,
    observers: Mutex<Observers>,
}

/// Grow-only set of strings. Updates encode the inserted items.
#[derive(Clone)]
pub struct TestDoc {
    inner: Arc<DocInner>,
}

impl std::fmt::Debug for TestDoc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TestDoc({}#{})", self.inner.guid, self.inner.instance)
    }
}

pub fn encode_items<'a>(items: impl IntoIterator<Item = &'a str>) -> Vec<u8> {
    let body: Vec<&str> = items.into_iter().collect();
    let mut update = UPDATE_HEADER.to_vec();
    update.extend_from_slice(body.join("\n").as_bytes());
    update
}

fn decode_items(update: &[u8]) -> Result<Vec<String>, DocumentError> {
    let body = update
        .strip_prefix(UPDATE_HEADER)
        .ok_or_else(|| DocumentError::Decode("missing set header".into()))?;
    let body = std::str::from_utf8(body).map_err(|e| DocumentError::Decode(e.to_string()))?;
    Ok(body
        .split('\n')
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect())
}

impl TestDoc {
    pub fn new() -> Self {
        Self::with_guid(format!("doc-{}", NEXT_INSTANCE.load(Ordering::SeqCst)))
    }

    pub fn with_guid(guid: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(DocInner {
                guid: guid.into(),
                instance: NEXT_INSTANCE.fetch_add(1, Ordering::SeqCst),
                items: Mutex::new(BTreeSet::new()),
                subdocs: Mutex::new(Vec::new()),
                signals: Mutex::new(Vec::new()),
                observers: Mutex::new(Observers::default()),
            }),
        }
    }

    /// Local edit (no origin).
    pub fn insert(&self, item: &str) {
        if self.merge(&[item.to_string()]) {
            self.emit_update(&encode_items([item]), None);
        }
    }

    pub fn items(&self) -> BTreeSet<String> {
        self.inner.items.lock().unwrap().clone()
    }

    pub fn signals(&self) -> Vec<DocumentSignal> {
        self.inner.signals.lock().unwrap().clone()
    }

    /// Embed `subdoc`, reporting it as added (and loaded if `load`).
    pub fn add_subdoc(&self, subdoc: &TestDoc, load: bool) {
        self.inner.subdocs.lock().unwrap().push(subdoc.clone());
        let changes = SubdocChanges {
            added: vec![subdoc.clone()],
            removed: Vec::new(),
            loaded: if load { vec![subdoc.clone()] } else { Vec::new() },
            live: self.subdocs(),
        };
        self.emit_subdocs(changes);
    }

    /// Remove this instance of `subdoc`.
    pub fn remove_subdoc(&self, subdoc: &TestDoc) {
        self.inner
            .subdocs
            .lock()
            .unwrap()
            .retain(|existing| !existing.is_same_instance(subdoc));
        let changes = SubdocChanges {
            added: Vec::new(),
            removed: vec![subdoc.clone()],
            loaded: Vec::new(),
            live: self.subdocs(),
        };
        self.emit_subdocs(changes);
    }

    pub fn destroy(&self) {
        let callbacks: Vec<DestroyFn> = {
            let observers = self.inner.observers.lock().unwrap();
            observers.destroy.iter().map(|(_, f)| f.clone()).collect()
        };
        for callback in callbacks {
            callback();
        }
    }

    pub fn observer_count(&self) -> usize {
        let observers = self.inner.observers.lock().unwrap();
        observers.update.len() + observers.subdocs.len() + observers.destroy.len()
    }

    fn merge(&self, items: &[String]) -> bool {
        let mut set = self.inner.items.lock().unwrap();
        let mut changed = false;
        for item in items {
            changed |= set.insert(item.clone());
        }
        changed
    }

    fn emit_update(&self, update: &[u8], origin: Option<&[u8]>) {
        let callbacks: Vec<UpdateFn> = {
            let observers = self.inner.observers.lock().unwrap();
            observers.update.iter().map(|(_, f)| f.clone()).collect()
        };
        for callback in callbacks {
            callback(update, origin);
        }
    }

    fn emit_subdocs(&self, changes: SubdocChanges<TestDoc>) {
        let callbacks: Vec<SubdocFn> = {
            let observers = self.inner.observers.lock().unwrap();
            observers.subdocs.iter().map(|(_, f)| f.clone()).collect()
        };
        for callback in callbacks {
            callback(changes.clone());
        }
    }

    fn register(&self, add: impl FnOnce(&mut Observers, u64)) -> Subscription {
        let mut observers = self.inner.observers.lock().unwrap();
        observers.next_id += 1;
        let id = observers.next_id;
        add(&mut observers, id);
        Subscription::new(ObserverGuard {
            doc: Arc::downgrade(&self.inner),
            id,
        })
    }
}

struct ObserverGuard {
    doc: Weak<DocInner>,
    id: u64,
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        if let Some(doc) = self.doc.upgrade() {
            let mut observers = doc.observers.lock().unwrap();
            observers.update.retain(|(id, _)| *id != self.id);
            observers.subdocs.retain(|(id, _)| *id != self.id);
            observers.destroy.retain(|(id, _)| *id != self.id);
        }
    }
}

impl Document for TestDoc {
    fn guid(&self) -> String {
        self.inner.guid.clone()
    }

    fn is_same_instance(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn subdocs(&self) -> Vec<Self> {
        self.inner.subdocs.lock().unwrap().clone()
    }

    fn encode_state_as_update(&self) -> Result<Vec<u8>, DocumentError> {
        let items = self.items();
        Ok(encode_items(items.iter().map(String::as_str)))
    }

    fn apply_update(&self, update: &[u8], origin: &[u8]) -> Result<(), DocumentError> {
        let items = decode_items(update)?;
        let fresh: Vec<String> = {
            let current = self.inner.items.lock().unwrap();
            items.into_iter().filter(|item| !current.contains(item)).collect()
        };
        if self.merge(&fresh) {
            self.emit_update(
                &encode_items(fresh.iter().map(String::as_str)),
                Some(origin),
            );
        }
        Ok(())
    }

    fn on_update(&self, callback: UpdateCallback) -> Result<Subscription, DocumentError> {
        let callback: UpdateFn = Arc::from(callback);
        Ok(self.register(|observers, id| observers.update.push((id, callback))))
    }

    fn on_subdocs(&self, callback: SubdocCallback<Self>) -> Result<Subscription, DocumentError> {
        let callback: SubdocFn = Arc::from(callback);
        Ok(self.register(|observers, id| observers.subdocs.push((id, callback))))
    }

    fn on_destroy(&self, callback: DestroyCallback) -> Result<Subscription, DocumentError> {
        let callback: DestroyFn = Arc::from(callback);
        Ok(self.register(|observers, id| observers.destroy.push((id, callback))))
    }

    fn signal(&self, signal: DocumentSignal) {
        self.inner.signals.lock().unwrap().push(signal);
    }
}

/// Merge every value of `records` into a fresh document.
pub fn replay(records: &[(String, Vec<u8>)]) -> TestDoc {
    let doc = TestDoc::new();
    for (_, value) in records {
        doc.apply_update(value, b"replay").unwrap();
    }
    doc
}

// ─── TestStore ───────────────────────────────────────────────────────────────

/// Instrumented in-memory store.
#[derive(Default)]
pub struct TestStore {
    inner: MemoryStore,
    in_flight: Mutex<HashMap<String, usize>>,
    max_in_flight: AtomicUsize,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
    fail_removes: AtomicBool,
    write_delay_ms: AtomicU64,
    held: Mutex<Option<watch::Sender<bool>>>,
    write_started: Notify,
}

fn scope_of(key: &str) -> String {
    match key.rfind('@') {
        Some(at) => key[..=at].to_string(),
        None => key.to_string(),
    }
}

impl TestStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_items<K: Into<String>>(items: impl IntoIterator<Item = (K, Vec<u8>)>) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::with_items(items),
            ..Self::default()
        })
    }

    pub fn snapshot(&self) -> Vec<(String, Vec<u8>)> {
        self.inner.snapshot()
    }

    pub fn keys_now(&self) -> Vec<String> {
        self.snapshot().into_iter().map(|(key, _)| key).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Highest number of concurrent writes seen within one key scope.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Completed `set_item` calls.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_removes(&self, fail: bool) {
        self.fail_removes.store(fail, Ordering::SeqCst);
    }

    pub fn set_write_delay(&self, delay: Duration) {
        self.write_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Block every `set_item` until [`TestStore::release_writes`].
    pub fn hold_writes(&self) {
        let (tx, _) = watch::channel(true);
        *self.held.lock().unwrap() = Some(tx);
    }

    pub fn release_writes(&self) {
        if let Some(tx) = self.held.lock().unwrap().take() {
            let _ = tx.send(false);
        }
    }

    /// Resolves once a `set_item` has started.
    pub async fn write_started(&self) {
        self.write_started.notified().await;
    }

    fn enter(&self, key: &str) {
        let mut in_flight = self.in_flight.lock().unwrap();
        let count = in_flight.entry(scope_of(key)).or_insert(0);
        *count += 1;
        self.max_in_flight.fetch_max(*count, Ordering::SeqCst);
    }

    fn leave(&self, key: &str) {
        let mut in_flight = self.in_flight.lock().unwrap();
        if let Some(count) = in_flight.get_mut(&scope_of(key)) {
            *count -= 1;
        }
    }

    async fn wait_if_held(&self) {
        let rx = self.held.lock().unwrap().as_ref().map(watch::Sender::subscribe);
        if let Some(mut rx) = rx {
            while *rx.borrow_and_update() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }
    }

    async fn delay(&self) {
        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        } else {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl BlobStore for TestStore {
    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.inner.keys().await
    }

    async fn get_item(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get_item(key).await
    }

    async fn set_item(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.enter(key);
        self.write_started.notify_one();
        self.wait_if_held().await;
        self.delay().await;

        let result = if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::Backend("write rejected".into()))
        } else {
            self.inner.set_item(key, value).await
        };
        if result.is_ok() {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        self.leave(key);
        result
    }

    async fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        self.enter(key);
        self.delay().await;

        let result = if self.fail_removes.load(Ordering::SeqCst) {
            Err(StoreError::Backend("remove rejected".into()))
        } else {
            self.inner.remove_item(key).await
        };
        self.leave(key);
        result
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn wait_until(description: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting until {description}");
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Await `future`, failing the test after five seconds.
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}

/// Drain every event currently buffered in `rx`.
pub fn drain_events(rx: &mut mpsc::UnboundedReceiver<ProviderEvent>) -> Vec<ProviderEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Receive events until `stop` matches (inclusive).
pub async fn collect_until(
    rx: &mut mpsc::UnboundedReceiver<ProviderEvent>,
    stop: impl Fn(&ProviderEvent) -> bool,
) -> Vec<ProviderEvent> {
    let mut events = Vec::new();
    loop {
        let event = within(rx.recv()).await.expect("event channel closed");
        let done = stop(&event);
        events.push(event);
        if done {
            return events;
        }
    }
}
