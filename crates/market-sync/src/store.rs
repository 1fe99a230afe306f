//! RemoteStore trait abstraction for the hosted document database.
//!
//! Implementations:
//! - `InMemoryStore` - For testing and the CLI's local backend
//!
//! The store is schema-less: records are an id plus a JSON object. Typed
//! decoding happens in the subscription layer.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Field map of a stored record.
pub type Fields = Map<String, Value>;

/// A record as delivered by the remote store.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    pub data: Fields,
}

/// Equality filter over one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchQuery {
    pub collection: String,
    pub field: String,
    pub value: String,
}

impl WatchQuery {
    pub fn new(
        collection: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            collection: collection.into(),
            field: field.into(),
            value: value.into(),
        }
    }

    /// Whether a record's fields satisfy this filter.
    pub fn matches(&self, data: &Fields) -> bool {
        data.get(&self.field).and_then(Value::as_str) == Some(self.value.as_str())
    }
}

/// What a standing watch delivers.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    /// Complete current result set
    Snapshot(Vec<Record>),
    /// Transport or permission failure; the watch may still deliver later
    Error(StoreError),
}

pub type WatchCallback = Arc<dyn Fn(WatchEvent) + Send + Sync>;

/// A standing remote watch. Cancelling releases it on the backend.
pub trait WatchRegistration: Send + Sync {
    fn cancel(&self);
}

/// Hosted document database.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Open a standing watch. The callback receives a full snapshot on every
    /// change to the matching result set.
    fn watch(&self, query: &WatchQuery, callback: WatchCallback)
    -> Result<Box<dyn WatchRegistration>>;

    /// Insert a record, returning the id the store assigned.
    async fn insert(&self, collection: &str, data: Fields) -> Result<String>;

    /// Merge `fields` into an existing record.
    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<()>;

    /// Delete a record.
    async fn delete(&self, collection: &str, id: &str) -> Result<()>;
}

// Lets a single store be shared between a gateway, subscriptions and tests.
#[async_trait]
impl<T: RemoteStore + ?Sized> RemoteStore for Arc<T> {
    fn watch(
        &self,
        query: &WatchQuery,
        callback: WatchCallback,
    ) -> Result<Box<dyn WatchRegistration>> {
        (**self).watch(query, callback)
    }

    async fn insert(&self, collection: &str, data: Fields) -> Result<String> {
        (**self).insert(collection, data).await
    }

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<()> {
        (**self).update(collection, id, fields).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        (**self).delete(collection, id).await
    }
}

struct Watcher {
    id: usize,
    query: WatchQuery,
    callback: WatchCallback,
}

type Delivery = (WatchCallback, WatchEvent);

#[derive(Default)]
struct State {
    /// collection -> id -> fields, ordered by id
    collections: HashMap<String, BTreeMap<String, Fields>>,
    watchers: Vec<Watcher>,
    next_watch_id: usize,
    /// When set, deliveries queue in `pending` until released
    held: bool,
    pending: Vec<Delivery>,
    /// Failures returned by the next mutations, in order
    failures: VecDeque<StoreError>,
    writes: usize,
}

impl State {
    fn snapshot_for(&self, query: &WatchQuery) -> Vec<Record> {
        self.collections
            .get(&query.collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, data)| query.matches(data))
                    .map(|(id, data)| Record {
                        id: id.clone(),
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Snapshots for every watcher whose result set may have changed.
    fn affected(&self, collection: &str, before: Option<&Fields>, after: Option<&Fields>) -> Vec<Delivery> {
        self.watchers
            .iter()
            .filter(|w| w.query.collection == collection)
            .filter(|w| {
                before.is_some_and(|d| w.query.matches(d)) || after.is_some_and(|d| w.query.matches(d))
            })
            .map(|w| {
                (
                    Arc::clone(&w.callback),
                    WatchEvent::Snapshot(self.snapshot_for(&w.query)),
                )
            })
            .collect()
    }

    /// Returns the deliveries to run now; queues them instead while held.
    fn dispatch(&mut self, deliveries: Vec<Delivery>) -> Vec<Delivery> {
        if self.held {
            self.pending.extend(deliveries);
            Vec::new()
        } else {
            deliveries
        }
    }
}

fn deliver(deliveries: Vec<Delivery>) {
    for (callback, event) in deliveries {
        callback(event);
    }
}

/// In-memory document store.
///
/// Delivers snapshots synchronously on the calling thread after every write,
/// but only to watchers whose result set the write touched. Callbacks never
/// run while the internal lock is held.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Write a record with a known id, as another session would.
    pub fn put(&self, collection: &str, id: &str, data: Fields) {
        let deliveries = {
            let mut state = self.lock();
            let docs = state.collections.entry(collection.to_string()).or_default();
            let before = docs.insert(id.to_string(), data.clone());
            let deliveries = state.affected(collection, before.as_ref(), Some(&data));
            state.dispatch(deliveries)
        };
        deliver(deliveries);
    }

    /// Remove a record directly, as another session would.
    pub fn remove(&self, collection: &str, id: &str) -> bool {
        let deliveries = {
            let mut state = self.lock();
            let before = state
                .collections
                .get_mut(collection)
                .and_then(|docs| docs.remove(id));
            let Some(before) = before else {
                return false;
            };
            let deliveries = state.affected(collection, Some(&before), None);
            state.dispatch(deliveries)
        };
        deliver(deliveries);
        true
    }

    /// Fetch one record.
    pub fn get(&self, collection: &str, id: &str) -> Option<Fields> {
        self.lock()
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    /// All records in a collection, in store order.
    pub fn records(&self, collection: &str) -> Vec<Record> {
        self.lock()
            .collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, data)| Record {
                        id: id.clone(),
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Queue snapshot deliveries instead of running them.
    pub fn hold_deliveries(&self) {
        self.lock().held = true;
    }

    /// Run every queued delivery in order, including ones addressed to
    /// watches that have since been cancelled.
    pub fn release_deliveries(&self) {
        let pending = {
            let mut state = self.lock();
            state.held = false;
            std::mem::take(&mut state.pending)
        };
        debug!("Releasing {} held deliveries", pending.len());
        deliver(pending);
    }

    /// Drop queued deliveries without running them.
    pub fn discard_held_deliveries(&self) -> usize {
        let mut state = self.lock();
        state.held = false;
        std::mem::take(&mut state.pending).len()
    }

    /// Make the next mutation fail with `error`.
    pub fn fail_next(&self, error: StoreError) {
        self.lock().failures.push_back(error);
    }

    /// Push a transport error to every watch on `collection`.
    pub fn emit_error(&self, collection: &str, error: StoreError) {
        let deliveries = {
            let mut state = self.lock();
            let deliveries = state
                .watchers
                .iter()
                .filter(|w| w.query.collection == collection)
                .map(|w| (Arc::clone(&w.callback), WatchEvent::Error(error.clone())))
                .collect();
            state.dispatch(deliveries)
        };
        deliver(deliveries);
    }

    /// Number of open watches.
    pub fn watcher_count(&self) -> usize {
        self.lock().watchers.len()
    }

    /// Number of mutations that reached the store (successful or not).
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    fn begin_write(state: &mut State) -> Result<()> {
        state.writes += 1;
        match state.failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

struct InMemoryWatch {
    state: Weak<Mutex<State>>,
    id: usize,
}

impl WatchRegistration for InMemoryWatch {
    fn cancel(&self) {
        if let Some(state) = self.state.upgrade() {
            let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
            state.watchers.retain(|w| w.id != self.id);
        }
    }
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    fn watch(
        &self,
        query: &WatchQuery,
        callback: WatchCallback,
    ) -> Result<Box<dyn WatchRegistration>> {
        let (id, deliveries) = {
            let mut state = self.lock();
            let id = state.next_watch_id;
            state.next_watch_id += 1;
            state.watchers.push(Watcher {
                id,
                query: query.clone(),
                callback: Arc::clone(&callback),
            });
            let initial = WatchEvent::Snapshot(state.snapshot_for(query));
            (id, state.dispatch(vec![(callback, initial)]))
        };
        debug!(
            "Watch {} opened on {} where {} == {}",
            id, query.collection, query.field, query.value
        );
        deliver(deliveries);

        Ok(Box::new(InMemoryWatch {
            state: Arc::downgrade(&self.state),
            id,
        }))
    }

    async fn insert(&self, collection: &str, data: Fields) -> Result<String> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let deliveries = {
            let mut state = self.lock();
            Self::begin_write(&mut state)?;
            state
                .collections
                .entry(collection.to_string())
                .or_default()
                .insert(id.clone(), data.clone());
            let deliveries = state.affected(collection, None, Some(&data));
            state.dispatch(deliveries)
        };
        deliver(deliveries);
        Ok(id)
    }

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<()> {
        let deliveries = {
            let mut state = self.lock();
            Self::begin_write(&mut state)?;
            let doc = state
                .collections
                .get_mut(collection)
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| StoreError::NotFound(format!("{}/{}", collection, id)))?;
            let before = doc.clone();
            for (key, value) in fields {
                doc.insert(key, value);
            }
            let after = doc.clone();
            let deliveries = state.affected(collection, Some(&before), Some(&after));
            state.dispatch(deliveries)
        };
        deliver(deliveries);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let deliveries = {
            let mut state = self.lock();
            Self::begin_write(&mut state)?;
            let before = state
                .collections
                .get_mut(collection)
                .and_then(|docs| docs.remove(id))
                .ok_or_else(|| StoreError::NotFound(format!("{}/{}", collection, id)))?;
            let deliveries = state.affected(collection, Some(&before), None);
            state.dispatch(deliveries)
        };
        deliver(deliveries);
        Ok(())
    }
}
