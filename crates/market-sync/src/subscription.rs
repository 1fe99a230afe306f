//! Live collection subscription.
//!
//! Wraps a `RemoteStore` watch filtered by owner and turns raw record arrays
//! into typed `Snapshot`s. A handle that has been closed never delivers again,
//! even if the transport hands it a late snapshot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::CollectionConfig;
use crate::model::{Listing, Snapshot};
use crate::store::{Record, RemoteStore, StoreError, WatchEvent, WatchQuery, WatchRegistration};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    #[error("Cannot subscribe without a filter key")]
    MissingFilterKey,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<StoreError> for SubscriptionError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::PermissionDenied(msg) => SubscriptionError::PermissionDenied(msg),
            other => SubscriptionError::Transport(other.to_string()),
        }
    }
}

/// Delivered to the subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    Snapshot(Snapshot),
    /// Non-fatal; the transport owns any retry
    Error(SubscriptionError),
}

/// Handle to an open subscription.
///
/// `close` is idempotent; dropping the handle closes it.
pub struct SubscriptionHandle {
    filter_key: String,
    open: Arc<AtomicBool>,
    registration: Mutex<Option<Box<dyn WatchRegistration>>>,
}

impl SubscriptionHandle {
    pub fn filter_key(&self) -> &str {
        &self.filter_key
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Release the remote watch. Later calls do nothing.
    pub fn close(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        let registration = self
            .registration
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(registration) = registration {
            registration.cancel();
        }
        debug!("Subscription for {} closed", self.filter_key);
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("filter_key", &self.filter_key)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Opens owner-filtered watches over the listing collection.
#[derive(Clone)]
pub struct LiveSubscription {
    store: Arc<dyn RemoteStore>,
    collection: CollectionConfig,
}

impl LiveSubscription {
    pub fn new(store: Arc<dyn RemoteStore>, collection: CollectionConfig) -> Self {
        Self { store, collection }
    }

    pub fn collection(&self) -> &CollectionConfig {
        &self.collection
    }

    /// Watch every listing whose owner equals `filter_key`.
    ///
    /// `on_event` may run before this returns (initial snapshot) and on any
    /// thread the store delivers on.
    pub fn subscribe(
        &self,
        filter_key: &str,
        on_event: impl Fn(SubscriptionEvent) + Send + Sync + 'static,
    ) -> Result<SubscriptionHandle, SubscriptionError> {
        if filter_key.trim().is_empty() {
            return Err(SubscriptionError::MissingFilterKey);
        }

        let open = Arc::new(AtomicBool::new(true));
        let query = WatchQuery::new(
            self.collection.name.clone(),
            self.collection.owner_field.clone(),
            filter_key,
        );

        let guard = Arc::clone(&open);
        let owner_field = self.collection.owner_field.clone();
        let key = filter_key.to_string();
        let callback = Arc::new(move |event: WatchEvent| {
            if !guard.load(Ordering::SeqCst) {
                debug!("Discarding delivery for closed subscription {}", key);
                return;
            }
            match event {
                WatchEvent::Snapshot(records) => {
                    let snapshot = decode_snapshot(&records, &owner_field, &key);
                    debug!("Snapshot for {}: {} listing(s)", key, snapshot.len());
                    on_event(SubscriptionEvent::Snapshot(snapshot));
                }
                WatchEvent::Error(error) => {
                    warn!("Subscription error for {}: {}", key, error);
                    on_event(SubscriptionEvent::Error(error.into()));
                }
            }
        });

        let registration = self.store.watch(&query, callback)?;
        debug!(
            "Subscribed to {} where {} == {}",
            query.collection, query.field, query.value
        );

        Ok(SubscriptionHandle {
            filter_key: filter_key.to_string(),
            open,
            registration: Mutex::new(Some(registration)),
        })
    }
}

/// Decode records, dropping any that are malformed or owned by someone else.
fn decode_snapshot(records: &[Record], owner_field: &str, key: &str) -> Snapshot {
    let listings = records
        .iter()
        .filter_map(|record| {
            let owner = record.data.get(owner_field).and_then(Value::as_str);
            if owner != Some(key) {
                warn!("Dropping record {} not owned by {}", record.id, key);
                return None;
            }
            match decode_listing(record, owner_field) {
                Ok(listing) => Some(listing),
                Err(e) => {
                    warn!("Skipping malformed record {}: {}", record.id, e);
                    None
                }
            }
        })
        .collect();
    Snapshot::new(listings)
}

pub(crate) fn decode_listing(record: &Record, owner_field: &str) -> serde_json::Result<Listing> {
    let mut data = record.data.clone();
    if owner_field != "sellerEmail" {
        if let Some(owner) = data.remove(owner_field) {
            data.insert("sellerEmail".to_string(), owner);
        }
    }
    data.insert("id".to_string(), Value::String(record.id.clone()));
    serde_json::from_value(Value::Object(data))
}
