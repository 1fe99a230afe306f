//! Mutation gateway: create/update/delete against individual listings.
//!
//! Fire-and-confirm. A successful result means the store durably accepted the
//! write; the change itself reaches the UI through the subscription.
//!
//! Identical requests issued while one is still in flight share its outcome
//! instead of hitting the store twice.

use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::CollectionConfig;
use crate::model::{ListingFields, ListingId, ListingPatch, Principal};
use crate::store::{Fields, RemoteStore, StoreError};
use crate::validation::ValidationErrors;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MutationError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Listing not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(#[from] ValidationErrors),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<StoreError> for MutationError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::PermissionDenied(msg) => MutationError::PermissionDenied(msg),
            StoreError::NotFound(msg) => MutationError::NotFound(msg),
            StoreError::InvalidArgument(msg) => {
                MutationError::Validation(ValidationErrors::single("record", msg))
            }
            StoreError::Unavailable(msg) => MutationError::Transport(msg),
        }
    }
}

/// What the store acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationAck {
    Created(ListingId),
    Updated(ListingId),
    Deleted(ListingId),
}

impl MutationAck {
    pub fn id(&self) -> &str {
        match self {
            MutationAck::Created(id) | MutationAck::Updated(id) | MutationAck::Deleted(id) => id,
        }
    }
}

pub type Result<T> = std::result::Result<T, MutationError>;

type Operation = BoxFuture<'static, Result<MutationAck>>;

/// Registry entries only hold weak references: the operation lives as long as
/// some caller is still awaiting it.
type Registry = Arc<Mutex<HashMap<MutationKey, (u64, WeakShared<Operation>)>>>;

/// Identity of a request for deduplication. Payloads are compared by their
/// serialized form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum MutationKey {
    Create { owner: String, payload: String },
    Update { id: String, payload: String },
    Delete { id: String },
}

pub struct MutationGateway {
    store: Arc<dyn RemoteStore>,
    collection: CollectionConfig,
    in_flight: Registry,
    next_request: AtomicU64,
}

/// Removes its registry entry when the operation completes or is abandoned
/// by every caller.
struct InFlightEntry {
    registry: Registry,
    key: MutationKey,
    request: u64,
}

impl Drop for InFlightEntry {
    fn drop(&mut self) {
        let mut in_flight = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        // A newer request may already have taken over the key.
        if in_flight.get(&self.key).map(|(request, _)| *request) == Some(self.request) {
            in_flight.remove(&self.key);
        }
    }
}

impl MutationGateway {
    pub fn new(store: Arc<dyn RemoteStore>, collection: CollectionConfig) -> Self {
        Self {
            store,
            collection,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_request: AtomicU64::new(0),
        }
    }

    /// Create a listing owned by `seller`. The owner is always taken from the
    /// principal, never from the fields.
    pub async fn create(&self, seller: &Principal, fields: &ListingFields) -> Result<MutationAck> {
        fields.validate()?;
        let mut data = to_fields(fields)?;
        data.insert(
            self.collection.owner_field.clone(),
            Value::String(seller.email.clone()),
        );

        let key = MutationKey::Create {
            owner: seller.email.clone(),
            payload: Value::Object(data.clone()).to_string(),
        };
        let store = Arc::clone(&self.store);
        let collection = self.collection.name.clone();
        self.run(
            key,
            async move {
                let id = store.insert(&collection, data).await?;
                Ok::<_, MutationError>(MutationAck::Created(id))
            }
            .boxed(),
        )
        .await
    }

    /// Apply a partial update to the mutable fields of listing `id`.
    pub async fn update(&self, id: &str, patch: &ListingPatch) -> Result<MutationAck> {
        patch.validate()?;
        let data = to_fields(patch)?;

        let key = MutationKey::Update {
            id: id.to_string(),
            payload: Value::Object(data.clone()).to_string(),
        };
        let store = Arc::clone(&self.store);
        let collection = self.collection.name.clone();
        let id = id.to_string();
        self.run(
            key,
            async move {
                store.update(&collection, &id, data).await?;
                Ok::<_, MutationError>(MutationAck::Updated(id))
            }
            .boxed(),
        )
        .await
    }

    /// Delete listing `id`. Confirmation is the caller's job.
    pub async fn delete(&self, id: &str) -> Result<MutationAck> {
        let key = MutationKey::Delete { id: id.to_string() };
        let store = Arc::clone(&self.store);
        let collection = self.collection.name.clone();
        let id = id.to_string();
        self.run(
            key,
            async move {
                store.delete(&collection, &id).await?;
                Ok::<_, MutationError>(MutationAck::Deleted(id))
            }
            .boxed(),
        )
        .await
    }

    /// Number of distinct requests currently awaiting the store.
    pub fn in_flight(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    async fn run(&self, key: MutationKey, operation: Operation) -> Result<MutationAck> {
        let shared = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            match in_flight.get(&key).and_then(|(_, weak)| weak.upgrade()) {
                Some(existing) => {
                    debug!("Joining in-flight request {:?}", key);
                    existing
                }
                None => {
                    let request = self.next_request.fetch_add(1, Ordering::Relaxed);
                    let entry = InFlightEntry {
                        registry: Arc::clone(&self.in_flight),
                        key: key.clone(),
                        request,
                    };
                    let future: Shared<Operation> = async move {
                        let _entry = entry;
                        operation.await
                    }
                    .boxed()
                    .shared();
                    if let Some(weak) = future.downgrade() {
                        in_flight.insert(key, (request, weak));
                    }
                    future
                }
            }
        };

        shared.await.inspect_err(|e| {
            warn!("Mutation failed: {}", e);
        })
    }
}

fn to_fields<T: serde::Serialize>(value: &T) -> Result<Fields> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ValidationErrors::single("record", "Record must be an object").into()),
        Err(e) => Err(ValidationErrors::single("record", e.to_string()).into()),
    }
}
