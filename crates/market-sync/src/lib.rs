//! market-sync: Live listing views for a book marketplace.
//!
//! This crate provides the core functionality for:
//! - Tracking the signed-in principal published by an auth provider
//! - Watching a remote collection filtered by owner and delivering full snapshots
//! - Issuing create/update/delete mutations with in-flight deduplication
//! - Composing the above into a listing view model with explicit loading states
//! - AuthProvider, RemoteStore and NotificationSink trait abstractions

pub mod auth;
pub mod config;
pub mod events;
pub mod gateway;
pub mod login;
pub mod model;
pub mod notify;
pub mod session;
pub mod store;
pub mod subscription;
pub mod validation;
pub mod view_model;

pub use auth::{AuthError, AuthProvider, IdentityUpdate, InMemoryAuthProvider};
pub use config::CollectionConfig;
pub use events::{EventBus, Subscription};
pub use gateway::{MutationAck, MutationError, MutationGateway};
pub use login::{LoginController, LoginError};
pub use model::{Listing, ListingFields, ListingId, ListingPatch, Principal, Snapshot, StockStatus};
pub use notify::{Notification, NotificationKind, NotificationSink, TracingNotifier};
pub use session::{IdentityState, SessionEvent, SessionListener, SessionStore};
pub use store::{InMemoryStore, Record, RemoteStore, StoreError, WatchEvent, WatchQuery};
pub use subscription::{LiveSubscription, SubscriptionError, SubscriptionEvent, SubscriptionHandle};
pub use validation::{FormValues, Rule, Schema, ValidationErrors};
pub use view_model::{
    Confirm, DeleteOutcome, FormError, FormTarget, ListingForm, ListingRow, ListingView, ListingViewModel,
    ViewState,
};
