//! Listing view model.
//!
//! Composes the session store, the live subscription and the mutation
//! gateway into the state a listing page renders:
//!
//! ```text
//! Idle ──signed in──▶ Loading ──snapshot──▶ Ready
//!   │                    ▲                    │
//!   └─signed out─▶ SignedOut   └──account changed─┘
//! ```
//!
//! The displayed list only ever comes from the latest snapshot. Mutations
//! report pass/fail through the notification sink and never edit the list
//! locally.

use std::sync::{Arc, Mutex, RwLock, Weak};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::CollectionConfig;
use crate::events::{EventBus, Subscription};
use crate::gateway::{MutationAck, MutationError, MutationGateway};
use crate::model::{Listing, ListingFields, ListingId, ListingPatch, Snapshot, StockStatus};
use crate::notify::NotificationSink;
use crate::session::{IdentityState, SessionEvent, SessionListener, SessionStore};
use crate::store::RemoteStore;
use crate::subscription::{LiveSubscription, SubscriptionEvent, SubscriptionHandle};
use crate::validation::{FormValues, ValidationErrors};

pub const DELETE_PROMPT: &str = "Are you sure you want to delete this listing?";
pub const NO_LISTINGS_MESSAGE: &str = "No books found";

#[derive(Debug, Clone, PartialEq, Default)]
pub enum ViewState {
    /// No principal resolved yet
    #[default]
    Idle,
    /// Provider confirmed nobody is signed in
    SignedOut,
    /// Subscription open, first snapshot pending
    Loading,
    Ready(Snapshot),
}

/// One rendered row.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingRow {
    pub id: ListingId,
    pub name: String,
    pub category: String,
    pub quantity: u32,
    pub selling_price: f64,
    pub status: StockStatus,
    pub cover_image: Option<String>,
}

impl ListingRow {
    pub fn badge(&self) -> &'static str {
        self.status.label()
    }
}

impl From<&Listing> for ListingRow {
    fn from(listing: &Listing) -> Self {
        Self {
            id: listing.id.clone(),
            name: listing.fields.name.clone(),
            category: listing.fields.category.clone(),
            quantity: listing.fields.quantity,
            selling_price: listing.fields.selling_price,
            status: listing.stock_status(),
            cover_image: listing.fields.cover_image.clone(),
        }
    }
}

/// Presentation-neutral rendering of the current state.
#[derive(Debug, Clone, PartialEq)]
pub enum ListingView {
    Nothing,
    NotSignedIn,
    Loading,
    /// Ready with zero listings; shown as `NO_LISTINGS_MESSAGE`
    Empty,
    Rows(Vec<ListingRow>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormTarget {
    Create,
    Edit(ListingId),
}

/// An open create/edit form.
///
/// Edit forms carry the target id separately; the values never include `id`
/// or `sellerEmail`.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingForm {
    target: FormTarget,
    values: FormValues,
}

impl ListingForm {
    pub fn blank() -> Self {
        Self {
            target: FormTarget::Create,
            values: FormValues::new(),
        }
    }

    pub fn for_listing(listing: &Listing) -> Self {
        Self {
            target: FormTarget::Edit(listing.id.clone()),
            values: listing.fields.to_form_values(),
        }
    }

    pub fn target(&self) -> &FormTarget {
        &self.target
    }

    pub fn values(&self) -> &FormValues {
        &self.values
    }

    pub fn is_edit(&self) -> bool {
        matches!(self.target, FormTarget::Edit(_))
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormError {
    #[error("No form is open")]
    NoForm,

    #[error("Not signed in")]
    NotSignedIn,

    #[error("{0}")]
    Invalid(ValidationErrors),

    #[error(transparent)]
    Mutation(#[from] MutationError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeleteOutcome {
    /// The user declined the confirmation
    Cancelled,
    /// The store accepted the delete; the row leaves with the next snapshot
    Deleted,
    Failed(MutationError),
}

/// Asks the user to confirm a destructive action.
pub trait Confirm {
    fn confirm(&self, prompt: &str) -> bool;
}

impl<F: Fn(&str) -> bool> Confirm for F {
    fn confirm(&self, prompt: &str) -> bool {
        self(prompt)
    }
}

struct ViewInner {
    state: ViewState,
    /// Bumped on every identity-driven transition; deliveries carry the
    /// generation they were opened under.
    generation: u64,
}

/// The subscription the view currently follows.
///
/// `key` is set as soon as a subscription is decided on; `handle` only once
/// the store has accepted it.
#[derive(Default)]
struct ActiveSubscription {
    key: Option<String>,
    handle: Option<SubscriptionHandle>,
}

struct Inner {
    session: Arc<SessionStore>,
    live: LiveSubscription,
    gateway: MutationGateway,
    notifier: Arc<dyn NotificationSink>,
    view: RwLock<ViewInner>,
    active: Mutex<ActiveSubscription>,
    form: RwLock<Option<ListingForm>>,
    events: Arc<EventBus<ViewState>>,
    listener: Mutex<Option<SessionListener>>,
}

pub struct ListingViewModel {
    inner: Arc<Inner>,
}

impl ListingViewModel {
    /// Attach to a session and start following its identity.
    pub fn mount(
        session: Arc<SessionStore>,
        store: Arc<dyn RemoteStore>,
        notifier: Arc<dyn NotificationSink>,
        collection: CollectionConfig,
    ) -> Self {
        let inner = Arc::new(Inner {
            live: LiveSubscription::new(Arc::clone(&store), collection.clone()),
            gateway: MutationGateway::new(store, collection),
            session: Arc::clone(&session),
            notifier,
            view: RwLock::new(ViewInner {
                state: ViewState::Idle,
                generation: 0,
            }),
            active: Mutex::new(ActiveSubscription::default()),
            form: RwLock::new(None),
            events: Arc::new(EventBus::new()),
            listener: Mutex::new(None),
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let listener = session.on_change(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.on_session_event(event);
            }
        });
        *inner.listener.lock().unwrap_or_else(|e| e.into_inner()) = Some(listener);

        // The provider may already have resolved before we registered.
        inner.sync_identity();

        Self { inner }
    }

    pub fn state(&self) -> ViewState {
        self.inner.state()
    }

    /// Latest snapshot, once one has arrived.
    pub fn snapshot(&self) -> Option<Snapshot> {
        match self.state() {
            ViewState::Ready(snapshot) => Some(snapshot),
            _ => None,
        }
    }

    pub fn render(&self) -> ListingView {
        match self.state() {
            ViewState::Idle => ListingView::Nothing,
            ViewState::SignedOut => ListingView::NotSignedIn,
            ViewState::Loading => ListingView::Loading,
            ViewState::Ready(snapshot) if snapshot.is_empty() => ListingView::Empty,
            ViewState::Ready(snapshot) => {
                ListingView::Rows(snapshot.iter().map(ListingRow::from).collect())
            }
        }
    }

    /// Called with the new state after every transition.
    pub fn on_change(
        &self,
        callback: impl Fn(&ViewState) + Send + Sync + 'static,
    ) -> Subscription<ViewState> {
        self.inner.events.subscribe(callback)
    }

    /// Open a blank form for a new listing.
    pub fn request_create(&self) -> Option<ListingForm> {
        self.inner.session.current_principal()?;
        Some(self.inner.open_form(ListingForm::blank()))
    }

    /// Open an edit form pre-populated with `listing`'s mutable fields.
    pub fn request_edit(&self, listing: &Listing) -> Option<ListingForm> {
        let principal = self.inner.session.current_principal()?;
        if !listing.is_owned_by(&principal) {
            return None;
        }
        Some(self.inner.open_form(ListingForm::for_listing(listing)))
    }

    pub fn form(&self) -> Option<ListingForm> {
        self.inner
            .form
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn cancel_form(&self) {
        *self.inner.form.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Validate and submit the open form.
    ///
    /// The form stays open on failure so the user can correct it.
    pub async fn submit_form(&self, values: &FormValues) -> Result<MutationAck, FormError> {
        let form = self.form().ok_or(FormError::NoForm)?;
        let principal = self
            .inner
            .session
            .current_principal()
            .ok_or(FormError::NotSignedIn)?;
        let fields = ListingFields::from_form_values(values).map_err(FormError::Invalid)?;

        let (result, success) = match form.target() {
            FormTarget::Create => (
                self.inner.gateway.create(&principal, &fields).await,
                "Book listing added successfully",
            ),
            FormTarget::Edit(id) => (
                self.inner
                    .gateway
                    .update(id, &ListingPatch::replace_all(&fields))
                    .await,
                "Book listing updated successfully",
            ),
        };

        match result {
            Ok(ack) => {
                self.inner.notifier.success(success);
                let mut open = self.inner.form.write().unwrap_or_else(|e| e.into_inner());
                if open.as_ref() == Some(&form) {
                    *open = None;
                }
                Ok(ack)
            }
            Err(error) => {
                self.inner.notifier.error(&error.to_string());
                Err(error.into())
            }
        }
    }

    /// Delete `listing` after confirmation. The row stays until a snapshot
    /// without it arrives.
    pub async fn request_delete(&self, listing: &Listing, confirm: &dyn Confirm) -> DeleteOutcome {
        if let Err(error) = self.inner.check_owner(listing) {
            self.inner.notifier.error(&error.to_string());
            return DeleteOutcome::Failed(error);
        }
        if !confirm.confirm(DELETE_PROMPT) {
            debug!("Delete of {} cancelled", listing.id);
            return DeleteOutcome::Cancelled;
        }

        match self.inner.gateway.delete(&listing.id).await {
            Ok(_) => {
                self.inner.notifier.success("Book listing deleted successfully");
                DeleteOutcome::Deleted
            }
            Err(error) => {
                self.inner.notifier.error(&error.to_string());
                DeleteOutcome::Failed(error)
            }
        }
    }

    /// Set quantity to zero and mark the listing unavailable.
    pub async fn mark_sold_out(&self, listing: &Listing) -> Result<MutationAck, MutationError> {
        let result = match self.inner.check_owner(listing) {
            Ok(()) => {
                self.inner
                    .gateway
                    .update(&listing.id, &ListingPatch::sold_out())
                    .await
            }
            Err(error) => Err(error),
        };
        match &result {
            Ok(_) => self.inner.notifier.success("Book listing updated successfully"),
            Err(error) => self.inner.notifier.error(&error.to_string()),
        }
        result
    }

    /// Release the subscription and the identity listener.
    pub fn close(&self) {
        self.inner.close();
    }
}

impl Drop for ListingViewModel {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl Inner {
    fn state(&self) -> ViewState {
        self.view
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .state
            .clone()
    }

    /// Only the signed-in owner may act on a listing.
    fn check_owner(&self, listing: &Listing) -> Result<(), MutationError> {
        match self.session.current_principal() {
            Some(principal) if listing.is_owned_by(&principal) => Ok(()),
            Some(principal) => {
                warn!(
                    "{} tried to modify listing {} owned by {}",
                    principal.email, listing.id, listing.seller_email
                );
                Err(MutationError::PermissionDenied(format!(
                    "Listing {} belongs to another seller",
                    listing.id
                )))
            }
            None => Err(MutationError::PermissionDenied("Not signed in".to_string())),
        }
    }

    fn open_form(&self, form: ListingForm) -> ListingForm {
        *self.form.write().unwrap_or_else(|e| e.into_inner()) = Some(form.clone());
        form
    }

    fn on_session_event(self: &Arc<Self>, event: &SessionEvent) {
        match event {
            // The payload may already be stale; sync re-reads the session.
            SessionEvent::Changed(_) => self.sync_identity(),
            SessionEvent::Error(error) => self.notifier.error(&error.user_message()),
        }
    }

    /// Follow the session's current identity: tear down the old subscription,
    /// then open one for the new owner, in that order.
    ///
    /// The decision is made under `active`. Closing, subscribing and change
    /// callbacks all run after it is released, so a callback may re-enter.
    fn sync_identity(self: &Arc<Self>) {
        let (identity, previous, generation, changed) = {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            let identity = self.session.state();
            let key = identity.principal().map(|p| p.email.clone());
            if key.is_some() && key == active.key {
                return;
            }

            let next = match &identity {
                IdentityState::Unresolved => ViewState::Idle,
                IdentityState::SignedOut => ViewState::SignedOut,
                IdentityState::SignedIn(_) => ViewState::Loading,
            };
            active.key = key;
            let previous = active.handle.take();
            let (generation, changed) = self.enter(next);
            (identity, previous, generation, changed)
        };

        if let Some(previous) = previous {
            previous.close();
        }
        if !matches!(identity, IdentityState::Unresolved) {
            *self.form.write().unwrap_or_else(|e| e.into_inner()) = None;
        }
        if let Some(state) = changed {
            self.events.emit(&state);
        }

        let IdentityState::SignedIn(principal) = identity else {
            return;
        };
        let weak = Arc::downgrade(self);
        let subscribed = self.live.subscribe(&principal.email, move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.on_subscription_event(generation, event);
            }
        });

        match subscribed {
            Ok(handle) => self.adopt(generation, handle),
            Err(error) => {
                self.on_subscription_event(generation, SubscriptionEvent::Error(error));
            }
        }
    }

    /// Keep `handle` if nothing has moved the view on since it was opened,
    /// otherwise close it.
    fn adopt(&self, generation: u64, handle: SubscriptionHandle) {
        let superseded = {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            let current = self.view.read().unwrap_or_else(|e| e.into_inner()).generation;
            if current == generation && active.handle.is_none() {
                info!("Watching listings for {}", handle.filter_key());
                active.handle = Some(handle);
                None
            } else {
                Some(handle)
            }
        };

        if let Some(handle) = superseded {
            debug!(
                "Closing subscription for {} superseded while opening",
                handle.filter_key()
            );
            handle.close();
        }
    }

    /// Enter `state` under a new generation. Returns that generation and the
    /// state to announce, if it changed. Callers emit once their locks are
    /// released.
    fn enter(&self, state: ViewState) -> (u64, Option<ViewState>) {
        let mut view = self.view.write().unwrap_or_else(|e| e.into_inner());
        view.generation += 1;
        let changed = (view.state != state).then(|| state.clone());
        view.state = state;
        (view.generation, changed)
    }

    fn on_subscription_event(&self, generation: u64, event: SubscriptionEvent) {
        let (changed, error) = {
            let mut view = self.view.write().unwrap_or_else(|e| e.into_inner());
            if view.generation != generation {
                debug!(
                    "Discarding delivery from generation {} (current {})",
                    generation, view.generation
                );
                return;
            }
            match event {
                SubscriptionEvent::Snapshot(snapshot) => {
                    view.state = ViewState::Ready(snapshot);
                    (Some(view.state.clone()), None)
                }
                SubscriptionEvent::Error(error) => {
                    if view.state == ViewState::Loading {
                        view.state = ViewState::Ready(Snapshot::empty());
                        (Some(view.state.clone()), Some(error))
                    } else {
                        (None, Some(error))
                    }
                }
            }
        };

        if let Some(error) = error {
            self.notifier.error(&error.to_string());
        }
        if let Some(state) = changed {
            self.events.emit(&state);
        }
    }

    fn close(&self) {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        drop(listener);

        let handle = {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            active.key = None;
            // Invalidate anything still in flight from the transport, including
            // a subscription that is still being opened.
            self.view.write().unwrap_or_else(|e| e.into_inner()).generation += 1;
            active.handle.take()
        };
        if let Some(handle) = handle {
            handle.close();
        }
    }
}
