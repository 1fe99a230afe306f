//! Identity session store.
//!
//! Holds the principal published by the auth provider and exposes it
//! synchronously. One provider watch is shared by all listeners of a store:
//! it opens with the first `on_change` and is released when the last
//! `SessionListener` drops.

use std::sync::{Arc, Mutex, RwLock, Weak};
use tracing::{debug, info, warn};

use crate::auth::{AuthError, AuthProvider, IdentityUpdate, ProviderWatch};
use crate::events::{EventBus, Subscription};
use crate::model::Principal;

/// What the store currently knows about the user.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum IdentityState {
    /// The provider has not reported yet
    #[default]
    Unresolved,
    /// The provider confirmed there is no session
    SignedOut,
    SignedIn(Principal),
}

impl IdentityState {
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            IdentityState::SignedIn(principal) => Some(principal),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, IdentityState::Unresolved)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Identity changed (including the first resolution)
    Changed(IdentityState),
    /// The provider failed; the store has already degraded to `SignedOut`
    Error(AuthError),
}

/// Listener handle returned by `SessionStore::on_change`.
///
/// Dropping it unsubscribes; dropping the last one releases the provider watch.
pub struct SessionListener {
    subscription: Option<Subscription<SessionEvent>>,
    store: Weak<SessionStore>,
}

impl Drop for SessionListener {
    fn drop(&mut self) {
        // Unsubscribe first so the listener count is current.
        drop(self.subscription.take());
        if let Some(store) = self.store.upgrade() {
            store.release_if_unused();
        }
    }
}

pub struct SessionStore {
    provider: Arc<dyn AuthProvider>,
    state: RwLock<IdentityState>,
    events: Arc<EventBus<SessionEvent>>,
    provider_watch: Mutex<Option<Box<dyn ProviderWatch>>>,
}

impl SessionStore {
    pub fn new(provider: Arc<dyn AuthProvider>) -> Arc<Self> {
        Arc::new(Self {
            provider,
            state: RwLock::new(IdentityState::Unresolved),
            events: Arc::new(EventBus::new()),
            provider_watch: Mutex::new(None),
        })
    }

    /// Latest known principal, `None` both before resolution and when signed out.
    pub fn current_principal(&self) -> Option<Principal> {
        self.state().principal().cloned()
    }

    /// Whether the provider has reported at least once.
    pub fn is_resolved(&self) -> bool {
        self.state().is_resolved()
    }

    pub fn state(&self) -> IdentityState {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn provider(&self) -> &Arc<dyn AuthProvider> {
        &self.provider
    }

    /// Register a listener for identity changes.
    ///
    /// The listener only hears changes after registration; read `state()` for
    /// the current value.
    pub fn on_change(
        self: &Arc<Self>,
        callback: impl Fn(&SessionEvent) + Send + Sync + 'static,
    ) -> SessionListener {
        let subscription = self.events.subscribe(callback);
        self.ensure_provider_watch();
        SessionListener {
            subscription: Some(subscription),
            store: Arc::downgrade(self),
        }
    }

    /// Sign out through the provider. The identity change itself arrives
    /// through the provider watch.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.provider.sign_out().await.inspect_err(|e| {
            warn!("Sign out failed: {}", e);
        })
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.events.listener_count()
    }

    fn ensure_provider_watch(self: &Arc<Self>) {
        let opened = self
            .provider_watch
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some();
        if opened {
            return;
        }

        // The provider may deliver the current identity before returning, so
        // the watch is opened without holding the lock.
        debug!("Opening provider identity watch");
        let store = Arc::downgrade(self);
        let opened = self.provider.watch_identity(Arc::new(move |update| {
            if let Some(store) = store.upgrade() {
                store.apply(update);
            }
        }));

        let mut watch = self
            .provider_watch
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if watch.is_none() && self.events.listener_count() > 0 {
            *watch = Some(opened);
        } else {
            drop(watch);
            debug!("Provider identity watch no longer needed");
            opened.cancel();
        }
    }

    fn release_if_unused(&self) {
        if self.events.listener_count() > 0 {
            return;
        }
        let watch = self
            .provider_watch
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(watch) = watch {
            debug!("Releasing provider identity watch");
            watch.cancel();
        }
    }

    fn apply(&self, update: IdentityUpdate) {
        let (next, error) = match update {
            IdentityUpdate::Resolved(Some(principal)) => (IdentityState::SignedIn(principal), None),
            IdentityUpdate::Resolved(None) => (IdentityState::SignedOut, None),
            IdentityUpdate::Failed(error) => {
                warn!("Identity resolution failed: {}", error);
                (IdentityState::SignedOut, Some(error))
            }
        };

        let changed = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            if *state == next {
                false
            } else {
                *state = next.clone();
                true
            }
        };

        if changed {
            match &next {
                IdentityState::SignedIn(principal) => info!("Signed in as {}", principal.email),
                IdentityState::SignedOut => info!("Signed out"),
                IdentityState::Unresolved => {}
            }
            self.events.emit(&SessionEvent::Changed(next));
        }
        if let Some(error) = error {
            self.events.emit(&SessionEvent::Error(error));
        }
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        let watch = self
            .provider_watch
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(watch) = watch {
            watch.cancel();
        }
    }
}
