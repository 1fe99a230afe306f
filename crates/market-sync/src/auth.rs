//! AuthProvider trait abstraction and the closed auth error enumeration.
//!
//! Implementations:
//! - `InMemoryAuthProvider` - For testing and the CLI's local backend
//!
//! Provider error codes are mapped to `AuthError` once, here. Nothing
//! downstream inspects code strings.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use thiserror::Error;
use tracing::debug;

use crate::model::Principal;

/// Prefix the provider puts in front of every error code.
const CODE_PREFIX: &str = "auth/";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Invalid credential")]
    InvalidCredential,

    #[error("Invalid email")]
    InvalidEmail,

    #[error("User not found")]
    UserNotFound,

    #[error("Wrong password")]
    WrongPassword,

    #[error("User disabled")]
    UserDisabled,

    #[error("Email already in use")]
    EmailAlreadyInUse,

    #[error("Too many requests")]
    TooManyRequests,

    #[error("Network request failed")]
    NetworkRequestFailed,

    #[error("Popup closed by user")]
    PopupClosedByUser,

    /// Any code without a dedicated variant; displayed in sentence case.
    #[error("{}", sentence_case(.code))]
    Other { code: String },
}

impl AuthError {
    /// Map a provider code such as `auth/invalid-credential`.
    pub fn from_code(code: &str) -> Self {
        let bare = code.strip_prefix(CODE_PREFIX).unwrap_or(code);
        match bare {
            "invalid-credential" => AuthError::InvalidCredential,
            "invalid-email" => AuthError::InvalidEmail,
            "user-not-found" => AuthError::UserNotFound,
            "wrong-password" => AuthError::WrongPassword,
            "user-disabled" => AuthError::UserDisabled,
            "email-already-in-use" => AuthError::EmailAlreadyInUse,
            "too-many-requests" => AuthError::TooManyRequests,
            "network-request-failed" => AuthError::NetworkRequestFailed,
            "popup-closed-by-user" => AuthError::PopupClosedByUser,
            other => AuthError::Other {
                code: other.to_string(),
            },
        }
    }

    /// The provider code without its prefix.
    pub fn code(&self) -> &str {
        match self {
            AuthError::InvalidCredential => "invalid-credential",
            AuthError::InvalidEmail => "invalid-email",
            AuthError::UserNotFound => "user-not-found",
            AuthError::WrongPassword => "wrong-password",
            AuthError::UserDisabled => "user-disabled",
            AuthError::EmailAlreadyInUse => "email-already-in-use",
            AuthError::TooManyRequests => "too-many-requests",
            AuthError::NetworkRequestFailed => "network-request-failed",
            AuthError::PopupClosedByUser => "popup-closed-by-user",
            AuthError::Other { code } => code,
        }
    }

    /// Message suitable for a notification.
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

/// `invalid-credential` -> `Invalid credential`
fn sentence_case(code: &str) -> String {
    let spaced = code.replace('-', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// One identity emission from the provider.
#[derive(Debug, Clone, PartialEq)]
pub enum IdentityUpdate {
    /// The provider settled on a principal, or confirmed there is none
    Resolved(Option<Principal>),
    /// Resolution failed
    Failed(AuthError),
}

pub type IdentityCallback = Arc<dyn Fn(IdentityUpdate) + Send + Sync>;

/// A live provider-level identity watch. Cancelling releases it.
pub trait ProviderWatch: Send + Sync {
    fn cancel(&self);
}

/// Authentication provider.
///
/// Only the identity it publishes and the sign-in/out entry points are
/// consumed; token handling stays inside the provider.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Stream identity changes to `callback`. If the provider has already
    /// resolved, the current identity is delivered immediately.
    fn watch_identity(&self, callback: IdentityCallback) -> Box<dyn ProviderWatch>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Principal, AuthError>;

    /// Federated sign-in. `Ok(None)` means the account is not registered.
    async fn sign_in_with_google(&self) -> Result<Option<Principal>, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;
}

#[async_trait]
impl<T: AuthProvider + ?Sized> AuthProvider for Arc<T> {
    fn watch_identity(&self, callback: IdentityCallback) -> Box<dyn ProviderWatch> {
        (**self).watch_identity(callback)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Principal, AuthError> {
        (**self).sign_in(email, password).await
    }

    async fn sign_in_with_google(&self) -> Result<Option<Principal>, AuthError> {
        (**self).sign_in_with_google().await
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        (**self).sign_out().await
    }
}

struct Account {
    password: String,
    principal: Principal,
}

#[derive(Default)]
struct ProviderState {
    accounts: HashMap<String, Account>,
    /// `None` until the first resolution
    current: Option<Option<Principal>>,
    google_account: Option<String>,
    watchers: Vec<(usize, IdentityCallback)>,
    next_watch_id: usize,
}

/// In-memory auth provider.
///
/// Starts unresolved: watchers hear nothing until `resolve`, `fail_resolution`
/// or a sign-in happens.
#[derive(Clone, Default)]
pub struct InMemoryAuthProvider {
    state: Arc<Mutex<ProviderState>>,
    watch_opens: Arc<AtomicUsize>,
}

impl InMemoryAuthProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register an email/password account.
    pub fn add_account(&self, principal: Principal, password: impl Into<String>) {
        self.lock().accounts.insert(
            principal.email.to_lowercase(),
            Account {
                password: password.into(),
                principal,
            },
        );
    }

    /// Email of the account a federated sign-in resolves to (`None`: unregistered).
    pub fn set_google_account(&self, email: Option<&str>) {
        self.lock().google_account = email.map(str::to_lowercase);
    }

    /// Settle the identity as a real provider would after restoring a session.
    pub fn resolve(&self, principal: Option<Principal>) {
        self.publish(IdentityUpdate::Resolved(principal));
    }

    /// Fail the identity resolution.
    pub fn fail_resolution(&self, error: AuthError) {
        self.publish(IdentityUpdate::Failed(error));
    }

    /// Number of open provider-level watches.
    pub fn watcher_count(&self) -> usize {
        self.lock().watchers.len()
    }

    /// Total watches ever opened.
    pub fn watch_opens(&self) -> usize {
        self.watch_opens.load(Ordering::Relaxed)
    }

    fn publish(&self, update: IdentityUpdate) {
        let callbacks: Vec<IdentityCallback> = {
            let mut state = self.lock();
            state.current = Some(match &update {
                IdentityUpdate::Resolved(principal) => principal.clone(),
                IdentityUpdate::Failed(_) => None,
            });
            state.watchers.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        for callback in callbacks {
            callback(update.clone());
        }
    }
}

struct InMemoryProviderWatch {
    state: Weak<Mutex<ProviderState>>,
    id: usize,
}

impl ProviderWatch for InMemoryProviderWatch {
    fn cancel(&self) {
        if let Some(state) = self.state.upgrade() {
            let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
            state.watchers.retain(|(id, _)| *id != self.id);
        }
    }
}

#[async_trait]
impl AuthProvider for InMemoryAuthProvider {
    fn watch_identity(&self, callback: IdentityCallback) -> Box<dyn ProviderWatch> {
        self.watch_opens.fetch_add(1, Ordering::Relaxed);
        let (id, current) = {
            let mut state = self.lock();
            let id = state.next_watch_id;
            state.next_watch_id += 1;
            state.watchers.push((id, Arc::clone(&callback)));
            (id, state.current.clone())
        };
        debug!("Identity watch {} opened", id);
        if let Some(principal) = current {
            callback(IdentityUpdate::Resolved(principal));
        }
        Box::new(InMemoryProviderWatch {
            state: Arc::downgrade(&self.state),
            id,
        })
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Principal, AuthError> {
        let principal = {
            let state = self.lock();
            let account = state
                .accounts
                .get(&email.to_lowercase())
                .ok_or(AuthError::InvalidCredential)?;
            if account.password != password {
                return Err(AuthError::InvalidCredential);
            }
            account.principal.clone()
        };
        self.resolve(Some(principal.clone()));
        Ok(principal)
    }

    async fn sign_in_with_google(&self) -> Result<Option<Principal>, AuthError> {
        let principal = {
            let state = self.lock();
            state
                .google_account
                .as_ref()
                .and_then(|email| state.accounts.get(email))
                .map(|account| account.principal.clone())
        };
        if let Some(principal) = &principal {
            self.resolve(Some(principal.clone()));
        }
        Ok(principal)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.resolve(None);
        Ok(())
    }
}
