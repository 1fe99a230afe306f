//! Sign-in controller for the login form.
//!
//! Successful sign-ins do not touch any view directly. The provider publishes
//! the new identity and the session store forwards it.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::auth::{AuthError, AuthProvider};
use crate::model::Principal;
use crate::notify::NotificationSink;
use crate::validation::{FormValues, ValidationErrors, login_schema};

pub const PROGRESS_MESSAGE: &str = "Please wait a moment...";
pub const SUCCESS_MESSAGE: &str = "Sign in Successful";
pub const NOT_REGISTERED_MESSAGE: &str = "Not registered yet! Please register first.";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoginError {
    #[error("{0}")]
    Invalid(ValidationErrors),

    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Federated sign-in succeeded but no account is registered for it
    #[error("Not registered yet! Please register first.")]
    NotRegistered,
}

pub struct LoginController {
    provider: Arc<dyn AuthProvider>,
    notifier: Arc<dyn NotificationSink>,
}

impl LoginController {
    pub fn new(provider: Arc<dyn AuthProvider>, notifier: Arc<dyn NotificationSink>) -> Self {
        Self { provider, notifier }
    }

    /// Email/password sign-in from raw form input.
    pub async fn sign_in(&self, form: &FormValues) -> Result<Principal, LoginError> {
        login_schema().validate(form).map_err(LoginError::Invalid)?;

        let email = form
            .get("email")
            .map(|e| e.trim().to_lowercase())
            .unwrap_or_default();
        let password = form.get("password").map(String::as_str).unwrap_or_default();

        self.notifier.info(PROGRESS_MESSAGE);
        debug!("Signing in {}", email);
        let result = self.provider.sign_in(&email, password).await;
        self.finish(result.map(Some))
    }

    pub async fn sign_in_with_google(&self) -> Result<Principal, LoginError> {
        self.notifier.info(PROGRESS_MESSAGE);
        let result = self.provider.sign_in_with_google().await;
        self.finish(result)
    }

    fn finish(&self, result: Result<Option<Principal>, AuthError>) -> Result<Principal, LoginError> {
        match result {
            Ok(Some(principal)) => {
                self.notifier.success(SUCCESS_MESSAGE);
                Ok(principal)
            }
            Ok(None) => {
                self.notifier.error(NOT_REGISTERED_MESSAGE);
                Err(LoginError::NotRegistered)
            }
            Err(error) => {
                warn!("Sign in failed: {}", error.code());
                self.notifier.error(&error.user_message());
                Err(error.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::InMemoryAuthProvider;
    use crate::events::EventBus;
    use crate::notify::{Notification, NotificationKind};
    use std::sync::Mutex;

    fn setup() -> (
        InMemoryAuthProvider,
        LoginController,
        Arc<Mutex<Vec<Notification>>>,
        crate::events::Subscription<Notification>,
    ) {
        let provider = InMemoryAuthProvider::new();
        provider.add_account(Principal::new("u1", "a@x.edu"), "abc12345!");
        let bus = Arc::new(EventBus::<Notification>::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let sub = bus.subscribe(move |n: &Notification| seen_clone.lock().unwrap().push(n.clone()));
        let controller = LoginController::new(Arc::new(provider.clone()), bus);
        (provider, controller, seen, sub)
    }

    fn form(email: &str, password: &str) -> FormValues {
        [("email", email), ("password", password)]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_sign_in_lowercases_email() {
        let (_provider, controller, seen, _sub) = setup();

        let principal = controller.sign_in(&form("A@X.EDU", "abc12345!")).await.unwrap();

        assert_eq!(principal.email, "a@x.edu");
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].message, PROGRESS_MESSAGE);
        assert_eq!(seen[1].kind, NotificationKind::Success);
        assert_eq!(seen[1].message, SUCCESS_MESSAGE);
    }

    #[tokio::test]
    async fn test_invalid_form_never_reaches_provider() {
        let (_provider, controller, seen, _sub) = setup();

        let err = controller.sign_in(&form("not-an-email", "short")).await.unwrap_err();

        let LoginError::Invalid(errors) = err else {
            panic!("expected validation errors");
        };
        assert_eq!(errors.get("email"), Some("Invalid email address"));
        assert!(errors.get("password").is_some());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_password_reports_provider_message() {
        let (_provider, controller, seen, _sub) = setup();

        let err = controller.sign_in(&form("a@x.edu", "xyz98765!")).await.unwrap_err();

        assert_eq!(err, LoginError::Auth(AuthError::InvalidCredential));
        assert_eq!(
            seen.lock().unwrap().last().map(|n| n.message.clone()),
            Some("Invalid credential".to_string())
        );
    }

    #[tokio::test]
    async fn test_google_sign_in_without_account() {
        let (provider, controller, seen, _sub) = setup();
        provider.set_google_account(None);

        let err = controller.sign_in_with_google().await.unwrap_err();

        assert_eq!(err, LoginError::NotRegistered);
        assert_eq!(
            seen.lock().unwrap().last().map(|n| n.message.clone()),
            Some(NOT_REGISTERED_MESSAGE.to_string())
        );
    }

    #[tokio::test]
    async fn test_google_sign_in_with_registered_account() {
        let (provider, controller, _seen, _sub) = setup();
        provider.set_google_account(Some("a@x.edu"));

        let principal = controller.sign_in_with_google().await.unwrap();

        assert_eq!(principal.email, "a@x.edu");
    }
}
