use std::sync::{Arc, RwLock};

use futures::future::{self, BoxFuture};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::{
    session::{SharedStore, USER_KEY},
    utils::prefixed_id,
};

/// The authenticated end-user record. Its `id` is a local token generated per
/// login/signup and does not refer to any backend record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Observable session state. `Loading` lasts until the persistent store has
/// been read once, so consumers never mistake startup for a signed-out user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Loading,
    Unauthenticated,
    Authenticated(Identity),
}

impl AuthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthState::Loading => "loading",
            AuthState::Unauthenticated => "unauthenticated",
            AuthState::Authenticated(_) => "authenticated",
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            AuthState::Authenticated(identity) => Some(identity),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthErrorKind {
    /// Required form fields were blank.
    MissingFields,
    /// The credential backend could not be reached.
    Transport,
    /// The session could not be written.
    Storage,
}

#[derive(Debug, Clone)]
pub struct AuthError {
    pub kind: AuthErrorKind,
    detail: String,
}

impl AuthError {
    pub fn new(kind: AuthErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn reason(&self) -> &'static str {
        match self.kind {
            AuthErrorKind::MissingFields => "missing_fields",
            AuthErrorKind::Transport => "transport",
            AuthErrorKind::Storage => "storage",
        }
    }

    pub fn message(&self) -> String {
        match self.kind {
            AuthErrorKind::MissingFields => "Please fill in all fields".to_string(),
            AuthErrorKind::Transport => "Something went wrong. Please try again.".to_string(),
            AuthErrorKind::Storage => "Unable to save your session. Please try again.".to_string(),
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.reason(), self.detail)
    }
}

impl std::error::Error for AuthError {}

/// Credential backend seam. The bundled implementation is a stub: it accepts
/// any password and is not a security boundary.
pub trait AuthBackend: Send + Sync {
    fn login(&self, email: &str, password: &str) -> BoxFuture<'static, Result<Identity, AuthError>>;

    fn signup(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> BoxFuture<'static, Result<Identity, AuthError>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MockAuthBackend;

impl AuthBackend for MockAuthBackend {
    fn login(&self, email: &str, _password: &str) -> BoxFuture<'static, Result<Identity, AuthError>> {
        let identity = Identity {
            id: prefixed_id("user"),
            email: email.to_string(),
            name: None,
        };
        Box::pin(future::ready(Ok(identity)))
    }

    fn signup(
        &self,
        email: &str,
        _password: &str,
        name: &str,
    ) -> BoxFuture<'static, Result<Identity, AuthError>> {
        let identity = Identity {
            id: prefixed_id("user"),
            email: email.to_string(),
            name: Some(name.to_string()),
        };
        Box::pin(future::ready(Ok(identity)))
    }
}

/// Owns the persistent end-user session. It is the only writer of
/// [`USER_KEY`].
pub struct AuthCore {
    store: SharedStore,
    backend: Arc<dyn AuthBackend>,
    state: RwLock<AuthState>,
}

impl AuthCore {
    /// Creates the core in the `Loading` state. Call [`AuthCore::rehydrate`]
    /// before serving any route.
    pub fn new(store: SharedStore, backend: Arc<dyn AuthBackend>) -> Self {
        Self {
            store,
            backend,
            state: RwLock::new(AuthState::Loading),
        }
    }

    /// Convenience constructor that rehydrates immediately.
    pub fn open(store: SharedStore, backend: Arc<dyn AuthBackend>) -> Self {
        let core = Self::new(store, backend);
        core.rehydrate();
        core
    }

    /// Synchronously restores the session from the persistent store.
    pub fn rehydrate(&self) -> AuthState {
        let restored = match self.store.get(USER_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<Identity>(&raw) {
                Ok(identity) => {
                    info!(user_id = %identity.id, "restored session");
                    AuthState::Authenticated(identity)
                }
                Err(err) => {
                    warn!(?err, "stored session is unreadable, discarding it");
                    if let Err(err) = self.store.clear(USER_KEY) {
                        error!(?err, "failed to discard unreadable session");
                    }
                    AuthState::Unauthenticated
                }
            },
            Ok(None) => AuthState::Unauthenticated,
            Err(err) => {
                error!(?err, "failed to read session store");
                AuthState::Unauthenticated
            }
        };

        self.replace_state(restored.clone());
        restored
    }

    pub fn state(&self) -> AuthState {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.state().identity().cloned()
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.state(), AuthState::Loading)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(AuthError::new(
                AuthErrorKind::MissingFields,
                "email and password are required",
            ));
        }

        let identity = self.backend.login(email, password).await?;
        self.establish(identity)
    }

    pub async fn signup(
        &self,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<Identity, AuthError> {
        let email = email.trim();
        let name = name.trim();
        if email.is_empty() || password.is_empty() || name.is_empty() {
            return Err(AuthError::new(
                AuthErrorKind::MissingFields,
                "name, email and password are required",
            ));
        }

        let identity = self.backend.signup(email, password, name).await?;
        self.establish(identity)
    }

    /// Clears the session. Calling it while signed out is a no-op. If the
    /// persisted copy cannot be removed the in-memory session is kept too.
    pub fn logout(&self) -> Result<(), AuthError> {
        self.store
            .clear(USER_KEY)
            .map_err(|err| AuthError::new(AuthErrorKind::Storage, err.message()))?;

        let previous = self.replace_state(AuthState::Unauthenticated);
        if let AuthState::Authenticated(identity) = previous {
            info!(user_id = %identity.id, "logged out");
        }
        Ok(())
    }

    fn establish(&self, identity: Identity) -> Result<Identity, AuthError> {
        let encoded = serde_json::to_string(&identity)
            .map_err(|err| AuthError::new(AuthErrorKind::Storage, err.to_string()))?;
        self.store
            .set(USER_KEY, &encoded)
            .map_err(|err| AuthError::new(AuthErrorKind::Storage, err.message()))?;

        info!(user_id = %identity.id, "session established");
        self.replace_state(AuthState::Authenticated(identity.clone()));
        Ok(identity)
    }

    fn replace_state(&self, next: AuthState) -> AuthState {
        let mut guard = self
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *guard, next)
    }
}
