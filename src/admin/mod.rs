mod guard;

pub use guard::{GuardOutcome, RouteGuard};

use tracing::{error, info, warn};

use crate::session::{ADMIN_KEY, SharedStore, StoreError};

/// Demo administrator username.
pub const ADMIN_USERNAME: &str = "admin";
/// Demo administrator password.
pub const ADMIN_PASSWORD: &str = "admin123";

const FLAG_SET: &str = "true";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminLoginError {
    MissingFields,
    InvalidCredentials,
    Storage(String),
}

impl AdminLoginError {
    pub fn message(&self) -> &str {
        match self {
            AdminLoginError::MissingFields => "Please fill in all fields",
            AdminLoginError::InvalidCredentials => "Invalid credentials",
            AdminLoginError::Storage(_) => "Authentication failed. Please try again.",
        }
    }
}

impl std::fmt::Display for AdminLoginError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdminLoginError::Storage(detail) => write!(f, "{}: {detail}", self.message()),
            other => write!(f, "{}", other.message()),
        }
    }
}

impl std::error::Error for AdminLoginError {}

/// Administrator credential check plus the one-bit ephemeral admin session.
///
/// The flag lives in the ephemeral store and is independent of the end-user
/// identity. This type is the only writer of [`ADMIN_KEY`].
pub struct AdminAuthGate {
    store: SharedStore,
}

impl AdminAuthGate {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Plaintext, non-cryptographic comparison against the fixed demo pair.
    /// It exists as a placeholder; a real deployment must replace it with a
    /// proper credential store and hashed secrets.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        username == ADMIN_USERNAME && password == ADMIN_PASSWORD
    }

    pub fn grant(&self) -> Result<(), StoreError> {
        self.store.set(ADMIN_KEY, FLAG_SET)?;
        info!("administrator session granted");
        Ok(())
    }

    /// Clears the flag. Safe to call when no flag is present.
    pub fn revoke(&self) {
        if let Err(err) = self.store.clear(ADMIN_KEY) {
            error!(?err, "failed to clear administrator flag");
            return;
        }
        info!("administrator session revoked");
    }

    pub fn is_granted(&self) -> bool {
        match self.store.get(ADMIN_KEY) {
            Ok(Some(value)) => value == FLAG_SET,
            Ok(None) => false,
            Err(err) => {
                error!(?err, "failed to read administrator flag");
                false
            }
        }
    }

    /// Form-level flow: blank check, credential check, then grant.
    pub fn login(&self, username: &str, password: &str) -> Result<(), AdminLoginError> {
        if username.is_empty() || password.is_empty() {
            return Err(AdminLoginError::MissingFields);
        }

        if !self.verify(username, password) {
            warn!("administrator login rejected");
            return Err(AdminLoginError::InvalidCredentials);
        }

        self.grant()
            .map_err(|err| AdminLoginError::Storage(err.message().to_string()))
    }
}
