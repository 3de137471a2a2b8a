use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Editor,
    Admin,
}

/// Credentials handed to the exchange controller at construction.
pub trait SessionProvider: Send + Sync {
    /// Token for the `Authorization: Bearer` header, if a live session exists.
    fn bearer_token(&self) -> Option<String>;

    fn role(&self) -> Option<Role>;

    /// Gate for settings and registration screens.
    fn is_admin(&self) -> bool {
        self.role() == Some(Role::Admin)
    }

    /// Drops stored credentials after the backend rejected them.
    fn invalidate(&self);
}

/// Signed-in user as issued by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub email: String,
    pub role: Role,
    pub access_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionState {
    pub fn is_expired(&self) -> bool {
        matches!(self.expires_at, Some(exp) if Utc::now() >= exp)
    }
}

/// In-memory session holder shared between the UI and the controller.
#[derive(Clone, Default)]
pub struct SessionStore {
    current: Arc<RwLock<Option<SessionState>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A session carrying only a token, as used by headless clients.
    pub fn with_token(token: impl Into<String>) -> Self {
        let store = Self::new();
        store.sign_in("", Role::User, token, None);
        store
    }

    pub fn sign_in(
        &self,
        email: impl Into<String>,
        role: Role,
        access_token: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
    ) {
        *self.current.write() = Some(SessionState {
            email: email.into(),
            role,
            access_token: access_token.into(),
            expires_at,
        });
    }

    pub fn sign_out(&self) {
        self.current.write().take();
    }

    pub fn current(&self) -> Option<SessionState> {
        self.current.read().clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.current.read().is_some()
    }
}

impl SessionProvider for SessionStore {
    fn bearer_token(&self) -> Option<String> {
        self.current
            .read()
            .as_ref()
            .filter(|state| !state.is_expired())
            .map(|state| state.access_token.clone())
    }

    fn role(&self) -> Option<Role> {
        self.current.read().as_ref().map(|state| state.role)
    }

    fn invalidate(&self) {
        self.sign_out();
    }
}
