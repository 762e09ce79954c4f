//! Identity backend seam: sessions, auth notifications, and profile rows.
//!
//! DESIGN
//! ======
//! The hosted backend-as-a-service is an external collaborator. Everything
//! the auth core needs from it is expressed by [`IdentityBackend`], so the
//! facade can run against the REST client in production and against
//! [`memory::InMemoryBackend`] (or a test mock) everywhere else.
//!
//! ERROR HANDLING
//! ==============
//! Backends report failures as [`BackendError`]. Nothing in this module
//! panics; callers decide whether an error degrades to "signed out" or is
//! surfaced to the user.

pub mod events;
pub mod memory;
pub mod rest;
pub mod store;

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::profile::{ProfileRow, ProfileUpdate};
pub use events::{AuthBroadcaster, AuthSubscription};

/// Seconds before expiry at which a stored session is considered stale.
pub const SESSION_EXPIRY_MARGIN_SECS: i64 = 60;

// =============================================================================
// ERROR
// =============================================================================

/// Errors produced by identity backend operations.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The HTTP request could not be sent or the connection failed.
    #[error("backend request failed: {0}")]
    Request(String),

    /// The backend returned a non-success HTTP status.
    #[error("backend responded with status {status}: {message}")]
    Response { status: u16, message: String },

    /// A response body could not be deserialized.
    #[error("backend response parse failed: {0}")]
    Parse(String),

    /// A profile row was present but did not have the expected shape.
    #[error("malformed profile row: {0}")]
    MalformedRow(String),

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),

    /// The operation needs a signed-in session and there is none.
    #[error("no active session")]
    NoSession,

    /// The local session store could not be read or written.
    #[error("session store error: {0}")]
    SessionStore(String),
}

impl ErrorCode for BackendError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Request(_) => "E_BACKEND_REQUEST",
            Self::Response { .. } => "E_BACKEND_RESPONSE",
            Self::Parse(_) => "E_BACKEND_PARSE",
            Self::MalformedRow(_) => "E_MALFORMED_ROW",
            Self::HttpClientBuild(_) => "E_HTTP_CLIENT_BUILD",
            Self::NoSession => "E_NO_SESSION",
            Self::SessionStore(_) => "E_SESSION_STORE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Request(_) | Self::Response { status: 429 | 500..=599, .. })
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// Backend-issued proof of authentication for one user.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Bearer token sent with authenticated requests.
    pub access_token: String,
    /// Token exchanged for a fresh session once this one expires.
    pub refresh_token: String,
    /// Expiry in seconds since the Unix epoch.
    pub expires_at: i64,
    /// Identifier of the authenticated user.
    pub user_id: String,
    /// Email claim from the identity provider, if any.
    #[serde(default)]
    pub email: Option<String>,
}

impl Session {
    /// Whether the session expires within [`SESSION_EXPIRY_MARGIN_SECS`] of `now`.
    #[must_use]
    pub fn is_expired_at(&self, now_unix: i64) -> bool {
        self.expires_at - SESSION_EXPIRY_MARGIN_SECS <= now_unix
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"[redacted]")
            .field("refresh_token", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .finish()
    }
}

// =============================================================================
// AUTH EVENTS
// =============================================================================

/// Kind of authentication state change reported by the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEvent {
    /// Current state at subscription time. Always the first event.
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
}

impl AuthEvent {
    /// Whether a notification of this kind should re-read the profile row
    /// when the session user has not changed.
    #[must_use]
    pub fn reloads_profile(self) -> bool {
        !matches!(self, Self::TokenRefreshed | Self::SignedOut)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InitialSession => "INITIAL_SESSION",
            Self::SignedIn => "SIGNED_IN",
            Self::SignedOut => "SIGNED_OUT",
            Self::TokenRefreshed => "TOKEN_REFRESHED",
            Self::UserUpdated => "USER_UPDATED",
            Self::PasswordRecovery => "PASSWORD_RECOVERY",
        }
    }
}

impl std::fmt::Display for AuthEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `(event, session)` notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthChange {
    pub event: AuthEvent,
    pub session: Option<Session>,
}

// =============================================================================
// BACKEND TRAIT
// =============================================================================

/// Authentication plus single-table profile storage.
#[async_trait::async_trait]
pub trait IdentityBackend: Send + Sync {
    /// Return the persisted session, refreshing it first if it has expired.
    async fn get_current_session(&self) -> Result<Option<Session>, BackendError>;

    /// Subscribe to auth state changes. The first notification is always
    /// [`AuthEvent::InitialSession`]; dropping the handle unsubscribes.
    fn on_auth_state_change(&self) -> AuthSubscription;

    /// Send a passwordless sign-in link to `email`.
    async fn sign_in_with_email_link(&self, email: &str) -> Result<(), BackendError>;

    /// Invalidate the current session.
    async fn sign_out(&self) -> Result<(), BackendError>;

    /// Fetch the profile row for `user_id`; `Ok(None)` when no row exists.
    async fn fetch_profile_row(&self, user_id: &str) -> Result<Option<ProfileRow>, BackendError>;

    /// Apply a partial update to the profile row for `user_id`.
    async fn update_profile_row(&self, user_id: &str, update: &ProfileUpdate) -> Result<(), BackendError>;

    /// Email a password-reset link that lands on `redirect_url`.
    async fn request_password_reset(&self, email: &str, redirect_url: &str) -> Result<(), BackendError>;

    /// Set a new password for the signed-in user.
    async fn set_new_password(&self, new_password: &str) -> Result<(), BackendError>;
}

/// Current wall-clock time as unix seconds.
#[must_use]
pub fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}
