//! Client-side auth core: session tracking, profile loading, and the facade
//! the UI tree reads from.
//!
//! SYSTEM CONTEXT
//! ==============
//! Route guards and user-aware components only ever see [`AuthViewState`]
//! and the operations on [`AuthFacade`]. The facade owns the one backend
//! subscription; everything else is derived from it.
//!
//! ERROR HANDLING
//! ==============
//! Every failure is returned as an [`AuthError`] with a user-facing message.
//! Session restore and profile loads never fail outward; they degrade to the
//! signed-out view and are logged.

pub mod facade;
pub mod loader;
pub mod session;
pub mod view;

#[cfg(test)]
#[path = "mock_backend_test.rs"]
pub(crate) mod mock_backend;

pub use facade::AuthFacade;
pub use loader::{ProfileLoad, ProfileLoader};
pub use session::{SessionEvents, SessionTracker};
pub use view::{AuthViewState, should_redirect_unauth};

use crate::backend::BackendError;
use crate::error::ErrorCode;
use crate::validate::ValidationError;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// An operation that needs a signed-in user ran without one.
    #[error("no current user")]
    NoCurrentUser,

    /// The signed-in user changed while the operation was in flight.
    #[error("session changed during the operation")]
    SessionChanged,

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl AuthError {
    /// Text suitable for an inline notification.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(e) => capitalize(&e.to_string()),
            Self::NoCurrentUser => "Please sign in first.".to_owned(),
            Self::SessionChanged => "You were signed out before the change finished. Please try again.".to_owned(),
            Self::Backend(BackendError::Response { status: 429, .. }) => {
                "Too many attempts. Wait a moment and try again.".to_owned()
            }
            Self::Backend(BackendError::Response { message, .. }) if !message.is_empty() => capitalize(message),
            Self::Backend(e) if e.retryable() => "Could not reach the server. Please try again.".to_owned(),
            Self::Backend(_) => "Something went wrong. Please try again.".to_owned(),
        }
    }
}

impl ErrorCode for AuthError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(e) => e.error_code(),
            Self::NoCurrentUser => "E_NO_CURRENT_USER",
            Self::SessionChanged => "E_SESSION_CHANGED",
            Self::Backend(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Backend(e) => e.retryable(),
            Self::SessionChanged => true,
            Self::Validation(_) | Self::NoCurrentUser => false,
        }
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
