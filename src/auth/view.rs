//! Auth view state consumed by route guards and user-aware components.

#[cfg(test)]
#[path = "view_test.rs"]
mod tests;

use serde::Serialize;

use crate::profile::UserProfile;

/// Derived `{user, is_authenticated, is_loading}` snapshot.
///
/// Only constructible from `(user, is_loading)`, so `is_authenticated` can
/// never disagree with `user`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AuthViewState {
    user: Option<UserProfile>,
    is_authenticated: bool,
    is_loading: bool,
}

impl AuthViewState {
    #[must_use]
    pub fn new(user: Option<UserProfile>, is_loading: bool) -> Self {
        let is_authenticated = user.is_some();
        Self { user, is_authenticated, is_loading }
    }

    /// State before the initial session restore has finished.
    #[must_use]
    pub fn initializing() -> Self {
        Self::new(None, true)
    }

    #[must_use]
    pub fn user(&self) -> Option<&UserProfile> {
        self.user.as_ref()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.is_loading
    }
}

impl Default for AuthViewState {
    fn default() -> Self {
        Self::initializing()
    }
}

/// Whether an auth-guarded route should send the visitor to the login page.
#[must_use]
pub fn should_redirect_unauth(state: &AuthViewState) -> bool {
    !state.is_loading() && state.user().is_none()
}
