//! In-process identity backend for offline demos and integration tests.
//!
//! Sign-in links are recorded instead of emailed; [`InMemoryBackend::complete_email_link`]
//! plays the part of the user clicking one.

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use time::OffsetDateTime;
use uuid::Uuid;

use super::{AuthBroadcaster, AuthEvent, AuthSubscription, BackendError, IdentityBackend, Session, now_unix};
use crate::profile::{ProfileRow, ProfileUpdate, Role};
use crate::validate::normalize_email;

const SESSION_TTL_SECS: i64 = 3_600;

#[derive(Default)]
struct Tables {
    /// email -> user id
    accounts: HashMap<String, String>,
    profiles: HashMap<String, ProfileRow>,
    pending_links: HashSet<String>,
    password_resets: Vec<(String, String)>,
    passwords: HashMap<String, String>,
    session: Option<Session>,
}

#[derive(Default)]
pub struct InMemoryBackend {
    tables: Mutex<Tables>,
    events: AuthBroadcaster,
}

impl InMemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend pre-loaded with a few demo accounts, all with profiles.
    #[must_use]
    pub fn with_demo_profiles() -> Self {
        let backend = Self::new();
        for (email, name, role, country, city, occupation) in [
            ("ana@example.com", "Ana Quispe", Role::Student, "PE", "Lisbon", "Architecture student"),
            ("lars@example.com", "Lars Berg", Role::Professional, "NO", "Berlin", "Backend engineer"),
            ("mei@example.com", "Mei Tanaka", Role::DigitalNomad, "JP", "Lisbon", "Illustrator"),
        ] {
            let user_id = backend.register(email);
            backend.insert_profile(ProfileRow {
                id: user_id,
                name: name.to_owned(),
                email: Some(email.to_owned()),
                role,
                country: Some(country.to_owned()),
                city: Some(city.to_owned()),
                occupation: Some(occupation.to_owned()),
                bio: None,
                interests: Some(vec!["food".to_owned(), "language exchange".to_owned()]),
                profile_image_url: None,
                is_verified: false,
                created_at: OffsetDateTime::now_utc(),
                updated_at: None,
            });
        }
        backend
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create (or look up) the account for `email`, returning its user id.
    pub fn register(&self, email: &str) -> String {
        let email = normalize_email(email).unwrap_or_else(|| email.to_owned());
        self.tables()
            .accounts
            .entry(email)
            .or_insert_with(|| Uuid::new_v4().to_string())
            .clone()
    }

    pub fn insert_profile(&self, row: ProfileRow) {
        self.tables().profiles.insert(row.id.clone(), row);
    }

    #[must_use]
    pub fn profile_row(&self, user_id: &str) -> Option<ProfileRow> {
        self.tables().profiles.get(user_id).cloned()
    }

    #[must_use]
    pub fn has_pending_link(&self, email: &str) -> bool {
        normalize_email(email).is_some_and(|e| self.tables().pending_links.contains(&e))
    }

    /// `(email, redirect_url)` pairs for every reset requested so far.
    #[must_use]
    pub fn password_resets(&self) -> Vec<(String, String)> {
        self.tables().password_resets.clone()
    }

    #[must_use]
    pub fn password_for(&self, user_id: &str) -> Option<String> {
        self.tables().passwords.get(user_id).cloned()
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.events.listener_count()
    }

    /// Simulate the user opening a sign-in link: issue a session and emit
    /// `SIGNED_IN`.
    pub fn complete_email_link(&self, email: &str) -> Result<Session, BackendError> {
        let email = normalize_email(email).ok_or_else(|| BackendError::Response {
            status: 400,
            message: "invalid email".into(),
        })?;
        let session = {
            let mut tables = self.tables();
            if !tables.pending_links.remove(&email) {
                return Err(BackendError::Response { status: 403, message: "link expired or already used".into() });
            }
            let user_id = tables
                .accounts
                .entry(email.clone())
                .or_insert_with(|| Uuid::new_v4().to_string())
                .clone();
            let session = issue_session(user_id, email);
            tables.session = Some(session.clone());
            session
        };
        self.events.emit(AuthEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    /// Replace the current session with a fresh token for the same user and
    /// emit `TOKEN_REFRESHED`.
    pub fn refresh_session(&self) -> Result<Session, BackendError> {
        let session = {
            let mut tables = self.tables();
            let current = tables.session.clone().ok_or(BackendError::NoSession)?;
            let fresh = issue_session(current.user_id, current.email.unwrap_or_default());
            tables.session = Some(fresh.clone());
            fresh
        };
        self.events.emit(AuthEvent::TokenRefreshed, Some(session.clone()));
        Ok(session)
    }
}

fn issue_session(user_id: String, email: String) -> Session {
    Session {
        access_token: Uuid::new_v4().simple().to_string(),
        refresh_token: Uuid::new_v4().simple().to_string(),
        expires_at: now_unix() + SESSION_TTL_SECS,
        user_id,
        email: Some(email),
    }
}

#[async_trait::async_trait]
impl IdentityBackend for InMemoryBackend {
    async fn get_current_session(&self) -> Result<Option<Session>, BackendError> {
        Ok(self.tables().session.clone())
    }

    fn on_auth_state_change(&self) -> AuthSubscription {
        let current = self.tables().session.clone();
        self.events.subscribe(current)
    }

    async fn sign_in_with_email_link(&self, email: &str) -> Result<(), BackendError> {
        let email = normalize_email(email).ok_or_else(|| BackendError::Response {
            status: 400,
            message: "invalid email".into(),
        })?;
        tracing::info!(%email, "sign-in link issued");
        self.tables().pending_links.insert(email);
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        self.tables().session = None;
        self.events.emit(AuthEvent::SignedOut, None);
        Ok(())
    }

    async fn fetch_profile_row(&self, user_id: &str) -> Result<Option<ProfileRow>, BackendError> {
        Ok(self.profile_row(user_id))
    }

    async fn update_profile_row(&self, user_id: &str, update: &ProfileUpdate) -> Result<(), BackendError> {
        let mut tables = self.tables();
        if tables.session.as_ref().is_none_or(|s| s.user_id != user_id) {
            return Err(BackendError::Response { status: 403, message: "row-level security violation".into() });
        }
        // Like a filtered PATCH, no matching row is a successful no-op.
        if let Some(row) = tables.profiles.get_mut(user_id) {
            row.apply(update);
        }
        Ok(())
    }

    async fn request_password_reset(&self, email: &str, redirect_url: &str) -> Result<(), BackendError> {
        self.tables()
            .password_resets
            .push((email.to_owned(), redirect_url.to_owned()));
        Ok(())
    }

    async fn set_new_password(&self, new_password: &str) -> Result<(), BackendError> {
        let session = {
            let mut tables = self.tables();
            let session = tables.session.clone().ok_or(BackendError::NoSession)?;
            tables
                .passwords
                .insert(session.user_id.clone(), new_password.to_owned());
            session
        };
        self.events.emit(AuthEvent::UserUpdated, Some(session));
        Ok(())
    }
}
