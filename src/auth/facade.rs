//! Auth facade: single source of truth for [`AuthViewState`].
//!
//! STATE MACHINE
//! =============
//! `Initializing -> {Unauthenticated, Authenticated}`. Construction subscribes
//! to backend changes and, concurrently, restores any persisted session.
//! `is_loading` is cleared once: after the first profile resolution (found,
//! missing, or failed) or once the restore has finished, the subscription has
//! reported, and neither produced a session.
//!
//! CONCURRENCY
//! ===========
//! Restore and `INITIAL_SESSION` race at startup and may both load the same
//! profile. Loads for one session share an epoch and the same row mapping, so
//! whichever completes last writes an identical profile. Sign-out and
//! switching users bump the epoch; a load that finishes under an older epoch
//! is discarded instead of resurrecting a stale user. The restore itself is
//! held to the same rule: a session restored after the epoch moved is dropped.
//!
//! Profile loads started by notifications run in a `JoinSet` owned by the
//! listener task. Dropping the facade aborts that task, which drops the
//! subscription and every in-flight load with it.

#[cfg(test)]
#[path = "facade_test.rs"]
mod tests;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use super::loader::{ProfileLoad, ProfileLoader};
use super::session::{SessionEvents, SessionTracker};
use super::view::AuthViewState;
use super::AuthError;
use crate::backend::{AuthChange, AuthEvent, IdentityBackend, Session};
use crate::config::{AuthOptions, UpdatePolicy};
use crate::profile::{ProfilePatch, ProfileUpdate, UserProfile};
use crate::validate::{ValidationError, is_filled, require_email, validate_new_password};

// =============================================================================
// SYNC STATE
// =============================================================================

#[derive(Default)]
struct SyncState {
    /// User id of the session the current epoch belongs to.
    session_user: Option<String>,
    /// Email claim of that session.
    email: Option<String>,
    epoch: u64,
    user: Option<UserProfile>,
    loading: bool,
    /// The subscription has delivered its first change, or closed.
    initial_seen: bool,
    /// The startup restore has finished, whether or not its result was used.
    restored: bool,
}

struct Shared {
    backend: Arc<dyn IdentityBackend>,
    tracker: SessionTracker,
    loader: ProfileLoader,
    options: AuthOptions,
    state: Mutex<SyncState>,
    view: watch::Sender<AuthViewState>,
}

/// Ticket for one profile load: which user, under which epoch.
struct LoadTicket {
    user_id: String,
    email: Option<String>,
    epoch: u64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &SyncState) {
        self.view.send_replace(AuthViewState::new(state.user.clone(), state.loading));
    }

    /// Record a signed-in session and decide whether its profile needs loading.
    fn observe_session(&self, state: &mut SyncState, event: AuthEvent, session: &Session) -> Option<LoadTicket> {
        let same_user = state.session_user.as_deref() == Some(session.user_id.as_str());
        if !same_user {
            state.epoch += 1;
            state.session_user = Some(session.user_id.clone());
            if state.user.as_ref().is_some_and(|u| u.id != session.user_id) {
                state.user = None;
            }
            info!(user_id = %session.user_id, %event, "session user changed");
        }
        state.email.clone_from(&session.email);

        let ticket = (!same_user || event.reloads_profile()).then(|| LoadTicket {
            user_id: session.user_id.clone(),
            email: session.email.clone(),
            epoch: state.epoch,
        });
        self.publish(state);
        ticket
    }

    /// Clear everything tied to the previous session.
    fn clear_session(&self, state: &mut SyncState) {
        state.epoch += 1;
        state.session_user = None;
        state.email = None;
        if let Some(user) = state.user.take() {
            info!(user_id = %user.id, "signed out");
        }
        state.loading = false;
        self.publish(state);
    }

    /// Stop loading when startup has nothing left to resolve. A session seen
    /// by either side has a load in flight, and that load settles instead.
    fn settle_if_idle(&self, state: &mut SyncState) {
        if state.loading && state.restored && state.initial_seen && state.session_user.is_none() {
            state.loading = false;
            self.publish(state);
        }
    }

    async fn load(&self, ticket: LoadTicket) {
        let outcome = self.loader.load_profile(&ticket.user_id, ticket.email.as_deref()).await;
        self.apply_profile(&ticket, outcome);
    }

    fn apply_profile(&self, ticket: &LoadTicket, outcome: ProfileLoad) {
        let mut state = self.lock();
        if state.epoch == ticket.epoch {
            match outcome {
                ProfileLoad::Found(profile) => state.user = Some(profile),
                ProfileLoad::Missing => state.user = None,
                // Keep a cached profile through a failed refresh; with nothing
                // cached the view stays signed out.
                ProfileLoad::Failed(_) => {}
            }
            state.loading = false;
            self.publish(&state);
        } else {
            // Whatever moved the epoch either settled loading or started a
            // load of its own.
            debug!(user_id = %ticket.user_id, epoch = ticket.epoch, current = state.epoch, "discarding stale profile result");
        }
    }

    fn handle_change(&self, change: AuthChange) -> Option<LoadTicket> {
        debug!(event = %change.event, "auth change received");
        let mut state = self.lock();
        state.initial_seen = true;
        match (change.event, change.session) {
            (AuthEvent::SignedOut, _) | (_, None) => {
                self.clear_session(&mut state);
                None
            }
            (event, Some(session)) => self.observe_session(&mut state, event, &session),
        }
    }
}

// =============================================================================
// FACADE
// =============================================================================

/// Owned auth state container handed to the UI tree root.
pub struct AuthFacade {
    shared: Arc<Shared>,
    listener: JoinHandle<()>,
    restore: JoinHandle<()>,
}

impl AuthFacade {
    /// Start with default options. Must be called inside a tokio runtime.
    #[must_use]
    pub fn start(backend: Arc<dyn IdentityBackend>) -> Self {
        Self::start_with(backend, AuthOptions::default())
    }

    /// Subscribe to the backend, then restore the persisted session; both
    /// proceed concurrently.
    #[must_use]
    pub fn start_with(backend: Arc<dyn IdentityBackend>, options: AuthOptions) -> Self {
        let tracker = SessionTracker::new(Arc::clone(&backend));
        let events = tracker.subscribe();
        let (view, _) = watch::channel(AuthViewState::initializing());
        let shared = Arc::new(Shared {
            loader: ProfileLoader::new(Arc::clone(&backend)),
            backend,
            tracker,
            options,
            state: Mutex::new(SyncState { loading: true, ..SyncState::default() }),
            view,
        });

        let listener = tokio::spawn(run_listener(Arc::clone(&shared), events));
        let restore = tokio::spawn(run_restore(Arc::clone(&shared)));
        Self { shared, listener, restore }
    }

    /// Current view snapshot.
    #[must_use]
    pub fn view(&self) -> AuthViewState {
        self.shared.view.borrow().clone()
    }

    /// Receiver that observes every view change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<AuthViewState> {
        self.shared.view.subscribe()
    }

    /// Wait for initialization to finish and return the settled view.
    pub async fn wait_until_loaded(&self) -> AuthViewState {
        let mut rx = self.watch();
        match rx.wait_for(|view| !view.is_loading()).await {
            Ok(view) => view.clone(),
            Err(_) => self.view(),
        }
    }

    /// The session last reported by the backend, if any.
    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.shared.tracker.current()
    }

    /// Request a passwordless sign-in link.
    ///
    /// Does not change auth state; the session arrives later through the
    /// subscription once the link is opened.
    pub async fn login(&self, email: &str) -> Result<(), AuthError> {
        let email = require_email(email)?;
        self.shared.backend.sign_in_with_email_link(&email).await.map_err(|e| {
            warn!(error = %e, "sign-in link request failed");
            AuthError::from(e)
        })?;
        info!(%email, "sign-in link requested");
        Ok(())
    }

    /// Sign out at the backend, then clear local state without waiting for
    /// the `SIGNED_OUT` notification. A later `SIGNED_IN` wins as usual.
    pub async fn logout(&self) -> Result<(), AuthError> {
        self.shared.backend.sign_out().await.map_err(|e| {
            warn!(error = %e, "sign-out failed");
            AuthError::from(e)
        })?;
        self.shared.tracker.clear();
        self.shared.clear_session(&mut self.shared.lock());
        Ok(())
    }

    /// Write `patch` to the current user's profile row.
    ///
    /// With [`UpdatePolicy::TrustLocalWrite`] the caller's fields are merged
    /// into the cached profile once the backend accepts the write; the row is
    /// not read back. With [`UpdatePolicy::RefetchAfterWrite`] it is.
    pub async fn update_profile(&self, patch: ProfilePatch) -> Result<UserProfile, AuthError> {
        if patch.name.as_deref().is_some_and(|name| !is_filled(name)) {
            return Err(ValidationError::BlankField("name").into());
        }
        let ticket = {
            let state = self.shared.lock();
            let Some(user) = state.user.as_ref() else {
                warn!("update_profile called without a current user");
                return Err(AuthError::NoCurrentUser);
            };
            LoadTicket { user_id: user.id.clone(), email: state.email.clone(), epoch: state.epoch }
        };

        let update = ProfileUpdate::stamped(patch);
        self.shared
            .backend
            .update_profile_row(&ticket.user_id, &update)
            .await
            .map_err(|e| {
                warn!(user_id = %ticket.user_id, error = %e, "profile update failed");
                AuthError::from(e)
            })?;

        let refetched = match self.shared.options.update_policy {
            UpdatePolicy::TrustLocalWrite => None,
            UpdatePolicy::RefetchAfterWrite => Some(
                self.shared
                    .loader
                    .load_profile(&ticket.user_id, ticket.email.as_deref())
                    .await,
            ),
        };

        let mut state = self.shared.lock();
        if state.epoch != ticket.epoch {
            warn!(user_id = %ticket.user_id, "session changed during profile update; not applied locally");
            return Err(AuthError::SessionChanged);
        }
        match refetched {
            None => {
                if let Some(user) = state.user.as_mut() {
                    user.merge(&update.patch);
                }
            }
            Some(ProfileLoad::Found(profile)) => state.user = Some(profile),
            // The write landed either way; fall back to the local merge.
            Some(ProfileLoad::Missing) => {
                warn!(user_id = %ticket.user_id, "profile row not found on re-read after update; merging locally");
                if let Some(user) = state.user.as_mut() {
                    user.merge(&update.patch);
                }
            }
            Some(ProfileLoad::Failed(e)) => {
                warn!(user_id = %ticket.user_id, error = %e, "re-read after update failed; merging locally");
                if let Some(user) = state.user.as_mut() {
                    user.merge(&update.patch);
                }
            }
        }
        self.shared.publish(&state);
        info!(user_id = %ticket.user_id, "profile updated");
        state.user.clone().ok_or(AuthError::NoCurrentUser)
    }

    /// Email a password-reset link that lands on `redirect_url`.
    pub async fn request_password_reset(&self, email: &str, redirect_url: &str) -> Result<(), AuthError> {
        let email = require_email(email)?;
        self.shared
            .backend
            .request_password_reset(&email, redirect_url)
            .await
            .map_err(|e| {
                warn!(error = %e, "password reset request failed");
                AuthError::from(e)
            })
    }

    /// Set a new password for the signed-in account.
    pub async fn set_new_password(&self, new_password: &str) -> Result<(), AuthError> {
        validate_new_password(new_password)?;
        self.shared
            .backend
            .set_new_password(new_password)
            .await
            .map_err(|e| {
                warn!(error = %e, "setting new password failed");
                AuthError::from(e)
            })
    }
}

impl Drop for AuthFacade {
    fn drop(&mut self) {
        self.restore.abort();
        self.listener.abort();
    }
}

// =============================================================================
// TASKS
// =============================================================================

async fn run_restore(shared: Arc<Shared>) {
    let started = shared.lock().epoch;
    let restored = shared.tracker.restore_session().await;
    let ticket = {
        let mut state = shared.lock();
        state.restored = true;
        let ticket = match restored {
            Some(session) if state.epoch == started => {
                shared.observe_session(&mut state, AuthEvent::InitialSession, &session)
            }
            Some(session) => {
                debug!(user_id = %session.user_id, "auth state changed during restore; dropping restored session");
                None
            }
            None => None,
        };
        shared.settle_if_idle(&mut state);
        ticket
    };
    if let Some(ticket) = ticket {
        shared.load(ticket).await;
    }
}

async fn run_listener(shared: Arc<Shared>, mut events: SessionEvents) {
    let mut loads = JoinSet::new();
    loop {
        tokio::select! {
            change = events.next() => {
                let Some(change) = change else {
                    debug!("auth subscription closed");
                    let mut state = shared.lock();
                    state.initial_seen = true;
                    shared.settle_if_idle(&mut state);
                    break;
                };
                if let Some(ticket) = shared.handle_change(change) {
                    let shared = Arc::clone(&shared);
                    loads.spawn(async move { shared.load(ticket).await });
                }
            }
            Some(_) = loads.join_next(), if !loads.is_empty() => {}
        }
    }
    while loads.join_next().await.is_some() {}
}
