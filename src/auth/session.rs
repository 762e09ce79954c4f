//! Session tracker: cached copy of the backend's current session.

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;

use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::backend::{AuthChange, AuthSubscription, IdentityBackend, Session};

#[derive(Default)]
struct Cached {
    session: Option<Session>,
    /// Bumped by every notification and local sign-out.
    changes: u64,
}

type SessionCache = Arc<RwLock<Cached>>;

/// Holds the current session and hands out change subscriptions that keep
/// the cached copy up to date as they are consumed.
pub struct SessionTracker {
    backend: Arc<dyn IdentityBackend>,
    current: SessionCache,
}

impl SessionTracker {
    #[must_use]
    pub fn new(backend: Arc<dyn IdentityBackend>) -> Self {
        Self { backend, current: SessionCache::default() }
    }

    /// Ask the backend for a persisted session.
    ///
    /// Never fails: backend errors are logged and read as "no session". The
    /// result is cached only if no change was recorded while the backend
    /// call was in flight; a notification always carries newer state.
    pub async fn restore_session(&self) -> Option<Session> {
        let seen = read(&self.current).changes;
        let session = match self.backend.get_current_session().await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "session restore failed; continuing signed out");
                None
            }
        };
        let mut cache = write(&self.current);
        if cache.changes == seen {
            cache.session.clone_from(&session);
        } else {
            debug!("session changed during restore; keeping the newer session");
        }
        session
    }

    /// Subscribe to backend auth changes.
    #[must_use]
    pub fn subscribe(&self) -> SessionEvents {
        SessionEvents { subscription: self.backend.on_auth_state_change(), current: Arc::clone(&self.current) }
    }

    /// The last session seen, from either a restore or a notification.
    #[must_use]
    pub fn current(&self) -> Option<Session> {
        read(&self.current).session.clone()
    }

    /// Drop the cached session after a local sign-out.
    pub fn clear(&self) {
        record(&self.current, None);
    }
}

fn read(cache: &SessionCache) -> std::sync::RwLockReadGuard<'_, Cached> {
    cache.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(cache: &SessionCache) -> std::sync::RwLockWriteGuard<'_, Cached> {
    cache.write().unwrap_or_else(PoisonError::into_inner)
}

fn record(cache: &SessionCache, session: Option<Session>) {
    let mut cache = write(cache);
    cache.session = session;
    cache.changes += 1;
}

/// Stream of auth changes tied to one backend subscription.
///
/// Dropping it unsubscribes.
pub struct SessionEvents {
    subscription: AuthSubscription,
    current: SessionCache,
}

impl SessionEvents {
    /// Wait for the next change, recording its session as current.
    pub async fn next(&mut self) -> Option<AuthChange> {
        let change = self.subscription.recv().await?;
        record(&self.current, change.session.clone());
        Some(change)
    }
}
