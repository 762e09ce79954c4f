//! Auth notification fan-out shared by backend implementations.
//!
//! DESIGN
//! ======
//! Each subscriber owns an unbounded channel receiver; the broadcaster keeps
//! the matching senders keyed by subscription id. The initial-session event is
//! queued while the listener map is locked, before the sender is registered,
//! so it is always the first thing a subscriber receives.
//!
//! Dropping an [`AuthSubscription`] removes its sender. Senders whose
//! receiver is gone are pruned on the next emit as well.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::mpsc;

use super::{AuthChange, AuthEvent, Session};

type ListenerMap = Mutex<HashMap<u64, mpsc::UnboundedSender<AuthChange>>>;

/// Registry of auth-state listeners.
#[derive(Default)]
pub struct AuthBroadcaster {
    listeners: Arc<ListenerMap>,
    next_id: AtomicU64,
}

impl AuthBroadcaster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener, queueing `INITIAL_SESSION` with `current` first.
    pub fn subscribe(&self, current: Option<Session>) -> AuthSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        if tx.send(AuthChange { event: AuthEvent::InitialSession, session: current }).is_ok() {
            listeners.insert(id, tx);
        }
        drop(listeners);

        AuthSubscription { id, rx, registry: Arc::downgrade(&self.listeners) }
    }

    /// Deliver a change to every live listener.
    pub fn emit(&self, event: AuthEvent, session: Option<Session>) {
        let change = AuthChange { event, session };
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        listeners.retain(|_, tx| tx.send(change.clone()).is_ok());
        tracing::debug!(%event, listeners = listeners.len(), "auth change emitted");
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Receiving end of an auth-state subscription.
pub struct AuthSubscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<AuthChange>,
    registry: Weak<ListenerMap>,
}

impl AuthSubscription {
    /// Wrap a bare receiver for backends that manage their own senders.
    #[must_use]
    pub fn from_receiver(rx: mpsc::UnboundedReceiver<AuthChange>) -> Self {
        Self { id: 0, rx, registry: Weak::new() }
    }

    /// Wait for the next change. `None` once the backend side has gone away.
    pub async fn recv(&mut self) -> Option<AuthChange> {
        self.rx.recv().await
    }
}

impl Drop for AuthSubscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.id);
        }
    }
}

#[cfg(test)]
#[path = "events_test.rs"]
mod tests;
