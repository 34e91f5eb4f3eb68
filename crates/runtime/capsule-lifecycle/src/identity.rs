//! Connected identity
//!
//! Whatever widget or wallet authenticates the reader sits behind
//! [`IdentityProvider`]. Sessions only ever see "who is connected now" and a
//! notification when that changes.

use capsule_core::Principal;
use std::sync::Mutex;
use tokio::sync::watch;

/// Called with the principal after each successful sign-in
pub type AuthCallback = Box<dyn Fn(&Principal) + Send + Sync>;

/// Source of the reader's identity
pub trait IdentityProvider: Send + Sync {
    fn current(&self) -> Option<Principal>;

    fn on_authenticated(&self, callback: AuthCallback);

    fn sign_out(&self);

    /// Change feed; the current value is visible immediately.
    fn subscribe(&self) -> watch::Receiver<Option<Principal>>;
}

/// In-process identity backed by a watch channel
pub struct SessionIdentity {
    tx: watch::Sender<Option<Principal>>,
    callbacks: Mutex<Vec<AuthCallback>>,
}

impl Default for SessionIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionIdentity {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            tx,
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn signed_in(principal: Principal) -> Self {
        let identity = Self::new();
        identity.tx.send_replace(Some(principal));
        identity
    }

    pub fn sign_in(&self, principal: Principal) {
        tracing::info!(%principal, "identity connected");
        self.tx.send_replace(Some(principal.clone()));
        let callbacks = self.callbacks.lock().unwrap_or_else(|e| e.into_inner());
        for callback in callbacks.iter() {
            callback(&principal);
        }
    }
}

impl IdentityProvider for SessionIdentity {
    fn current(&self) -> Option<Principal> {
        self.tx.borrow().clone()
    }

    fn on_authenticated(&self, callback: AuthCallback) {
        self.callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(callback);
    }

    fn sign_out(&self) {
        if self.tx.send_replace(None).is_some() {
            tracing::info!("identity disconnected");
        }
    }

    fn subscribe(&self) -> watch::Receiver<Option<Principal>> {
        self.tx.subscribe()
    }
}
