//! Identity provider seam
//!
//! The hosted identity service is an external collaborator. Everything the
//! auth core needs from it goes through [`IdentityProvider`].

pub mod hosted;
#[cfg(test)]
pub(crate) mod testing;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use academia_core::{
    AuthChangeEvent, AuthResponse, BackendError, IdentityUser, Session,
    SignOutScope, UserMetadata,
};
use async_trait::async_trait;
use parking_lot::Mutex;

pub use hosted::{HostedAuthClient, HostedProfileStore};

/// Callback invoked for every session change
pub type AuthStateHandler =
    Box<dyn Fn(AuthChangeEvent, Option<Session>) + Send + Sync>;

/// Client of the hosted identity service
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Current session, restored from storage if needed
    async fn get_session(&self) -> Result<Option<Session>, BackendError>;

    /// Fresh copy of the signed-in user from the service
    async fn get_user(&self) -> Result<Option<IdentityUser>, BackendError>;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, BackendError>;

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &UserMetadata,
    ) -> Result<AuthResponse, BackendError>;

    async fn sign_out(&self, scope: SignOutScope) -> Result<(), BackendError>;

    /// Register a handler for session changes.
    ///
    /// Handlers may be invoked while the provider is still in the middle of
    /// the operation that caused the change. They must not call back into
    /// the provider.
    fn on_auth_state_change(&self, handler: AuthStateHandler) -> Subscription;
}

/// Handle returned by [`IdentityProvider::on_auth_state_change`].
///
/// Dropping it unsubscribes.
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(f) = self.unsubscribe.take() {
            f();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(f) = self.unsubscribe.take() {
            f();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

/// Registered auth state handlers
#[derive(Default)]
pub(crate) struct Listeners {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(u64, Arc<AuthStateHandler>)>>,
}

impl Listeners {
    pub(crate) fn subscribe(self: &Arc<Self>, handler: AuthStateHandler) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.lock().push((id, Arc::new(handler)));

        let listeners: Weak<Self> = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                listeners.handlers.lock().retain(|(h, _)| *h != id);
            }
        })
    }

    /// Call every handler. The registry lock is not held during the calls.
    pub(crate) fn emit(&self, event: AuthChangeEvent, session: Option<&Session>) {
        let handlers: Vec<Arc<AuthStateHandler>> =
            self.handlers.lock().iter().map(|(_, h)| h.clone()).collect();
        tracing::debug!("Dispatching {} to {} listener(s)", event, handlers.len());
        for handler in handlers {
            handler(event, session.cloned());
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.handlers.lock().len()
    }
}
