//! Session state synchronizer
//!
//! Keeps the in-memory session/user/profile state in line with the identity
//! provider. The provider callback only enqueues; a single event pump applies
//! events in order through [`AuthSnapshot::apply`], and profile lookups run on
//! their own tasks. Every profile result is checked against the user that is
//! current when it is committed.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use academia_core::{AuthChangeEvent, AuthError, IdentityUser, Profile, Session};

use super::profile::ProfileRepository;
use super::state::{AuthSnapshot, AuthUpdate, AuthView};
use crate::provider::{IdentityProvider, Subscription};

type ProviderEvent = (AuthChangeEvent, Option<Session>);

struct Shared {
    provider: Arc<dyn IdentityProvider>,
    profiles: ProfileRepository,
    state: watch::Sender<AuthSnapshot>,
}

/// Owner of the authoritative auth state
pub struct SessionSynchronizer {
    shared: Arc<Shared>,
    subscription: Mutex<Option<Subscription>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionSynchronizer {
    /// Subscribe to the provider and start initialization.
    ///
    /// The subscription is in place before the initial session query is
    /// issued. Events arriving in the meantime are queued and applied after
    /// the initial snapshot. Must be called from inside a tokio runtime.
    pub fn start(provider: Arc<dyn IdentityProvider>, profiles: ProfileRepository) -> Self {
        let (state, _) = watch::channel(AuthSnapshot::initializing());
        let shared = Arc::new(Shared {
            provider,
            profiles,
            state,
        });

        let (events_tx, events_rx) = mpsc::unbounded_channel::<ProviderEvent>();
        let subscription = shared
            .provider
            .on_auth_state_change(Box::new(move |event, session| {
                if events_tx.send((event, session)).is_err() {
                    tracing::debug!("Auth event {} after shutdown", event);
                }
            }));

        let (ready_tx, ready_rx) = oneshot::channel();
        let init = tokio::spawn(shared.clone().initialize(ready_tx));
        let pump = tokio::spawn(shared.clone().pump(events_rx, ready_rx));

        Self {
            shared,
            subscription: Mutex::new(Some(subscription)),
            tasks: Mutex::new(vec![init, pump]),
        }
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe(&self) -> AuthView {
        AuthView::new(self.shared.state.subscribe())
    }

    /// Wait for the initial session query and its profile resolution
    pub async fn wait_until_ready(&self) -> AuthSnapshot {
        let mut view = self.subscribe();
        match view.wait_for(|s| !s.is_loading).await {
            Some(snapshot) => snapshot,
            None => self.snapshot(),
        }
    }

    /// Fetch the current user's profile again, repairing it if missing.
    ///
    /// Returns the profile held afterwards.
    pub async fn refresh_profile(&self) -> Option<Profile> {
        let user = self.shared.state.borrow().user.clone()?;
        self.shared.resolve_profile(user).await;
        self.snapshot().profile
    }

    /// Unsubscribe from the provider and stop the event pump
    pub fn shutdown(&self) {
        if let Some(subscription) = self.subscription.lock().take() {
            subscription.unsubscribe();
            tracing::debug!("Session synchronizer stopped");
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for SessionSynchronizer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn commit(&self, update: AuthUpdate) -> bool {
        self.state.send_if_modified(|current| match current.apply(update) {
            Some(next) => {
                *current = next;
                true
            }
            None => false,
        })
    }

    fn is_current(&self, user_id: &str) -> bool {
        self.state.borrow().user_id() == Some(user_id)
    }

    async fn initialize(self: Arc<Self>, ready: oneshot::Sender<()>) {
        let session = match self.provider.get_session().await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!("Initial session query failed: {}", e);
                None
            }
        };
        let user = session.as_ref().map(|s| s.user.clone());
        self.commit(AuthUpdate::Initial(session));
        let _ = ready.send(());

        if let Some(user) = user {
            tracing::info!("Restored session for {}", user.id);
            self.resolve_profile(user).await;
        }
        self.commit(AuthUpdate::LoadingFinished);
        tracing::debug!("Auth state initialized");
    }

    async fn pump(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<ProviderEvent>,
        ready: oneshot::Receiver<()>,
    ) {
        if ready.await.is_err() {
            return;
        }
        while let Some((event, session)) = events.recv().await {
            self.handle_event(event, session);
        }
    }

    fn handle_event(self: &Arc<Self>, event: AuthChangeEvent, session: Option<Session>) {
        match (event, session) {
            (AuthChangeEvent::SignedIn, Some(session)) => {
                let user = session.user.clone();
                tracing::info!("Signed in as {}", user.id);
                self.commit(AuthUpdate::SignedIn(session));

                let this = self.clone();
                tokio::spawn(async move {
                    this.resolve_profile(user).await;
                });
            }
            (AuthChangeEvent::SignedIn, None) => {
                tracing::warn!("SIGNED_IN without a session, ignoring");
            }
            (AuthChangeEvent::SignedOut, _) => {
                tracing::info!("Signed out");
                self.commit(AuthUpdate::SignedOut);
            }
            (AuthChangeEvent::TokenRefreshed | AuthChangeEvent::UserUpdated, Some(session)) => {
                let user_id = session.user_id().to_string();
                if !self.commit(AuthUpdate::SessionRefreshed(session)) {
                    tracing::debug!("Ignoring {} for {}", event, user_id);
                }
            }
            (event, _) => {
                tracing::debug!("Ignoring auth event {}", event);
            }
        }
    }

    async fn resolve_profile(&self, user: IdentityUser) {
        match self.profiles.fetch_by_id(&user.id).await {
            Ok(profile) => {
                self.adopt(&user.id, profile);
            }
            Err(AuthError::ProfileNotFound) => self.repair_profile(user).await,
            Err(e) => {
                tracing::error!("Failed to load profile for {}: {}", user.id, e);
            }
        }
    }

    /// Provision the default profile for a user that has none
    async fn repair_profile(&self, cached: IdentityUser) {
        if !self.is_current(&cached.id) {
            tracing::debug!("Skipping profile repair for {}, no longer signed in", cached.id);
            return;
        }

        let user = match self.provider.get_user().await {
            Ok(Some(fresh)) if fresh.id == cached.id => fresh,
            Ok(Some(other)) => {
                tracing::warn!(
                    "Provider returned user {} while repairing {}",
                    other.id,
                    cached.id
                );
                cached
            }
            Ok(None) => cached,
            Err(e) => {
                tracing::warn!("Failed to fetch user {} for repair: {}", cached.id, e);
                cached
            }
        };

        let profile = Profile::provision_for(&user);
        tracing::info!(
            "Provisioning missing profile for {} (academy {})",
            profile.id,
            profile.academy_id
        );
        if let Err(e) = self.profiles.insert(&profile).await {
            tracing::warn!("Failed to persist profile for {}: {}", profile.id, e);
        }
        self.adopt(&user.id, profile);
    }

    fn adopt(&self, user_id: &str, profile: Profile) -> bool {
        let committed = self.commit(AuthUpdate::ProfileResolved {
            user_id: user_id.to_string(),
            profile,
        });
        if !committed {
            tracing::debug!("Profile result for {} not applied", user_id);
        }
        committed
    }
}
