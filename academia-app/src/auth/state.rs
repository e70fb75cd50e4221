//! Authentication state types

use tokio::sync::watch;

use academia_core::{IdentityUser, Profile, Session};

/// Phase of the session synchronizer, derived from an [`AuthSnapshot`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// Initial session query (and its profile lookup) still running
    Initializing,
    /// No session
    Unauthenticated,
    /// A user is signed in
    Authenticated {
        /// Whether the application profile has been resolved
        profile_ready: bool,
    },
}

/// Read model published by the synchronizer.
///
/// `user` is always `session.user`, so one is present exactly when the
/// other is. `profile`, when present, belongs to `user`.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthSnapshot {
    pub session: Option<Session>,
    pub user: Option<IdentityUser>,
    pub profile: Option<Profile>,
    pub is_loading: bool,
}

impl Default for AuthSnapshot {
    fn default() -> Self {
        Self::initializing()
    }
}

impl AuthSnapshot {
    pub fn initializing() -> Self {
        Self {
            session: None,
            user: None,
            profile: None,
            is_loading: true,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }

    pub fn phase(&self) -> AuthState {
        if self.is_loading {
            AuthState::Initializing
        } else if self.user.is_some() {
            AuthState::Authenticated {
                profile_ready: self.profile.is_some(),
            }
        } else {
            AuthState::Unauthenticated
        }
    }

    fn with_session(session: Option<Session>, profile: Option<Profile>, is_loading: bool) -> Self {
        let user = session.as_ref().map(|s| s.user.clone());
        let profile = match (&user, profile) {
            (Some(user), Some(profile)) if profile.belongs_to(user) => Some(profile),
            _ => None,
        };
        Self {
            session,
            user,
            profile,
            is_loading,
        }
    }

    /// Next state after `update`, or `None` when the update does not apply
    pub(crate) fn apply(&self, update: AuthUpdate) -> Option<Self> {
        match update {
            AuthUpdate::Initial(session) => {
                if !self.is_loading {
                    return None;
                }
                Some(Self::with_session(session, None, true))
            }
            AuthUpdate::SignedIn(session) => Some(Self::with_session(
                Some(session),
                self.profile.clone(),
                self.is_loading,
            )),
            AuthUpdate::SessionRefreshed(session) => {
                if self.user_id() != Some(session.user_id()) {
                    return None;
                }
                Some(Self::with_session(
                    Some(session),
                    self.profile.clone(),
                    self.is_loading,
                ))
            }
            AuthUpdate::SignedOut => Some(Self::with_session(None, None, self.is_loading)),
            AuthUpdate::ProfileResolved { user_id, profile } => {
                if self.user_id() != Some(user_id.as_str()) || profile.id != user_id {
                    return None;
                }
                if self.profile.as_ref() == Some(&profile) {
                    return None;
                }
                Some(Self {
                    profile: Some(profile),
                    ..self.clone()
                })
            }
            AuthUpdate::LoadingFinished => {
                if !self.is_loading {
                    return None;
                }
                Some(Self {
                    is_loading: false,
                    ..self.clone()
                })
            }
        }
    }
}

/// The only ways the synchronizer state may change
#[derive(Debug, Clone)]
pub(crate) enum AuthUpdate {
    /// Result of the initial session query
    Initial(Option<Session>),
    SignedIn(Session),
    /// New tokens or user data for the current user
    SessionRefreshed(Session),
    SignedOut,
    /// Profile lookup or repair finished for `user_id`
    ProfileResolved { user_id: String, profile: Profile },
    LoadingFinished,
}

/// Read-only, eventually consistent view of the auth state
#[derive(Debug, Clone)]
pub struct AuthView {
    rx: watch::Receiver<AuthSnapshot>,
}

impl AuthView {
    pub(crate) fn new(rx: watch::Receiver<AuthSnapshot>) -> Self {
        Self { rx }
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        self.rx.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.rx.borrow().is_authenticated()
    }

    pub fn is_loading(&self) -> bool {
        self.rx.borrow().is_loading
    }

    pub fn phase(&self) -> AuthState {
        self.rx.borrow().phase()
    }

    pub fn session(&self) -> Option<Session> {
        self.rx.borrow().session.clone()
    }

    pub fn user(&self) -> Option<IdentityUser> {
        self.rx.borrow().user.clone()
    }

    pub fn profile(&self) -> Option<Profile> {
        self.rx.borrow().profile.clone()
    }

    /// Wait for the next change. `None` once the synchronizer is gone.
    pub async fn changed(&mut self) -> Option<AuthSnapshot> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Wait until `predicate` holds for the current state
    pub async fn wait_for(
        &mut self,
        predicate: impl FnMut(&AuthSnapshot) -> bool,
    ) -> Option<AuthSnapshot> {
        self.rx.wait_for(predicate).await.ok().map(|s| (*s).clone())
    }
}
