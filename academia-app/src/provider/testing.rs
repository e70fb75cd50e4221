//! In-memory collaborators for tests
//!
//! `MemoryProvider` dispatches auth events while holding its internal lock,
//! like a provider that notifies mid-operation. Any call made back into it
//! from a handler is rejected and counted.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;
use tokio::sync::Notify;

use academia_core::{
    AuthChangeEvent, AuthResponse, BackendError, IdentityUser, Profile,
    Session, SignOutScope, UserMetadata,
};

use super::{AuthStateHandler, IdentityProvider, Subscription};
use crate::auth::profile::{
    PROFILE_NOT_FOUND_CODE, ProfileStore, UNIQUE_VIOLATION_CODE,
};

pub(crate) fn session_for(user: IdentityUser) -> Session {
    Session {
        access_token: format!("access-{}", user.id),
        token_type: "bearer".to_string(),
        expires_in: 3600,
        expires_at: None,
        refresh_token: Some(format!("refresh-{}", user.id)),
        user,
    }
    .stamp_expiry()
}

struct Account {
    password: String,
    user: IdentityUser,
    confirmed: bool,
}

#[derive(Default)]
struct ProviderState {
    accounts: HashMap<String, Account>,
    session: Option<Session>,
    handlers: Vec<(u64, AuthStateHandler)>,
    next_handler: u64,
    next_user: u64,
    calls: Vec<String>,
    session_gate: Option<Arc<Notify>>,
    get_session_error: Option<BackendError>,
    get_user_error: Option<BackendError>,
    sign_out_error: Option<BackendError>,
    empty_sign_up: bool,
}

#[derive(Default)]
pub(crate) struct MemoryProvider {
    state: Arc<Mutex<ProviderState>>,
    dispatching: Arc<AtomicBool>,
    reentrant: AtomicUsize,
}

impl MemoryProvider {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Confirmed account
    pub(crate) fn register(&self, email: &str, password: &str, metadata: Value) -> IdentityUser {
        let mut state = self.state.lock();
        let user = Self::new_user(&mut state, email, metadata);
        state.accounts.insert(
            email.to_string(),
            Account {
                password: password.to_string(),
                user: user.clone(),
                confirmed: true,
            },
        );
        user
    }

    pub(crate) fn confirm(&self, email: &str) {
        if let Some(account) = self.state.lock().accounts.get_mut(email) {
            account.confirmed = true;
        }
    }

    /// Replace the current session without notifying anyone
    pub(crate) fn set_session(&self, session: Option<Session>) {
        self.state.lock().session = session;
    }

    pub(crate) fn current_session(&self) -> Option<Session> {
        self.state.lock().session.clone()
    }

    /// Make `user` the current user and announce it
    pub(crate) fn emit_signed_in(&self, user: IdentityUser) -> Session {
        let session = session_for(user);
        let mut state = self.state.lock();
        state.session = Some(session.clone());
        self.dispatch(&state, AuthChangeEvent::SignedIn, Some(&session));
        session
    }

    pub(crate) fn emit_signed_out(&self) {
        let mut state = self.state.lock();
        state.session = None;
        self.dispatch(&state, AuthChangeEvent::SignedOut, None);
    }

    /// Raw event; the provider's own session is left alone
    pub(crate) fn emit(&self, event: AuthChangeEvent, session: Option<Session>) {
        let state = self.state.lock();
        self.dispatch(&state, event, session.as_ref());
    }

    /// `get_session` waits for the returned notifier before answering
    pub(crate) fn hold_get_session(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().session_gate = Some(gate.clone());
        gate
    }

    pub(crate) fn fail_get_session(&self, err: BackendError) {
        self.state.lock().get_session_error = Some(err);
    }

    pub(crate) fn fail_get_user(&self, err: BackendError) {
        self.state.lock().get_user_error = Some(err);
    }

    pub(crate) fn fail_sign_out(&self, err: BackendError) {
        self.state.lock().sign_out_error = Some(err);
    }

    /// `sign_up` answers with neither user nor session
    pub(crate) fn answer_sign_up_empty(&self) {
        self.state.lock().empty_sign_up = true;
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.state.lock().handlers.len()
    }

    pub(crate) fn is_dispatching(&self) -> bool {
        self.dispatching.load(Ordering::SeqCst)
    }

    pub(crate) fn reentrant_calls(&self) -> usize {
        self.reentrant.load(Ordering::SeqCst)
    }

    fn new_user(state: &mut ProviderState, email: &str, metadata: Value) -> IdentityUser {
        state.next_user += 1;
        let mut user = IdentityUser::new(format!("user-{}", state.next_user), Some(email));
        if let Value::Object(map) = metadata {
            user.user_metadata = map;
        }
        user
    }

    fn dispatch(
        &self,
        state: &MutexGuard<'_, ProviderState>,
        event: AuthChangeEvent,
        session: Option<&Session>,
    ) {
        self.dispatching.store(true, Ordering::SeqCst);
        for (_, handler) in &state.handlers {
            handler(event, session.cloned());
        }
        self.dispatching.store(false, Ordering::SeqCst);
    }

    fn enter(&self, call: &str) -> Result<MutexGuard<'_, ProviderState>, BackendError> {
        match self.state.try_lock() {
            Some(mut state) => {
                state.calls.push(call.to_string());
                Ok(state)
            }
            None => {
                self.reentrant.fetch_add(1, Ordering::SeqCst);
                Err(BackendError::transport(format!("reentrant call to {call}")))
            }
        }
    }

    fn current_session_now(&self) -> Result<Option<Session>, BackendError> {
        let mut state = self.enter("get_session")?;
        if let Some(err) = state.get_session_error.take() {
            return Err(err);
        }
        Ok(state.session.clone())
    }

    fn sign_in_now(&self, email: &str, password: &str) -> Result<AuthResponse, BackendError> {
        let mut state = self.enter("sign_in")?;
        let user = match state.accounts.get(email) {
            Some(account) if account.password == password => {
                if !account.confirmed {
                    return Err(BackendError::rejected(
                        Some(400),
                        Some("email_not_confirmed"),
                        "Email not confirmed",
                    ));
                }
                account.user.clone()
            }
            _ => {
                return Err(BackendError::rejected(
                    Some(400),
                    Some("invalid_credentials"),
                    "Invalid login credentials",
                ));
            }
        };
        let session = session_for(user.clone());
        state.session = Some(session.clone());
        self.dispatch(&state, AuthChangeEvent::SignedIn, Some(&session));
        Ok(AuthResponse {
            user: Some(user),
            session: Some(session),
        })
    }

    fn sign_up_now(
        &self,
        email: &str,
        password: &str,
        metadata: &UserMetadata,
    ) -> Result<AuthResponse, BackendError> {
        let mut state = self.enter("sign_up")?;
        if state.empty_sign_up {
            return Ok(AuthResponse::default());
        }
        if state.accounts.contains_key(email) {
            return Err(BackendError::rejected(
                Some(422),
                Some("user_already_exists"),
                "User already registered",
            ));
        }
        let metadata = serde_json::to_value(metadata)
            .map_err(|e| BackendError::transport(e.to_string()))?;
        let user = Self::new_user(&mut state, email, metadata);
        state.accounts.insert(
            email.to_string(),
            Account {
                password: password.to_string(),
                user: user.clone(),
                confirmed: false,
            },
        );
        Ok(AuthResponse {
            user: Some(user),
            session: None,
        })
    }

    fn sign_out_now(&self, scope: SignOutScope) -> Result<(), BackendError> {
        let mut state = self.enter(&format!("sign_out:{scope}"))?;
        if let Some(err) = state.sign_out_error.take() {
            return Err(err);
        }
        if state.session.take().is_some() {
            self.dispatch(&state, AuthChangeEvent::SignedOut, None);
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for MemoryProvider {
    async fn get_session(&self) -> Result<Option<Session>, BackendError> {
        let gate = self.state.lock().session_gate.take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.current_session_now()
    }

    async fn get_user(&self) -> Result<Option<IdentityUser>, BackendError> {
        let mut state = self.enter("get_user")?;
        if let Some(err) = state.get_user_error.take() {
            return Err(err);
        }
        Ok(state.session.as_ref().map(|s| s.user.clone()))
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, BackendError> {
        self.sign_in_now(email, password)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &UserMetadata,
    ) -> Result<AuthResponse, BackendError> {
        self.sign_up_now(email, password, metadata)
    }

    async fn sign_out(&self, scope: SignOutScope) -> Result<(), BackendError> {
        self.sign_out_now(scope)
    }

    fn on_auth_state_change(&self, handler: AuthStateHandler) -> Subscription {
        let mut state = self.state.lock();
        let id = state.next_handler;
        state.next_handler += 1;
        state.handlers.push((id, handler));

        let weak: Weak<Mutex<ProviderState>> = Arc::downgrade(&self.state);
        Subscription::new(move || {
            if let Some(state) = weak.upgrade() {
                state.lock().handlers.retain(|(h, _)| *h != id);
            }
        })
    }
}

#[derive(Default)]
struct StoreState {
    rows: BTreeMap<String, Profile>,
    select_error: Option<BackendError>,
    insert_error: Option<BackendError>,
    gates: HashMap<String, Arc<Notify>>,
    selects: usize,
    completed_selects: usize,
    inserts: usize,
}

/// Profile table double with failure injection and per-id slow selects
#[derive(Default)]
pub(crate) struct MemoryProfileStore {
    state: Mutex<StoreState>,
}

impl MemoryProfileStore {
    pub(crate) fn put(&self, profile: Profile) {
        self.state.lock().rows.insert(profile.id.clone(), profile);
    }

    pub(crate) fn rows(&self) -> Vec<Profile> {
        self.state.lock().rows.values().cloned().collect()
    }

    pub(crate) fn fail_selects(&self, err: BackendError) {
        self.state.lock().select_error = Some(err);
    }

    pub(crate) fn fail_inserts(&self, err: BackendError) {
        self.state.lock().insert_error = Some(err);
    }

    pub(crate) fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.select_error = None;
        state.insert_error = None;
    }

    /// The next select for `id` waits for the returned notifier
    pub(crate) fn hold(&self, id: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().gates.insert(id.to_string(), gate.clone());
        gate
    }

    pub(crate) fn select_count(&self) -> usize {
        self.state.lock().selects
    }

    pub(crate) fn completed_selects(&self) -> usize {
        self.state.lock().completed_selects
    }

    pub(crate) fn insert_count(&self) -> usize {
        self.state.lock().inserts
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn select_by_id(&self, id: &str) -> Result<Profile, BackendError> {
        let gate = {
            let mut state = self.state.lock();
            state.selects += 1;
            state.gates.remove(id)
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut state = self.state.lock();
        state.completed_selects += 1;
        if let Some(err) = state.select_error.clone() {
            return Err(err);
        }
        state.rows.get(id).cloned().ok_or_else(|| {
            BackendError::rejected(
                Some(406),
                Some(PROFILE_NOT_FOUND_CODE),
                "JSON object requested, multiple (or no) rows returned",
            )
        })
    }

    async fn insert(&self, profile: &Profile) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.inserts += 1;
        if let Some(err) = state.insert_error.clone() {
            return Err(err);
        }
        if state.rows.contains_key(&profile.id) {
            return Err(BackendError::rejected(
                Some(409),
                Some(UNIQUE_VIOLATION_CODE),
                "duplicate key value violates unique constraint",
            ));
        }
        state.rows.insert(profile.id.clone(), profile.clone());
        Ok(())
    }
}
