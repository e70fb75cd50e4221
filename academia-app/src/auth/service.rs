//! Auth operations facade
//!
//! Sign-in, sign-up and sign-out as the UI sees them. State changes caused by
//! these calls reach the rest of the application through the provider's
//! events and the session synchronizer, never through the return values.

use std::sync::Arc;

use academia_core::{
    AuthError, AuthResponse, BackendError, Profile, Role, SignOutScope,
    UserMetadata, model::generate_academy_id,
};

use super::notify::{AuthNotification, Notifier};
use super::profile::ProfileRepository;
use super::storage::StorageCleaner;
use crate::provider::IdentityProvider;

const SIGN_IN_SUCCESS: &str = "Signed in successfully";
const SIGN_UP_SUCCESS: &str = "Check your email to confirm your registration!";
const SIGN_OUT_SUCCESS: &str = "Signed out";

/// Exact message the identity service uses for a bad email/password pair
const INVALID_CREDENTIALS_MESSAGE: &str = "Invalid login credentials";
const EMAIL_NOT_CONFIRMED_MESSAGE: &str = "Email not confirmed";

/// Entry point for user-initiated auth operations
#[derive(Clone)]
pub struct AuthService {
    provider: Arc<dyn IdentityProvider>,
    profiles: ProfileRepository,
    cleaner: StorageCleaner,
    notifier: Arc<dyn Notifier>,
}

impl AuthService {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        profiles: ProfileRepository,
        cleaner: StorageCleaner,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            provider,
            profiles,
            cleaner,
            notifier,
        }
    }

    /// Sign in with email and password.
    ///
    /// Any cached credentials and any existing session are discarded first.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthResponse, AuthError> {
        let result = self.try_sign_in(email, password).await;
        self.report(&result, SIGN_IN_SUCCESS);
        result
    }

    async fn try_sign_in(&self, email: &str, password: &str) -> Result<AuthResponse, AuthError> {
        self.cleaner.clean();
        if let Err(e) = self.provider.sign_out(SignOutScope::Global).await {
            tracing::warn!("Sign-out before sign-in failed: {}", e);
        }

        let response = self
            .provider
            .sign_in_with_password(email, password)
            .await
            .map_err(|e| {
                tracing::warn!("Sign-in for {} rejected: {}", email, e);
                classify_sign_in(&e)
            })?;
        match &response.user {
            Some(user) => tracing::info!("Sign-in succeeded for {}", user.id),
            None => return Err(AuthError::Unknown("sign-in returned no user".to_string())),
        }
        Ok(response)
    }

    /// Register a new self-managed academy administrator.
    ///
    /// The profile row is created right away. If that insert fails the
    /// registration still succeeds; the profile is provisioned on first
    /// sign-in instead.
    pub async fn sign_up(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, AuthError> {
        let result = self.try_sign_up(name, email, password).await;
        self.report(&result, SIGN_UP_SUCCESS);
        result
    }

    async fn try_sign_up(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, AuthError> {
        self.cleaner.clean();

        let academy_id = generate_academy_id();
        let metadata = UserMetadata {
            name: name.to_string(),
            academy_id: academy_id.clone(),
        };
        let response = self
            .provider
            .sign_up(email, password, &metadata)
            .await
            .map_err(|e| {
                tracing::warn!("Sign-up for {} rejected: {}", email, e);
                classify_sign_up(&e)
            })?;

        let Some(user) = &response.user else {
            tracing::warn!("Sign-up for {} returned no user", email);
            return Err(AuthError::Unknown("sign-up returned no user".to_string()));
        };
        let profile = Profile {
            id: user.id.clone(),
            name: name.to_string(),
            email: email.to_string(),
            role: Role::Administrator,
            academy_id,
        };
        if let Err(e) = self.profiles.insert(&profile).await {
            tracing::warn!(
                "Profile insert after sign-up failed for {}, deferring to first sign-in: {}",
                user.id,
                e
            );
        }
        Ok(response)
    }

    /// End the session on every device
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.cleaner.clean();
        let result = self
            .provider
            .sign_out(SignOutScope::Global)
            .await
            .map_err(|e| {
                tracing::error!("Sign-out failed: {}", e);
                classify_sign_out(&e)
            });
        self.report(&result, SIGN_OUT_SUCCESS);
        result
    }

    fn report<T>(&self, result: &Result<T, AuthError>, success: &str) {
        let notification = match result {
            Ok(_) => AuthNotification::Success(success.to_string()),
            Err(e) => AuthNotification::Error(e.user_message().to_string()),
        };
        self.notifier.notify(notification);
    }
}

pub fn classify_sign_in(err: &BackendError) -> AuthError {
    if err.message == INVALID_CREDENTIALS_MESSAGE || err.has_code("invalid_credentials") {
        AuthError::InvalidCredentials
    } else if err.message.contains(EMAIL_NOT_CONFIRMED_MESSAGE)
        || err.has_code("email_not_confirmed")
    {
        AuthError::EmailNotConfirmed
    } else {
        AuthError::generic(err)
    }
}

pub fn classify_sign_up(err: &BackendError) -> AuthError {
    if err.is_unavailable() {
        return AuthError::ProviderUnavailable(err.message.clone());
    }
    let message = err.message.to_lowercase();
    if message.contains("email")
        || message.contains("already")
        || err.has_code("user_already_exists")
        || err.has_code("email_exists")
    {
        AuthError::EmailAlreadyInUse
    } else {
        AuthError::Unknown(err.message.clone())
    }
}

pub fn classify_sign_out(err: &BackendError) -> AuthError {
    AuthError::generic(err)
}
