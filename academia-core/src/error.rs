//! Error types
//!
//! `BackendError` is what the hosted collaborators report. `AuthError` is
//! the categorised error the UI sees.

use thiserror::Error;

/// Raw failure reported by the identity provider or the profile store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BackendError {
    /// HTTP status, when the failure came from a response
    pub status: Option<u16>,
    /// Service-specific error code (`invalid_credentials`, `PGRST116`, ...)
    pub code: Option<String>,
    pub message: String,
    /// The request never produced a response
    pub transport: bool,
}

impl BackendError {
    /// The service answered with an error body
    pub fn rejected(
        status: Option<u16>,
        code: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            code: code.map(str::to_string),
            message: message.into(),
            transport: false,
        }
    }

    /// Connection, timeout or decoding failure
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
            transport: true,
        }
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.code.as_deref() == Some(code)
    }

    /// Transport failures and 5xx responses
    pub fn is_unavailable(&self) -> bool {
        self.transport || self.status.is_some_and(|s| s >= 500)
    }
}

/// User-facing error categories
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("invalid login credentials")]
    InvalidCredentials,
    #[error("email not confirmed")]
    EmailNotConfirmed,
    #[error("email already in use")]
    EmailAlreadyInUse,
    /// No profile row for the identity. Recoverable, triggers repair.
    #[error("profile not found")]
    ProfileNotFound,
    #[error("identity provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("{0}")]
    Unknown(String),
}

impl AuthError {
    /// Anything that is not a recognised category
    pub fn generic(err: &BackendError) -> Self {
        if err.is_unavailable() {
            AuthError::ProviderUnavailable(err.message.clone())
        } else {
            AuthError::Unknown(err.message.clone())
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, AuthError::ProfileNotFound)
    }

    /// Text shown to the user in a notification
    pub fn user_message(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "Invalid credentials",
            AuthError::EmailNotConfirmed => "Email not confirmed. Check your inbox.",
            AuthError::EmailAlreadyInUse => "This email is already in use",
            AuthError::ProfileNotFound => "Profile not found",
            AuthError::ProviderUnavailable(_) => {
                "The authentication service is unavailable. Try again later."
            }
            AuthError::Unknown(_) => "Something went wrong. Please try again.",
        }
    }
}
