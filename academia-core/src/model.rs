//! Identity and profile data model
//!
//! Field names follow the hosted service's wire format so these types can be
//! (de)serialized directly from its responses.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum_macros::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Metadata key holding the display name given at sign-up
pub const METADATA_NAME_KEY: &str = "nome";
/// Metadata key holding the tenant (academy) id given at sign-up
pub const METADATA_ACADEMY_KEY: &str = "academy_id";
/// Display name used when neither metadata nor email provide one
pub const DEFAULT_DISPLAY_NAME: &str = "User";
/// A session is treated as expired this many seconds before its real expiry
pub const EXPIRY_MARGIN_SECS: i64 = 30;

/// Provider-side user record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Arbitrary key/value data supplied at sign-up
    #[serde(default)]
    pub user_metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_confirmed_at: Option<String>,
}

impl IdentityUser {
    pub fn new(id: impl Into<String>, email: Option<&str>) -> Self {
        Self {
            id: id.into(),
            email: email.map(str::to_string),
            user_metadata: Map::new(),
            email_confirmed_at: None,
        }
    }

    /// Non-empty string value from the metadata bag
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.user_metadata
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn display_name(&self) -> Option<&str> {
        self.metadata_str(METADATA_NAME_KEY)
    }

    pub fn academy_id(&self) -> Option<&str> {
        self.metadata_str(METADATA_ACADEMY_KEY)
    }

    /// Part of the email before `@`, if there is a non-empty one
    pub fn email_local_part(&self) -> Option<&str> {
        self.email
            .as_deref()
            .and_then(|email| email.split('@').next())
            .filter(|local| !local.is_empty())
    }
}

/// Token bundle issued by the identity provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Lifetime in seconds as reported at issue time
    #[serde(default)]
    pub expires_in: i64,
    /// Unix timestamp (seconds) at which the access token expires
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user: IdentityUser,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl Session {
    /// Subject identifier of the session
    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Fill in `expires_at` from `expires_in` when the provider omitted it
    pub fn stamp_expiry(mut self) -> Self {
        if self.expires_at.is_none() && self.expires_in > 0 {
            self.expires_at = Some(chrono::Utc::now().timestamp() + self.expires_in);
        }
        self
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(at) => chrono::Utc::now().timestamp() + EXPIRY_MARGIN_SECS >= at,
            None => false,
        }
    }
}

/// Application role stored on a profile.
///
/// Roles this client does not know keep their wire value so rows are written
/// back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Administrator,
    Instructor,
    Student,
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::Administrator => "Administrador",
            Role::Instructor => "Instrutor",
            Role::Student => "Aluno",
            Role::Other(raw) => raw,
        }
    }
}

impl From<String> for Role {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "Administrador" => Role::Administrator,
            "Instrutor" => Role::Instructor,
            "Aluno" => Role::Student,
            _ => Role::Other(raw),
        }
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        match role {
            Role::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application-level user record, keyed by the identity user id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(rename = "nome")]
    pub name: String,
    pub email: String,
    pub role: Role,
    pub academy_id: String,
}

impl Profile {
    /// Default profile for an identity that has none yet.
    ///
    /// The id is always the identity's id. Name and academy come from the
    /// sign-up metadata when present; a missing academy gets a fresh id.
    pub fn provision_for(user: &IdentityUser) -> Self {
        let name = user
            .display_name()
            .or_else(|| user.email_local_part())
            .unwrap_or(DEFAULT_DISPLAY_NAME)
            .to_string();
        let academy_id = user
            .academy_id()
            .map(str::to_string)
            .unwrap_or_else(generate_academy_id);

        Self {
            id: user.id.clone(),
            name,
            email: user.email.clone().unwrap_or_default(),
            role: Role::Administrator,
            academy_id,
        }
    }

    pub fn belongs_to(&self, user: &IdentityUser) -> bool {
        self.id == user.id
    }
}

/// New tenant identifier for a self-registering administrator
pub fn generate_academy_id() -> String {
    Uuid::new_v4().to_string()
}

/// Metadata attached to the identity at sign-up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMetadata {
    #[serde(rename = "nome")]
    pub name: String,
    pub academy_id: String,
}

/// Payload of a successful sign-in or sign-up.
///
/// Sign-up against a service that requires email confirmation returns a user
/// without a session.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AuthResponse {
    pub user: Option<IdentityUser>,
    pub session: Option<Session>,
}

/// Session-change notifications emitted by the identity provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthChangeEvent {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
}

/// How far a sign-out reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum SignOutScope {
    /// Only this client
    Local,
    /// Every client the user is signed in on
    Global,
}
