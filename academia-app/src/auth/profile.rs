//! Application profile repository

use std::sync::Arc;

use async_trait::async_trait;

use academia_core::{AuthError, BackendError, Profile};

/// Error code the row store uses for "no rows" on a single-row select
pub const PROFILE_NOT_FOUND_CODE: &str = "PGRST116";
/// Unique constraint violation on insert
pub const UNIQUE_VIOLATION_CODE: &str = "23505";

/// Backing store for the profile table
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Exactly one row by primary key; a missing row is reported with
    /// [`PROFILE_NOT_FOUND_CODE`]
    async fn select_by_id(&self, id: &str) -> Result<Profile, BackendError>;

    async fn insert(&self, profile: &Profile) -> Result<(), BackendError>;
}

/// Profile lookups keyed by the identity provider's user id
#[derive(Clone)]
pub struct ProfileRepository {
    store: Arc<dyn ProfileStore>,
}

impl ProfileRepository {
    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        Self { store }
    }

    /// `AuthError::ProfileNotFound` when the user has no row yet
    pub async fn fetch_by_id(&self, id: &str) -> Result<Profile, AuthError> {
        match self.store.select_by_id(id).await {
            Ok(profile) if profile.id == id => Ok(profile),
            Ok(profile) => {
                tracing::error!("Profile lookup for {} returned row {}", id, profile.id);
                Err(AuthError::Unknown(format!("profile lookup for {id} returned another row")))
            }
            Err(e) if e.has_code(PROFILE_NOT_FOUND_CODE) => Err(AuthError::ProfileNotFound),
            Err(e) => Err(AuthError::generic(&e)),
        }
    }

    /// Insert a new row.
    ///
    /// Not idempotent: only call after `fetch_by_id` reported
    /// `ProfileNotFound`. Concurrent inserts for the same id are resolved by
    /// the store's unique constraint.
    pub async fn insert(&self, profile: &Profile) -> Result<(), AuthError> {
        match self.store.insert(profile).await {
            Ok(()) => {
                tracing::info!("Created profile for {}", profile.id);
                Ok(())
            }
            Err(e) if e.has_code(UNIQUE_VIOLATION_CODE) || e.status == Some(409) => {
                Err(AuthError::Unknown(format!("profile {} already exists", profile.id)))
            }
            Err(e) => Err(AuthError::generic(&e)),
        }
    }
}
