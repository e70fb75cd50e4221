//! Shared types for the academia auth client
//!
//! Holds the data model exchanged with the hosted identity service, the
//! error taxonomy surfaced to the UI, and platform directory lookup.

pub mod directory;
pub mod error;
pub mod model;

pub use error::{AuthError, BackendError};
pub use model::{
    AuthChangeEvent, AuthResponse, IdentityUser, Profile, Role, Session,
    SignOutScope, UserMetadata,
};
