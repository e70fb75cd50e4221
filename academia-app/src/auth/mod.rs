//! Authentication for the academia client
//!
//! Keeps session, identity and profile state in sync with the hosted identity
//! service, provisions missing profiles, and wraps the user-facing auth
//! operations.

pub mod guard;
pub mod notify;
pub mod profile;
pub mod service;
pub mod state;
pub mod storage;
pub mod sync;
pub mod validation;

pub use guard::{RouteDecision, RouteGuard};
pub use notify::{AuthNotification, Notifier};
pub use profile::{ProfileRepository, ProfileStore};
pub use service::AuthService;
pub use state::{AuthSnapshot, AuthState, AuthView};
pub use storage::{ClientStorage, FileStorage, MemoryStorage, StorageCleaner};
pub use sync::SessionSynchronizer;
pub use validation::{FieldError, SignInForm, SignUpForm};
