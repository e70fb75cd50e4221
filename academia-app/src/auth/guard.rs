//! Route guard for protected views

use super::state::AuthSnapshot;

/// Where unauthenticated users are sent
pub const DEFAULT_SIGN_IN_PATH: &str = "/login";

/// What to do with a request for a protected view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Auth state not known yet; show a loading indicator and do not navigate
    Pending,
    Redirect { to: String },
    Render,
}

#[derive(Debug, Clone)]
pub struct RouteGuard {
    sign_in_path: String,
}

impl Default for RouteGuard {
    fn default() -> Self {
        Self::new(DEFAULT_SIGN_IN_PATH)
    }
}

impl RouteGuard {
    pub fn new(sign_in_path: impl Into<String>) -> Self {
        Self {
            sign_in_path: sign_in_path.into(),
        }
    }

    pub fn sign_in_path(&self) -> &str {
        &self.sign_in_path
    }

    /// A signed-in user is let through even while their profile is still
    /// being resolved.
    pub fn check(&self, snapshot: &AuthSnapshot) -> RouteDecision {
        if snapshot.is_loading {
            RouteDecision::Pending
        } else if snapshot.user.is_none() {
            RouteDecision::Redirect {
                to: self.sign_in_path.clone(),
            }
        } else {
            RouteDecision::Render
        }
    }
}
