//! User-facing notifications

use crossbeam_channel::Sender;

/// Toast-style message for the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthNotification {
    Success(String),
    Error(String),
}

impl AuthNotification {
    pub fn message(&self) -> &str {
        match self {
            AuthNotification::Success(message) | AuthNotification::Error(message) => message,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, AuthNotification::Error(_))
    }
}

/// Sink for notifications raised by auth operations
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: AuthNotification);
}

impl Notifier for Sender<AuthNotification> {
    fn notify(&self, notification: AuthNotification) {
        if let Err(e) = self.send(notification) {
            tracing::warn!("Dropped notification, receiver gone: {:?}", e.into_inner());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_notifier() {
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.notify(AuthNotification::Success("Signed out".to_string()));
        let received = rx.try_recv().unwrap();
        assert_eq!(received.message(), "Signed out");
        assert!(!received.is_error());

        drop(rx);
        tx.notify(AuthNotification::Error("lost".to_string()));
    }
}
