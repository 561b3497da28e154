//! Security-event notifications.
//!
//! Delivery (email, SMS, push) lives outside the core. The core hands each
//! event to a [`Notifier`] on a detached task and never waits for or depends
//! on the outcome.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

/// Events worth telling the account holder about.
#[derive(Clone)]
pub enum SecurityEvent {
    EmailVerificationRequested {
        user_id: Uuid,
        email: String,
        token: String,
    },
    PasswordResetRequested {
        user_id: Uuid,
        email: String,
        token: String,
        expires_at: DateTime<Utc>,
    },
    PasswordChanged {
        user_id: Uuid,
        email: String,
    },
    AccountLocked {
        user_id: Uuid,
        email: String,
        until: DateTime<Utc>,
    },
    SessionsRevoked {
        user_id: Uuid,
    },
    AccountDeactivated {
        user_id: Uuid,
    },
}

impl SecurityEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SecurityEvent::EmailVerificationRequested { .. } => "email_verification_requested",
            SecurityEvent::PasswordResetRequested { .. } => "password_reset_requested",
            SecurityEvent::PasswordChanged { .. } => "password_changed",
            SecurityEvent::AccountLocked { .. } => "account_locked",
            SecurityEvent::SessionsRevoked { .. } => "sessions_revoked",
            SecurityEvent::AccountDeactivated { .. } => "account_deactivated",
        }
    }

    pub fn user_id(&self) -> Uuid {
        match self {
            SecurityEvent::EmailVerificationRequested { user_id, .. }
            | SecurityEvent::PasswordResetRequested { user_id, .. }
            | SecurityEvent::PasswordChanged { user_id, .. }
            | SecurityEvent::AccountLocked { user_id, .. }
            | SecurityEvent::SessionsRevoked { user_id }
            | SecurityEvent::AccountDeactivated { user_id } => *user_id,
        }
    }
}

// Tokens stay out of Debug output.
impl std::fmt::Debug for SecurityEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityEvent")
            .field("kind", &self.kind())
            .field("user_id", &self.user_id())
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Receives security events.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: SecurityEvent) -> Result<(), NotifyError>;
}

/// Notifier that only logs. Used until a delivery channel is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, event: SecurityEvent) -> Result<(), NotifyError> {
        info!(kind = event.kind(), user_id = %event.user_id(), "security notification");
        Ok(())
    }
}

/// Hand `event` to `notifier` on a detached task.
pub fn dispatch(notifier: &Arc<dyn Notifier>, event: SecurityEvent) {
    let notifier = Arc::clone(notifier);
    tokio::spawn(async move {
        let kind = event.kind();
        let user_id = event.user_id();
        if let Err(e) = notifier.notify(event).await {
            warn!(kind, user_id = %user_id, "notification not delivered: {e}");
        }
    });
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    struct ChannelNotifier(mpsc::UnboundedSender<SecurityEvent>);

    #[async_trait]
    impl Notifier for ChannelNotifier {
        async fn notify(&self, event: SecurityEvent) -> Result<(), NotifyError> {
            self.0
                .send(event)
                .map_err(|e| NotifyError::Delivery(e.to_string()))
        }
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn notify(&self, _event: SecurityEvent) -> Result<(), NotifyError> {
            Err(NotifyError::Delivery("smtp down".into()))
        }
    }

    #[tokio::test]
    async fn dispatch_delivers_on_background_task() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let notifier: Arc<dyn Notifier> = Arc::new(ChannelNotifier(tx));
        let user_id = Uuid::new_v4();
        dispatch(&notifier, SecurityEvent::SessionsRevoked { user_id });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind(), "sessions_revoked");
        assert_eq!(event.user_id(), user_id);
    }

    #[tokio::test]
    async fn failed_delivery_does_not_propagate() {
        let notifier: Arc<dyn Notifier> = Arc::new(FailingNotifier);
        dispatch(
            &notifier,
            SecurityEvent::AccountDeactivated {
                user_id: Uuid::new_v4(),
            },
        );
        tokio::task::yield_now().await;
    }

    #[test]
    fn debug_omits_token() {
        let event = SecurityEvent::PasswordResetRequested {
            user_id: Uuid::new_v4(),
            email: "x@school.test".into(),
            token: "very-secret-token".into(),
            expires_at: Utc::now(),
        };
        assert!(!format!("{event:?}").contains("very-secret-token"));
    }
}
