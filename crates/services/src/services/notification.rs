//! Fire-and-forget notifications. Delivery failures are logged and never surface to the
//! caller.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use strum_macros::Display;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[strum(serialize_all = "snake_case")]
pub enum NotificationType {
    ReferralUsageCompletedReferee,
    ReferralUsageCompletedReferrer,
    ReferralBlockedReferrer,
    ReferralUnblockedReferrer,
    ProgramExpiringSoon,
    ProgramExpired,
    ProgramUnCompletable,
    ProgramUnCompletableWarning,
    ProgramRestored,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Recipient {
    User(Uuid),
    Administrators,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: NotificationType,
    pub recipient: Recipient,
    pub subject: String,
    pub message: String,
}

#[async_trait]
pub trait NotificationDelivery: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError>;
}

/// Writes notifications to the log; the default until a real channel is wired in
pub struct LogDelivery;

#[async_trait]
impl NotificationDelivery for LogDelivery {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError> {
        info!(
            kind = %notification.kind,
            recipient = ?notification.recipient,
            subject = %notification.subject,
            "{}",
            notification.message
        );
        Ok(())
    }
}

#[derive(Clone)]
pub struct NotificationService {
    delivery: Arc<dyn NotificationDelivery>,
}

impl Default for NotificationService {
    fn default() -> Self {
        Self::new(Arc::new(LogDelivery))
    }
}

impl NotificationService {
    pub fn new(delivery: Arc<dyn NotificationDelivery>) -> Self {
        Self { delivery }
    }

    pub async fn notify(&self, notification: Notification) {
        if let Err(e) = self.delivery.deliver(&notification).await {
            warn!(
                kind = %notification.kind,
                recipient = ?notification.recipient,
                error = %e,
                "Failed to send notification"
            );
        }
    }

    /// Send each notification independently; one failure does not stop the rest
    pub async fn notify_all(&self, notifications: Vec<Notification>) {
        for notification in notifications {
            self.notify(notification).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct FlakyDelivery {
        delivered: Mutex<Vec<NotificationType>>,
    }

    #[async_trait]
    impl NotificationDelivery for FlakyDelivery {
        async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError> {
            if notification.kind == NotificationType::ProgramExpired {
                return Err(NotificationError::Delivery("smtp unavailable".to_string()));
            }
            self.delivered.lock().unwrap().push(notification.kind);
            Ok(())
        }
    }

    fn notification(kind: NotificationType) -> Notification {
        Notification {
            kind,
            recipient: Recipient::Administrators,
            subject: "subject".to_string(),
            message: "message".to_string(),
        }
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_remaining_notifications() {
        let delivery = Arc::new(FlakyDelivery {
            delivered: Mutex::new(Vec::new()),
        });
        let service = NotificationService::new(delivery.clone());

        service
            .notify_all(vec![
                notification(NotificationType::ProgramExpired),
                notification(NotificationType::ProgramRestored),
            ])
            .await;

        assert_eq!(
            *delivery.delivered.lock().unwrap(),
            vec![NotificationType::ProgramRestored]
        );
    }
}
