//! Email alerts.

use async_trait::async_trait;

use super::{AlertPayload, Channel, NotificationSender, NotifyError};
use crate::db::User;

/// Renders alert mail and hands it to the mail log.
///
/// Delivery over SMTP is left to whatever relay tails the `uptrail::mail` target.
#[derive(Debug, Default)]
pub struct EmailSender;

impl EmailSender {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NotificationSender for EmailSender {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, user: &User, alert: &AlertPayload) -> Result<(), NotifyError> {
        if user.email.trim().is_empty() {
            return Err(NotifyError::InvalidConfiguration(format!(
                "user {} has no email address",
                user.id
            )));
        }

        tracing::info!(
            target: "uptrail::mail",
            to = %user.email,
            subject = %alert.subject(),
            "{}",
            alert.render_text()
        );
        Ok(())
    }
}
