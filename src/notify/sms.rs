//! SMS alerts.

use async_trait::async_trait;

use super::{AlertPayload, Channel, NotificationSender, NotifyError};
use crate::db::User;

/// Longest message that fits a single SMS segment.
const SMS_MAX_LEN: usize = 160;

/// Formats a one-line alert for the SMS gateway log.
#[derive(Debug, Default)]
pub struct SmsSender;

impl SmsSender {
    pub fn new() -> Self {
        Self
    }

    pub fn render(alert: &AlertPayload) -> String {
        let detail = alert
            .error_message
            .clone()
            .unwrap_or_else(|| alert.status.as_str().to_string());
        let text = format!("{}: {} ({})", alert.subject(), alert.endpoint_url, detail);
        text.chars().take(SMS_MAX_LEN).collect()
    }
}

#[async_trait]
impl NotificationSender for SmsSender {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    async fn send(&self, user: &User, alert: &AlertPayload) -> Result<(), NotifyError> {
        let phone = user
            .phone
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| NotifyError::InvalidConfiguration(format!("user {} has no phone number", user.id)))?;

        tracing::info!(target: "uptrail::sms", to = %phone, "{}", Self::render(alert));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CheckStatus;
    use crate::notify::AlertKind;
    use chrono::Utc;

    #[test]
    fn test_render_fits_one_segment() {
        let alert = AlertPayload {
            kind: AlertKind::Down,
            endpoint_name: "x".repeat(200),
            endpoint_url: "https://a.example".to_string(),
            status: CheckStatus::Error,
            status_code: None,
            error_message: None,
            response_time: 3,
            timestamp: Utc::now(),
        };
        assert_eq!(SmsSender::render(&alert).chars().count(), SMS_MAX_LEN);
    }

    #[tokio::test]
    async fn test_requires_phone() {
        let alert = AlertPayload {
            kind: AlertKind::Recovered,
            endpoint_name: "Auth".to_string(),
            endpoint_url: "https://auth.example".to_string(),
            status: CheckStatus::Success,
            status_code: Some(200),
            error_message: None,
            response_time: 40,
            timestamp: Utc::now(),
        };
        let sender = SmsSender::new();
        tokio_test::assert_err!(sender.send(&User::default(), &alert).await);

        let user = User {
            phone: Some("+15550100".to_string()),
            ..Default::default()
        };
        tokio_test::assert_ok!(sender.send(&user, &alert).await);
    }
}
