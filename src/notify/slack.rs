//! Slack alerts via incoming webhooks.

use async_trait::async_trait;
use std::time::Duration;

use super::{AlertKind, AlertPayload, Channel, NotificationSender, NotifyError};
use crate::db::User;

/// Posts alerts to the user's Slack incoming-webhook URL.
pub struct SlackSender {
    client: reqwest::Client,
}

impl SlackSender {
    pub fn new() -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client })
    }

    fn payload(alert: &AlertPayload) -> serde_json::Value {
        let icon = match alert.kind {
            AlertKind::Down => ":rotating_light:",
            AlertKind::Recovered => ":white_check_mark:",
        };
        serde_json::json!({
            "text": format!("{} *{}*\n{}", icon, alert.subject(), alert.render_text()),
        })
    }
}

#[async_trait]
impl NotificationSender for SlackSender {
    fn channel(&self) -> Channel {
        Channel::Slack
    }

    async fn send(&self, user: &User, alert: &AlertPayload) -> Result<(), NotifyError> {
        let url = user.slack_webhook_url.as_deref().ok_or_else(|| {
            NotifyError::InvalidConfiguration(format!("user {} has no Slack webhook", user.id))
        })?;

        let response = self.client.post(url).json(&Self::payload(alert)).send().await?;

        if !response.status().is_success() {
            return Err(NotifyError::SendFailed(format!(
                "Slack webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
