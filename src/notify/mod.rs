//! Alert delivery.
//!
//! An alert goes to every channel enabled both on the endpoint and in the
//! owner's preferences. Delivery failures are logged and swallowed.

mod email;
mod slack;
mod sms;

pub use email::*;
pub use slack::*;
pub use sms::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::db::{ChannelFlags, CheckResult, CheckStatus, Endpoint, User};

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("failed to send notification: {0}")]
    SendFailed(String),
    #[error("invalid configuration for sender: {0}")]
    InvalidConfiguration(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// A delivery medium for alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
    Slack,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Email, Channel::Sms, Channel::Slack];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::Slack => "slack",
        }
    }

    fn is_set(&self, flags: &ChannelFlags) -> bool {
        match self {
            Channel::Email => flags.email,
            Channel::Sms => flags.sms,
            Channel::Slack => flags.slack,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channels switched on for the endpoint and wanted by the user.
pub fn select_channels(endpoint: &ChannelFlags, user: &ChannelFlags) -> Vec<Channel> {
    Channel::ALL
        .into_iter()
        .filter(|c| c.is_set(endpoint) && c.is_set(user))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Down,
    Recovered,
}

/// Everything a channel needs to describe one alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertPayload {
    pub kind: AlertKind,
    pub endpoint_name: String,
    pub endpoint_url: String,
    pub status: CheckStatus,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
    pub response_time: i64,
    pub timestamp: DateTime<Utc>,
}

impl AlertPayload {
    pub fn new(kind: AlertKind, endpoint: &Endpoint, result: &CheckResult) -> Self {
        Self {
            kind,
            endpoint_name: endpoint.name.clone(),
            endpoint_url: endpoint.url.clone(),
            status: result.status,
            status_code: result.status_code,
            error_message: result.error_message.clone(),
            response_time: result.response_time,
            timestamp: result.checked_at,
        }
    }

    pub fn subject(&self) -> String {
        match self.kind {
            AlertKind::Down => format!("API Down Alert: {}", self.endpoint_name),
            AlertKind::Recovered => format!("API Recovered: {}", self.endpoint_name),
        }
    }

    /// Multi-line plain-text description.
    pub fn render_text(&self) -> String {
        let mut lines = vec![
            format!("Endpoint: {}", self.endpoint_name),
            format!("URL: {}", self.endpoint_url),
            format!("Status: {}", self.status.as_str().to_uppercase()),
        ];
        if let Some(code) = self.status_code {
            lines.push(format!("Status Code: {}", code));
        }
        if let Some(err) = &self.error_message {
            lines.push(format!("Error: {}", err));
        }
        lines.push(format!("Response Time: {}ms", self.response_time));
        lines.push(format!("Time: {}", self.timestamp.to_rfc3339()));
        lines.join("\n")
    }
}

/// Sends alerts over one channel.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    fn channel(&self) -> Channel;

    async fn send(&self, user: &User, alert: &AlertPayload) -> Result<(), NotifyError>;
}

/// Routes an alert to the senders of the selected channels.
pub struct Dispatcher {
    senders: Vec<Arc<dyn NotificationSender>>,
}

impl Dispatcher {
    pub fn new(senders: Vec<Arc<dyn NotificationSender>>) -> Self {
        Self { senders }
    }

    /// Email, SMS and Slack senders.
    pub fn with_default_senders() -> Result<Self, NotifyError> {
        Ok(Self::new(vec![
            Arc::new(EmailSender::new()),
            Arc::new(SmsSender::new()),
            Arc::new(SlackSender::new()?),
        ]))
    }

    /// Deliver an alert and return how many channels accepted it.
    pub async fn dispatch(&self, endpoint: &Endpoint, user: &User, alert: &AlertPayload) -> usize {
        if !endpoint.notifications.enabled {
            return 0;
        }

        let mut delivered = 0;
        for channel in select_channels(&endpoint.notifications.channels, &user.preferences) {
            for sender in self.senders.iter().filter(|s| s.channel() == channel) {
                match sender.send(user, alert).await {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        tracing::error!(
                            endpoint_id = endpoint.id,
                            channel = %channel,
                            "Notification error for {}: {}",
                            endpoint.name,
                            e
                        );
                    }
                }
            }
        }

        if delivered > 0 {
            tracing::info!("Alert sent for endpoint: {} ({:?})", endpoint.name, alert.kind);
        }
        delivered
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingSender;
    use super::*;
    use chrono::TimeZone;

    fn flags(email: bool, sms: bool, slack: bool) -> ChannelFlags {
        ChannelFlags { email, sms, slack }
    }

    fn alert() -> AlertPayload {
        AlertPayload {
            kind: AlertKind::Down,
            endpoint_name: "Billing".to_string(),
            endpoint_url: "https://billing.example".to_string(),
            status: CheckStatus::Failure,
            status_code: Some(500),
            error_message: Some("HTTP 500: Internal Server Error".to_string()),
            response_time: 87,
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap(),
        }
    }

    #[test]
    fn test_channel_intersection() {
        assert_eq!(
            select_channels(&flags(true, true, false), &flags(true, false, true)),
            vec![Channel::Email]
        );
        assert!(select_channels(&flags(false, true, false), &flags(true, false, true)).is_empty());
        assert_eq!(
            select_channels(&flags(true, true, true), &flags(true, true, true)),
            Channel::ALL.to_vec()
        );
    }

    #[test]
    fn test_render_text() {
        let text = alert().render_text();
        assert!(text.contains("Status: FAILURE"));
        assert!(text.contains("Status Code: 500"));
        assert!(text.contains("Response Time: 87ms"));
        assert_eq!(alert().subject(), "API Down Alert: Billing");
    }

    #[tokio::test]
    async fn test_dispatch_routes_and_swallows_failures() {
        let email = Arc::new(RecordingSender::new(Channel::Email));
        let sms = Arc::new(RecordingSender::failing(Channel::Sms));
        let slack = Arc::new(RecordingSender::new(Channel::Slack));
        let dispatcher = Dispatcher::new(vec![email.clone(), sms.clone(), slack.clone()]);

        let mut endpoint = Endpoint::default();
        endpoint.notifications.channels = flags(true, true, true);
        let user = User {
            id: 3,
            preferences: flags(true, true, false),
            ..Default::default()
        };

        let delivered = dispatcher.dispatch(&endpoint, &user, &alert()).await;
        assert_eq!(delivered, 1);
        assert_eq!(email.sent().len(), 1);
        assert_eq!(email.sent()[0].0, 3);
        assert!(slack.sent().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_endpoint_sends_nothing() {
        let email = Arc::new(RecordingSender::new(Channel::Email));
        let dispatcher = Dispatcher::new(vec![email.clone()]);

        let mut endpoint = Endpoint::default();
        endpoint.notifications.enabled = false;

        assert_eq!(dispatcher.dispatch(&endpoint, &User::default(), &alert()).await, 0);
        assert!(email.sent().is_empty());
    }
}
