//! Database model types.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Returned when a stored or submitted enum value is not recognised.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind}: {value:?}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Stores an enum as its lowercase/uppercase text form.
macro_rules! sql_text_enum {
    ($ty:ty) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: ParseEnumError| FromSqlError::Other(Box::new(e)))
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// HTTP method used for a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
        }
    }

    /// Whether a configured body is sent with this method.
    pub fn sends_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

impl FromStr for HttpMethod {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            "PATCH" => Ok(HttpMethod::Patch),
            "HEAD" => Ok(HttpMethod::Head),
            _ => Err(ParseEnumError::new("http method", s)),
        }
    }
}

sql_text_enum!(HttpMethod);

/// Health state of an endpoint, derived from its latest check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EndpointStatus {
    Up,
    Down,
    Degraded,
    #[default]
    Unknown,
}

impl EndpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointStatus::Up => "up",
            EndpointStatus::Down => "down",
            EndpointStatus::Degraded => "degraded",
            EndpointStatus::Unknown => "unknown",
        }
    }
}

impl FromStr for EndpointStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(EndpointStatus::Up),
            "down" => Ok(EndpointStatus::Down),
            "degraded" => Ok(EndpointStatus::Degraded),
            "unknown" => Ok(EndpointStatus::Unknown),
            _ => Err(ParseEnumError::new("endpoint status", s)),
        }
    }
}

sql_text_enum!(EndpointStatus);

/// Outcome class of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Success,
    Failure,
    Timeout,
    Error,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Success => "success",
            CheckStatus::Failure => "failure",
            CheckStatus::Timeout => "timeout",
            CheckStatus::Error => "error",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CheckStatus::Success)
    }
}

impl FromStr for CheckStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(CheckStatus::Success),
            "failure" => Ok(CheckStatus::Failure),
            "timeout" => Ok(CheckStatus::Timeout),
            "error" => Ok(CheckStatus::Error),
            _ => Err(ParseEnumError::new("check status", s)),
        }
    }
}

sql_text_enum!(CheckStatus);

/// Per-channel on/off switches, used both on endpoints and on users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelFlags {
    pub email: bool,
    pub sms: bool,
    pub slack: bool,
}

impl Default for ChannelFlags {
    fn default() -> Self {
        Self {
            email: true,
            sms: false,
            slack: false,
        }
    }
}

/// Alerting configuration of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub enabled: bool,
    pub channels: ChannelFlags,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            channels: ChannelFlags::default(),
        }
    }
}

/// A monitored HTTP target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub url: String,
    pub method: HttpMethod,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    /// Minutes between probes, within [1, 60].
    pub check_interval: u32,
    pub is_active: bool,
    pub status: EndpointStatus,
    pub last_checked: Option<DateTime<Utc>>,
    /// Milliseconds.
    pub last_response_time: i64,
    pub last_status_code: Option<u16>,
    pub notifications: NotificationSettings,
}

pub const MIN_CHECK_INTERVAL: u32 = 1;
pub const MAX_CHECK_INTERVAL: u32 = 60;
pub const DEFAULT_CHECK_INTERVAL: u32 = 5;

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            id: 0,
            user_id: 0,
            name: String::new(),
            url: String::new(),
            method: HttpMethod::Get,
            headers: BTreeMap::new(),
            body: None,
            check_interval: DEFAULT_CHECK_INTERVAL,
            is_active: true,
            status: EndpointStatus::Unknown,
            last_checked: None,
            last_response_time: 0,
            last_status_code: None,
            notifications: NotificationSettings::default(),
        }
    }
}

/// The owner of endpoints and the recipient of their alerts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub slack_webhook_url: Option<String>,
    pub preferences: ChannelFlags,
}

impl Default for User {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            email: String::new(),
            phone: None,
            slack_webhook_url: None,
            preferences: ChannelFlags::default(),
        }
    }
}

/// The immutable record of one probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub id: i64,
    pub endpoint_id: i64,
    pub status: CheckStatus,
    pub status_code: Option<u16>,
    /// Milliseconds from dispatch to completion or timeout.
    pub response_time: i64,
    /// Bytes of response body.
    pub response_size: i64,
    pub error_message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Restricts which check records a query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    #[default]
    Any,
    NonSuccess,
}
