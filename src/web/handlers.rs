//! HTTP request handlers.

use super::{ApiError, AppState};
use crate::analytics::{
    Dashboard, EndpointStats, HealthReport, TrendPoint, DEFAULT_CHECKS_LIMIT, DEFAULT_RANGE, DEFAULT_TREND_INTERVAL,
    DEFAULT_TREND_RANGE,
};
use crate::db::{
    ChannelFlags, CheckResult, Endpoint, HttpMethod, NotificationSettings, Repository, User, DEFAULT_CHECK_INTERVAL,
    MAX_CHECK_INTERVAL, MIN_CHECK_INTERVAL,
};
use crate::scheduler::BatchSummary;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;

const NAME_MIN_LEN: usize = 2;
const NAME_MAX_LEN: usize = 100;

type ApiResult<T> = Result<Json<T>, ApiError>;

// ============================================================================
// API: Users
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub slack_webhook_url: Option<String>,
    #[serde(default)]
    pub preferences: Option<ChannelFlags>,
}

pub async fn handle_create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim();
    if !email.contains('@') {
        return Err(ApiError::BadRequest("A valid email address is required".to_string()));
    }

    let mut user = User {
        id: 0,
        name: req.name.trim().to_string(),
        email: email.to_string(),
        phone: req.phone,
        slack_webhook_url: req.slack_webhook_url,
        preferences: req.preferences.unwrap_or_default(),
    };
    state
        .store
        .add_user(&mut user)
        .map_err(|e| ApiError::from_db("user", e))?;

    tracing::info!("Created user {} ({})", user.id, user.email);
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn handle_get_user(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<User> {
    let user = state.store.get_user(id).map_err(|e| ApiError::from_db("user", e))?;
    Ok(Json(user))
}

#[derive(Debug, Deserialize)]
pub struct PreferencesRequest {
    pub email: bool,
    pub sms: bool,
    pub slack: bool,
    /// Absent leaves the value alone, `null` clears it.
    #[serde(default, deserialize_with = "present")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub slack_webhook_url: Option<Option<String>>,
}

/// Distinguish a field sent as `null` from one left out.
fn present<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

pub async fn handle_update_preferences(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<PreferencesRequest>,
) -> ApiResult<User> {
    let mut user = state.store.get_user(id).map_err(|e| ApiError::from_db("user", e))?;

    user.preferences = ChannelFlags {
        email: req.email,
        sms: req.sms,
        slack: req.slack,
    };
    if let Some(phone) = req.phone {
        user.phone = phone;
    }
    if let Some(url) = req.slack_webhook_url {
        user.slack_webhook_url = url;
    }

    state
        .store
        .update_user(&user)
        .map_err(|e| ApiError::from_db("user", e))?;
    Ok(Json(user))
}

pub async fn handle_get_user_endpoints(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Vec<Endpoint>> {
    state.store.get_user(id).map_err(|e| ApiError::from_db("user", e))?;
    let endpoints = state
        .store
        .list_user_endpoints(id, false)
        .map_err(|e| ApiError::from_db("user", e))?;
    Ok(Json(endpoints))
}

pub async fn handle_dashboard(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Dashboard> {
    state.store.get_user(id).map_err(|e| ApiError::from_db("user", e))?;
    let dashboard = state
        .analytics
        .dashboard(id)
        .map_err(|e| ApiError::from_db("user", e))?;
    Ok(Json(dashboard))
}

// ============================================================================
// API: Endpoints
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub check_interval: Option<i64>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub notifications: Option<NotificationSettings>,
}

#[derive(Debug, Deserialize)]
pub struct CreateEndpointRequest {
    pub user_id: i64,
    #[serde(flatten)]
    pub config: EndpointConfig,
}

impl AppState {
    /// Reject configuration the monitoring engine must never see.
    fn validate(&self, cfg: &EndpointConfig) -> Result<(HttpMethod, u32), ApiError> {
        let name_len = cfg.name.trim().chars().count();
        if !(NAME_MIN_LEN..=NAME_MAX_LEN).contains(&name_len) {
            return Err(ApiError::BadRequest(format!(
                "Name must be between {} and {} characters",
                NAME_MIN_LEN, NAME_MAX_LEN
            )));
        }

        if !self.url_pattern.is_match(cfg.url.trim()) {
            return Err(ApiError::BadRequest(
                "URL must start with http:// or https://".to_string(),
            ));
        }

        let method = match cfg.method.as_deref() {
            None => HttpMethod::Get,
            Some(m) => m
                .parse()
                .map_err(|_| ApiError::BadRequest(format!("Unsupported HTTP method: {}", m)))?,
        };

        let interval = cfg.check_interval.unwrap_or(i64::from(DEFAULT_CHECK_INTERVAL));
        let interval = u32::try_from(interval)
            .ok()
            .filter(|i| (MIN_CHECK_INTERVAL..=MAX_CHECK_INTERVAL).contains(i))
            .ok_or_else(|| {
                ApiError::BadRequest(format!(
                    "Check interval must be between {} and {} minutes",
                    MIN_CHECK_INTERVAL, MAX_CHECK_INTERVAL
                ))
            })?;

        Ok((method, interval))
    }
}

fn apply_config(endpoint: &mut Endpoint, cfg: EndpointConfig, method: HttpMethod, interval: u32) {
    endpoint.name = cfg.name.trim().to_string();
    endpoint.url = cfg.url.trim().to_string();
    endpoint.method = method;
    endpoint.headers = cfg.headers;
    endpoint.body = cfg.body;
    endpoint.check_interval = interval;
    if let Some(active) = cfg.is_active {
        endpoint.is_active = active;
    }
    if let Some(notifications) = cfg.notifications {
        endpoint.notifications = notifications;
    }
}

pub async fn handle_create_endpoint(
    State(state): State<AppState>,
    Json(req): Json<CreateEndpointRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (method, interval) = state.validate(&req.config)?;
    state
        .store
        .get_user(req.user_id)
        .map_err(|e| ApiError::from_db("user", e))?;

    let mut endpoint = Endpoint {
        user_id: req.user_id,
        ..Default::default()
    };
    apply_config(&mut endpoint, req.config, method, interval);

    state
        .store
        .add_endpoint(&mut endpoint)
        .map_err(|e| ApiError::from_db("endpoint", e))?;

    tracing::info!("Created endpoint {} ({})", endpoint.name, endpoint.url);
    Ok((StatusCode::CREATED, Json(endpoint)))
}

pub async fn handle_get_endpoint(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Endpoint> {
    let endpoint = state
        .store
        .get_endpoint(id)
        .map_err(|e| ApiError::from_db("endpoint", e))?;
    Ok(Json(endpoint))
}

pub async fn handle_update_endpoint(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(cfg): Json<EndpointConfig>,
) -> ApiResult<Endpoint> {
    let (method, interval) = state.validate(&cfg)?;
    let mut endpoint = state
        .store
        .get_endpoint(id)
        .map_err(|e| ApiError::from_db("endpoint", e))?;

    apply_config(&mut endpoint, cfg, method, interval);
    state
        .store
        .update_endpoint(&endpoint)
        .map_err(|e| ApiError::from_db("endpoint", e))?;
    Ok(Json(endpoint))
}

pub async fn handle_toggle_endpoint(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Endpoint> {
    let mut endpoint = state
        .store
        .get_endpoint(id)
        .map_err(|e| ApiError::from_db("endpoint", e))?;

    endpoint.is_active = !endpoint.is_active;
    state
        .store
        .set_endpoint_active(id, endpoint.is_active)
        .map_err(|e| ApiError::from_db("endpoint", e))?;

    tracing::info!(
        "Endpoint {} is now {}",
        endpoint.name,
        if endpoint.is_active { "active" } else { "paused" }
    );
    Ok(Json(endpoint))
}

pub async fn handle_delete_endpoint(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state
        .store
        .delete_endpoint(id)
        .map_err(|e| ApiError::from_db("endpoint", e))?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// API: Analytics
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AnalyticsQuery {
    #[serde(default)]
    pub range: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub interval: Option<String>,
}

pub async fn handle_get_checks(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<AnalyticsQuery>,
) -> ApiResult<Vec<CheckResult>> {
    let range = query.range.as_deref().unwrap_or(DEFAULT_RANGE);
    let limit = query.limit.unwrap_or(DEFAULT_CHECKS_LIMIT);
    let checks = state
        .analytics
        .checks(id, range, limit)
        .map_err(|e| ApiError::from_db("endpoint", e))?;
    Ok(Json(checks))
}

pub async fn handle_get_stats(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<AnalyticsQuery>,
) -> ApiResult<EndpointStats> {
    let range = query.range.as_deref().unwrap_or(DEFAULT_RANGE);
    let stats = state
        .analytics
        .stats(id, range)
        .map_err(|e| ApiError::from_db("endpoint", e))?;
    Ok(Json(stats))
}

pub async fn handle_get_trend(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<AnalyticsQuery>,
) -> ApiResult<Vec<TrendPoint>> {
    let range = query.range.as_deref().unwrap_or(DEFAULT_TREND_RANGE);
    let interval = query.interval.as_deref().unwrap_or(DEFAULT_TREND_INTERVAL);
    let trend = state
        .analytics
        .trend(id, range, interval)
        .map_err(|e| ApiError::from_db("endpoint", e))?;
    Ok(Json(trend))
}

pub async fn handle_get_health(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<AnalyticsQuery>,
) -> ApiResult<HealthReport> {
    let range = query.range.as_deref().unwrap_or(DEFAULT_RANGE);
    let report = state
        .analytics
        .health(id, range)
        .map_err(|e| ApiError::from_db("endpoint", e))?;
    Ok(Json(report))
}

// ============================================================================
// API: Checks
// ============================================================================

pub async fn handle_run_checks(State(state): State<AppState>) -> ApiResult<BatchSummary> {
    let summary = state
        .scheduler
        .run_due_batch()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(summary))
}
