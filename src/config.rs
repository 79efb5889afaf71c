//! Configuration module for Uptrail.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::analytics::PerformanceThresholds;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the API server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "uptrail.db")
    pub db_path: String,
    /// Upper bound on a single probe (default: 30s)
    pub request_timeout: Duration,
    /// Check records older than this many days are purged (default: 30)
    pub retention_days: i64,
    /// Send a notice when a failing endpoint answers successfully again (default: false)
    pub recovery_alerts: bool,
    /// Average-latency cut points for the performance tier
    pub thresholds: PerformanceThresholds,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "uptrail.db".to_string(),
            request_timeout: Duration::from_millis(30_000),
            retention_days: 30,
            recovery_alerts: false,
            thresholds: PerformanceThresholds::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `UPTRAIL_HTTP_PORT`: HTTP port (default: 8080)
    /// - `UPTRAIL_DB_PATH`: Database file path (default: "uptrail.db")
    /// - `UPTRAIL_REQUEST_TIMEOUT_MS`: Probe timeout in milliseconds (default: 30000)
    /// - `UPTRAIL_RETENTION_DAYS`: Check record retention (default: 30)
    /// - `UPTRAIL_RECOVERY_ALERTS`: `true`/`false` (default: false)
    /// - `UPTRAIL_PERF_{GOOD,FAIR,POOR,CRITICAL}_MS`: performance tier cut points
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    ///
    /// Unset or unparsable values keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(port) = parsed(&lookup, "UPTRAIL_HTTP_PORT") {
            cfg.http_port = port;
        }

        if let Some(db_path) = lookup("UPTRAIL_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Some(ms) = parsed::<u64, _>(&lookup, "UPTRAIL_REQUEST_TIMEOUT_MS") {
            if ms > 0 {
                cfg.request_timeout = Duration::from_millis(ms);
            }
        }

        if let Some(days) = parsed::<i64, _>(&lookup, "UPTRAIL_RETENTION_DAYS") {
            if days > 0 {
                cfg.retention_days = days;
            }
        }

        if let Some(flag) = parsed(&lookup, "UPTRAIL_RECOVERY_ALERTS") {
            cfg.recovery_alerts = flag;
        }

        if let Some(v) = parsed(&lookup, "UPTRAIL_PERF_GOOD_MS") {
            cfg.thresholds.good = v;
        }
        if let Some(v) = parsed(&lookup, "UPTRAIL_PERF_FAIR_MS") {
            cfg.thresholds.fair = v;
        }
        if let Some(v) = parsed(&lookup, "UPTRAIL_PERF_POOR_MS") {
            cfg.thresholds.poor = v;
        }
        if let Some(v) = parsed(&lookup, "UPTRAIL_PERF_CRITICAL_MS") {
            cfg.thresholds.critical = v;
        }

        cfg
    }
}

fn parsed<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring unparsable value for {}: {:?}", key, raw);
            None
        }
    }
}
