//! Read-only analytics over check history.
//!
//! The pure reductions live in the submodules; [`Analytics`] fetches the
//! right slice of history and feeds it through them.

mod health;
mod incidents;
mod stats;
mod trend;

pub use health::*;
pub use incidents::*;
pub use stats::*;
pub use trend::*;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::clock::Clock;
use crate::db::{CheckResult, DbError, EndpointStatus, Repository, StatusFilter};

pub const DEFAULT_RANGE: &str = "24h";
pub const DEFAULT_TREND_RANGE: &str = "7d";
pub const DEFAULT_TREND_INTERVAL: &str = "1h";
pub const DEFAULT_CHECKS_LIMIT: usize = 100;

/// Most recent failed checks shown on the dashboard.
pub const DASHBOARD_INCIDENTS: usize = 10;

/// Length of a named range. Unknown names fall back to 24 hours.
pub fn time_range_to_window(range: &str) -> ChronoDuration {
    match range {
        "1h" => ChronoDuration::hours(1),
        "7d" => ChronoDuration::days(7),
        "14d" => ChronoDuration::days(14),
        "30d" => ChronoDuration::days(30),
        _ => ChronoDuration::hours(24),
    }
}

/// Latency rating of an endpoint's average response time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Performance {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
    Unknown,
}

/// Average-latency cut points in milliseconds, ascending.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceThresholds {
    pub good: f64,
    pub fair: f64,
    pub poor: f64,
    pub critical: f64,
}

impl Default for PerformanceThresholds {
    fn default() -> Self {
        Self {
            good: 200.0,
            fair: 500.0,
            poor: 1000.0,
            critical: 2000.0,
        }
    }
}

impl PerformanceThresholds {
    /// The most severe tier whose cut point `avg_ms` exceeds.
    pub fn classify(&self, avg_ms: f64) -> Performance {
        if avg_ms > self.critical {
            Performance::Critical
        } else if avg_ms > self.poor {
            Performance::Poor
        } else if avg_ms > self.fair {
            Performance::Fair
        } else if avg_ms > self.good {
            Performance::Good
        } else {
            Performance::Excellent
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSummary {
    pub total_endpoints: usize,
    pub up_endpoints: usize,
    pub down_endpoints: usize,
    pub degraded_endpoints: usize,
    pub unknown_endpoints: usize,
    /// Mean of each endpoint's last response time.
    pub avg_response_time: i64,
    /// Pooled success ratio of all checks in the last 24 hours.
    pub overall_uptime: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointOverview {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub status: EndpointStatus,
    pub last_response_time: i64,
    pub last_checked: Option<DateTime<Utc>>,
}

/// A failed check annotated with the endpoint it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentIncident {
    #[serde(flatten)]
    pub check: CheckResult,
    pub endpoint_name: String,
    pub endpoint_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dashboard {
    pub summary: DashboardSummary,
    pub endpoints: Vec<EndpointOverview>,
    pub recent_incidents: Vec<RecentIncident>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub stats: EndpointStats,
}

/// Query service behind the dashboard and endpoint detail views.
pub struct Analytics {
    repo: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    thresholds: PerformanceThresholds,
}

impl Analytics {
    pub fn new(repo: Arc<dyn Repository>, clock: Arc<dyn Clock>, thresholds: PerformanceThresholds) -> Self {
        Self {
            repo,
            clock,
            thresholds,
        }
    }

    fn since(&self, range: &str) -> DateTime<Utc> {
        self.clock.now() - time_range_to_window(range)
    }

    /// Summary statistics for one endpoint over `range`.
    pub fn stats(&self, endpoint_id: i64, range: &str) -> Result<EndpointStats, DbError> {
        self.repo.get_endpoint(endpoint_id)?;
        let checks = self.repo.query_check_results(endpoint_id, self.since(range))?;
        Ok(summarize(&checks, range, &self.thresholds))
    }

    /// The newest `limit` checks in `range`, newest first.
    pub fn checks(&self, endpoint_id: i64, range: &str, limit: usize) -> Result<Vec<CheckResult>, DbError> {
        self.repo.get_endpoint(endpoint_id)?;
        self.repo
            .recent_check_results(endpoint_id, Some(self.since(range)), limit)
    }

    pub fn trend(&self, endpoint_id: i64, range: &str, interval: &str) -> Result<Vec<TrendPoint>, DbError> {
        self.repo.get_endpoint(endpoint_id)?;
        let checks = self.repo.query_check_results(endpoint_id, self.since(range))?;
        Ok(bucket_trend(&checks, time_range_to_window(interval)))
    }

    pub fn health(&self, endpoint_id: i64, range: &str) -> Result<HealthReport, DbError> {
        let stats = self.stats(endpoint_id, range)?;
        Ok(HealthReport {
            status: classify_health(&stats),
            stats,
        })
    }

    /// Overview of a user's active endpoints.
    pub fn dashboard(&self, user_id: i64) -> Result<Dashboard, DbError> {
        let endpoints = self.repo.list_user_endpoints(user_id, true)?;
        let count = |s: EndpointStatus| endpoints.iter().filter(|e| e.status == s).count();

        let avg_response_time = if endpoints.is_empty() {
            0
        } else {
            let sum: i64 = endpoints.iter().map(|e| e.last_response_time).sum();
            (sum as f64 / endpoints.len() as f64).round() as i64
        };

        let ids: Vec<i64> = endpoints.iter().map(|e| e.id).collect();
        let since = self.since(DEFAULT_RANGE);

        let (overall_uptime, recent_incidents) = if ids.is_empty() {
            (0.0, Vec::new())
        } else {
            let checks = self.repo.query_check_results_for(&ids, since, StatusFilter::Any)?;
            let successful = checks.iter().filter(|c| c.status.is_success()).count();

            let failed = self.repo.query_check_results_for(&ids, since, StatusFilter::NonSuccess)?;
            let incidents = failed
                .into_iter()
                .rev()
                .take(DASHBOARD_INCIDENTS)
                .filter_map(|check| {
                    let endpoint = endpoints.iter().find(|e| e.id == check.endpoint_id)?;
                    Some(RecentIncident {
                        endpoint_name: endpoint.name.clone(),
                        endpoint_url: endpoint.url.clone(),
                        check,
                    })
                })
                .collect();

            (uptime_percent(successful, checks.len()), incidents)
        };

        let summary = DashboardSummary {
            total_endpoints: endpoints.len(),
            up_endpoints: count(EndpointStatus::Up),
            down_endpoints: count(EndpointStatus::Down),
            degraded_endpoints: count(EndpointStatus::Degraded),
            unknown_endpoints: count(EndpointStatus::Unknown),
            avg_response_time,
            overall_uptime,
        };

        Ok(Dashboard {
            summary,
            endpoints: endpoints
                .iter()
                .map(|e| EndpointOverview {
                    id: e.id,
                    name: e.name.clone(),
                    url: e.url.clone(),
                    status: e.status,
                    last_response_time: e.last_response_time,
                    last_checked: e.last_checked,
                })
                .collect(),
            recent_incidents,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::db::{CheckStatus, Endpoint, Store, User};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 1, 12, 0, 0).unwrap()
    }

    struct Fixture {
        store: Arc<Store>,
        analytics: Analytics,
        user_id: i64,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(Store::in_memory().unwrap());
        let mut user = User {
            email: "dash@example.com".to_string(),
            ..Default::default()
        };
        store.add_user(&mut user).unwrap();
        let clock = Arc::new(ManualClock::new(now()));
        let analytics = Analytics::new(store.clone(), clock, PerformanceThresholds::default());
        Fixture {
            store,
            analytics,
            user_id: user.id,
        }
    }

    impl Fixture {
        fn endpoint(&self, name: &str, status: EndpointStatus, last_response_time: i64) -> Endpoint {
            let mut endpoint = Endpoint {
                user_id: self.user_id,
                name: name.to_string(),
                url: format!("https://{}.example", name),
                ..Default::default()
            };
            self.store.add_endpoint(&mut endpoint).unwrap();
            endpoint.status = status;
            endpoint.last_response_time = last_response_time;
            endpoint.last_checked = Some(now());
            self.store.save_endpoint(&endpoint).unwrap();
            endpoint
        }

        fn record(&self, endpoint_id: i64, minutes_ago: i64, status: CheckStatus, response_time: i64) {
            self.store
                .append_check_result(&CheckResult {
                    id: 0,
                    endpoint_id,
                    status,
                    status_code: None,
                    response_time,
                    response_size: 0,
                    error_message: None,
                    checked_at: now() - ChronoDuration::minutes(minutes_ago),
                })
                .unwrap();
        }
    }

    #[test]
    fn test_time_range_to_window() {
        assert_eq!(time_range_to_window("1h").num_milliseconds(), 3_600_000);
        assert_eq!(time_range_to_window("24h").num_milliseconds(), 86_400_000);
        assert_eq!(time_range_to_window("7d").num_milliseconds(), 604_800_000);
        assert_eq!(time_range_to_window("14d").num_milliseconds(), 1_209_600_000);
        assert_eq!(time_range_to_window("30d").num_milliseconds(), 2_592_000_000);
        for unknown in ["", "2h", "1y", "24H"] {
            assert_eq!(time_range_to_window(unknown), time_range_to_window("24h"));
        }
    }

    #[test]
    fn test_performance_tiers() {
        let t = PerformanceThresholds::default();
        assert_eq!(t.classify(120.0), Performance::Excellent);
        assert_eq!(t.classify(200.0), Performance::Excellent);
        assert_eq!(t.classify(200.5), Performance::Good);
        assert_eq!(t.classify(750.0), Performance::Fair);
        assert_eq!(t.classify(1500.0), Performance::Poor);
        assert_eq!(t.classify(2001.0), Performance::Critical);
    }

    #[test]
    fn test_stats_window_and_missing_endpoint() {
        let f = fixture();
        let e = f.endpoint("api", EndpointStatus::Up, 90);
        f.record(e.id, 30, CheckStatus::Success, 80);
        f.record(e.id, 90, CheckStatus::Failure, 500);
        f.record(e.id, 60 * 30, CheckStatus::Failure, 500);

        let hour = f.analytics.stats(e.id, "1h").unwrap();
        assert_eq!(hour.total_checks, 1);
        assert_eq!(hour.uptime, 100.0);

        let day = f.analytics.stats(e.id, "24h").unwrap();
        assert_eq!(day.total_checks, 2);
        assert_eq!(day.uptime, 50.0);

        let week = f.analytics.stats(e.id, "bogus").unwrap();
        assert_eq!(week.total_checks, 2);

        assert!(matches!(f.analytics.stats(9999, "24h"), Err(DbError::NotFound)));
    }

    #[test]
    fn test_checks_newest_first_with_limit() {
        let f = fixture();
        let e = f.endpoint("feed", EndpointStatus::Up, 10);
        for m in [5, 1, 3, 2, 4] {
            f.record(e.id, m, CheckStatus::Success, m * 10);
        }
        let checks = f.analytics.checks(e.id, "1h", 3).unwrap();
        let times: Vec<i64> = checks.iter().map(|c| c.response_time).collect();
        assert_eq!(times, vec![10, 20, 30]);
    }

    #[test]
    fn test_dashboard_pools_uptime() {
        let f = fixture();
        let busy = f.endpoint("busy", EndpointStatus::Up, 100);
        let quiet = f.endpoint("quiet", EndpointStatus::Down, 300);
        let paused = f.endpoint("paused", EndpointStatus::Up, 999);
        f.store.set_endpoint_active(paused.id, false).unwrap();

        // busy: 9 of 9 ok, quiet: 0 of 1 ok. Pooled 90%, not the 50% mean of ratios
        for m in 1..=9 {
            f.record(busy.id, m, CheckStatus::Success, 100);
        }
        f.record(quiet.id, 4, CheckStatus::Timeout, 30_000);
        f.record(paused.id, 2, CheckStatus::Error, 1);
        // Outside the 24h window
        f.record(quiet.id, 60 * 25, CheckStatus::Error, 1);

        let dash = f.analytics.dashboard(f.user_id).unwrap();
        assert_eq!(dash.summary.total_endpoints, 2);
        assert_eq!(dash.summary.up_endpoints, 1);
        assert_eq!(dash.summary.down_endpoints, 1);
        assert_eq!(dash.summary.degraded_endpoints, 0);
        assert_eq!(dash.summary.avg_response_time, 200);
        assert_eq!(dash.summary.overall_uptime, 90.0);
        assert_eq!(dash.endpoints.len(), 2);

        assert_eq!(dash.recent_incidents.len(), 1);
        assert_eq!(dash.recent_incidents[0].endpoint_name, "quiet");
        assert_eq!(dash.recent_incidents[0].check.status, CheckStatus::Timeout);
    }

    #[test]
    fn test_dashboard_recent_incidents_newest_first() {
        let f = fixture();
        let e = f.endpoint("noisy", EndpointStatus::Down, 0);
        for m in 1..=15 {
            f.record(e.id, m, CheckStatus::Failure, 10);
        }
        let dash = f.analytics.dashboard(f.user_id).unwrap();
        assert_eq!(dash.recent_incidents.len(), DASHBOARD_INCIDENTS);
        assert_eq!(dash.recent_incidents[0].check.checked_at, now() - ChronoDuration::minutes(1));
        assert_eq!(dash.summary.overall_uptime, 0.0);
    }

    #[test]
    fn test_empty_dashboard() {
        let f = fixture();
        let dash = f.analytics.dashboard(f.user_id).unwrap();
        assert_eq!(dash.summary.total_endpoints, 0);
        assert_eq!(dash.summary.overall_uptime, 0.0);
        assert!(dash.recent_incidents.is_empty());
    }

    #[test]
    fn test_trend_and_health() {
        let f = fixture();
        let e = f.endpoint("chart", EndpointStatus::Up, 50);
        f.record(e.id, 10, CheckStatus::Success, 50);
        f.record(e.id, 20, CheckStatus::Success, 70);
        f.record(e.id, 60 * 5, CheckStatus::Success, 40);

        let trend = f.analytics.trend(e.id, "24h", "1h").unwrap();
        assert_eq!(trend.len(), 2);
        assert!(trend[0].timestamp < trend[1].timestamp);
        assert_eq!(trend.iter().map(|p| p.total_checks).sum::<usize>(), 3);

        let health = f.analytics.health(e.id, "24h").unwrap();
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.stats.total_checks, 3);

        let empty = f.endpoint("fresh", EndpointStatus::Unknown, 0);
        assert_eq!(f.analytics.health(empty.id, "24h").unwrap().status, HealthStatus::Critical);
    }
}
