//! Health tiers for endpoint detail views.

use serde::Serialize;

use super::stats::EndpointStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Critical,
    Warning,
    Degraded,
    Healthy,
}

/// Limits for one tier: uptime below, failure rate above or latency above.
struct Tier {
    status: HealthStatus,
    min_uptime: f64,
    max_failure_rate: f64,
    max_response_time: f64,
}

const TIERS: [Tier; 3] = [
    Tier {
        status: HealthStatus::Critical,
        min_uptime: 90.0,
        max_failure_rate: 10.0,
        max_response_time: 1000.0,
    },
    Tier {
        status: HealthStatus::Warning,
        min_uptime: 95.0,
        max_failure_rate: 5.0,
        max_response_time: 500.0,
    },
    Tier {
        status: HealthStatus::Degraded,
        min_uptime: 99.0,
        max_failure_rate: 2.0,
        max_response_time: 250.0,
    },
];

/// The most severe tier any single metric falls into.
///
/// An empty window has zero uptime and is therefore critical.
pub fn classify_health(stats: &EndpointStats) -> HealthStatus {
    let failure_rate = stats.failure_rate();
    let avg = stats.avg_response_time as f64;

    TIERS
        .iter()
        .find(|t| stats.uptime < t.min_uptime || failure_rate > t.max_failure_rate || avg > t.max_response_time)
        .map(|t| t.status)
        .unwrap_or(HealthStatus::Healthy)
}
