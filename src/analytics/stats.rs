//! Per-endpoint summary statistics.

use serde::Serialize;
use tdigests::TDigest;

use super::incidents::{find_incidents, Incident};
use super::{Performance, PerformanceThresholds};
use crate::db::CheckResult;

/// Most incidents reported in one summary.
pub const MAX_INCIDENTS: usize = 10;

/// Centroid budget for the latency digest.
const DIGEST_SIZE: usize = 100;

/// Successful checks grouped by latency band.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Distribution {
    /// Under 200ms.
    pub fast: usize,
    /// 200ms to 499ms.
    pub normal: usize,
    /// 500ms to 999ms.
    pub slow: usize,
    /// 1000ms and above.
    pub very_slow: usize,
}

impl Distribution {
    fn add(&mut self, response_time: i64) {
        match response_time {
            t if t < 200 => self.fast += 1,
            t if t < 500 => self.normal += 1,
            t if t < 1000 => self.slow += 1,
            _ => self.very_slow += 1,
        }
    }
}

/// Estimated latency percentiles over successful checks, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Percentiles {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointStats {
    /// Percentage of successful checks, two decimals.
    pub uptime: f64,
    /// Mean latency of successful checks, whole milliseconds.
    pub avg_response_time: i64,
    pub min_response_time: Option<i64>,
    pub max_response_time: Option<i64>,
    pub percentiles: Option<Percentiles>,
    pub total_checks: usize,
    pub successful_checks: usize,
    pub failed_checks: usize,
    pub performance: Performance,
    pub distribution: Distribution,
    pub incidents: Vec<Incident>,
    pub time_range: String,
}

impl EndpointStats {
    /// The result for a window with no checks at all.
    pub fn empty(time_range: &str) -> Self {
        Self {
            uptime: 0.0,
            avg_response_time: 0,
            min_response_time: None,
            max_response_time: None,
            percentiles: None,
            total_checks: 0,
            successful_checks: 0,
            failed_checks: 0,
            performance: Performance::Unknown,
            distribution: Distribution::default(),
            incidents: Vec::new(),
            time_range: time_range.to_string(),
        }
    }

    /// Share of non-successful checks as a percentage.
    pub fn failure_rate(&self) -> f64 {
        if self.total_checks == 0 {
            0.0
        } else {
            self.failed_checks as f64 / self.total_checks as f64 * 100.0
        }
    }
}

/// Summarize the checks of one endpoint over a window.
pub fn summarize(checks: &[CheckResult], time_range: &str, thresholds: &PerformanceThresholds) -> EndpointStats {
    if checks.is_empty() {
        return EndpointStats::empty(time_range);
    }

    let latencies: Vec<i64> = checks
        .iter()
        .filter(|c| c.status.is_success())
        .map(|c| c.response_time)
        .collect();

    let total = checks.len();
    let successful = latencies.len();

    let avg = if latencies.is_empty() {
        0.0
    } else {
        latencies.iter().sum::<i64>() as f64 / successful as f64
    };

    let mut distribution = Distribution::default();
    for t in &latencies {
        distribution.add(*t);
    }

    let mut incidents = find_incidents(checks);
    incidents.truncate(MAX_INCIDENTS);

    EndpointStats {
        uptime: uptime_percent(successful, total),
        avg_response_time: avg.round() as i64,
        min_response_time: latencies.iter().min().copied(),
        max_response_time: latencies.iter().max().copied(),
        percentiles: percentiles(&latencies),
        total_checks: total,
        successful_checks: successful,
        failed_checks: total - successful,
        performance: thresholds.classify(avg),
        distribution,
        incidents,
        time_range: time_range.to_string(),
    }
}

/// `successful / total` as a percentage rounded to two decimals; 0 when empty.
pub fn uptime_percent(successful: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round2(successful as f64 / total as f64 * 100.0)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn percentiles(latencies: &[i64]) -> Option<Percentiles> {
    if latencies.is_empty() {
        return None;
    }
    let mut digest = TDigest::from_values(latencies.iter().map(|&t| t as f64).collect());
    digest.compress(DIGEST_SIZE);
    Some(Percentiles {
        p50: digest.estimate_quantile(0.50),
        p95: digest.estimate_quantile(0.95),
        p99: digest.estimate_quantile(0.99),
    })
}
