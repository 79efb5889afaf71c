//! Fixed-width time buckets for charting.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use super::stats::uptime_percent;
use crate::db::CheckResult;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    /// Start of the bucket.
    pub timestamp: DateTime<Utc>,
    pub avg_response_time: i64,
    pub uptime: f64,
    pub total_checks: usize,
}

#[derive(Default)]
struct Bucket {
    total: usize,
    successful: usize,
    latency_sum: i64,
}

/// Group checks into `interval`-wide buckets keyed by
/// `floor(checked_at_ms / interval_ms) * interval_ms`.
///
/// Only buckets holding at least one check are returned, oldest first.
pub fn bucket_trend(checks: &[CheckResult], interval: ChronoDuration) -> Vec<TrendPoint> {
    let interval_ms = interval.num_milliseconds().max(1);
    let mut buckets: BTreeMap<i64, Bucket> = BTreeMap::new();

    for check in checks {
        let key = check.checked_at.timestamp_millis().div_euclid(interval_ms) * interval_ms;
        let bucket = buckets.entry(key).or_default();
        bucket.total += 1;
        if check.status.is_success() {
            bucket.successful += 1;
            bucket.latency_sum += check.response_time;
        }
    }

    buckets
        .into_iter()
        .filter_map(|(key, b)| {
            let avg = if b.successful == 0 {
                0
            } else {
                (b.latency_sum as f64 / b.successful as f64).round() as i64
            };
            Some(TrendPoint {
                timestamp: DateTime::from_timestamp_millis(key)?,
                avg_response_time: avg,
                uptime: uptime_percent(b.successful, b.total),
                total_checks: b.total,
            })
        })
        .collect()
}
