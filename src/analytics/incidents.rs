//! Incident detection: maximal runs of non-successful checks.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::{CheckResult, CheckStatus};

/// A contiguous run of failed checks for one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Incident {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// `end_time - start_time` in milliseconds. Zero for a single failed check.
    pub duration_ms: i64,
    pub failed_checks: usize,
    /// Status of the check that opened the incident.
    pub error_type: CheckStatus,
}

impl Incident {
    fn open(check: &CheckResult) -> Self {
        Self {
            start_time: check.checked_at,
            end_time: check.checked_at,
            duration_ms: 0,
            failed_checks: 1,
            error_type: check.status,
        }
    }

    fn close(mut self) -> Self {
        self.duration_ms = (self.end_time - self.start_time).num_milliseconds();
        self
    }
}

/// Run-length encode `checks` into incidents, newest first.
///
/// Input order does not matter; checks are put in time order first.
pub fn find_incidents(checks: &[CheckResult]) -> Vec<Incident> {
    let mut ordered: Vec<&CheckResult> = checks.iter().collect();
    ordered.sort_by_key(|c| (c.checked_at, c.id));

    let mut incidents = Vec::new();
    let mut current: Option<Incident> = None;

    for check in ordered {
        if check.status.is_success() {
            if let Some(incident) = current.take() {
                incidents.push(incident.close());
            }
            continue;
        }
        match current.as_mut() {
            Some(incident) => {
                incident.end_time = check.checked_at;
                incident.failed_checks += 1;
            }
            None => current = Some(Incident::open(check)),
        }
    }

    // Still failing at the end of the window
    if let Some(incident) = current {
        incidents.push(incident.close());
    }

    incidents.reverse();
    incidents
}
