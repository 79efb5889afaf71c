//! The persistence seam the monitoring engine depends on.

use chrono::{DateTime, Utc};

use super::models::{CheckResult, Endpoint, StatusFilter, User};
use super::store::DbError;

/// Storage operations used by the scheduler, state updater and analytics.
///
/// Implemented by [`super::Store`]; tests wrap it to inject failures.
pub trait Repository: Send + Sync {
    /// All endpoints with `is_active = true`.
    fn list_active_endpoints(&self) -> Result<Vec<Endpoint>, DbError>;

    /// Endpoints owned by a user, optionally only the active ones.
    fn list_user_endpoints(&self, user_id: i64, active_only: bool) -> Result<Vec<Endpoint>, DbError>;

    fn get_endpoint(&self, id: i64) -> Result<Endpoint, DbError>;

    /// Persist the probe-owned fields: status, last check time, last latency and status code.
    fn save_endpoint(&self, endpoint: &Endpoint) -> Result<(), DbError>;

    /// Append a check record and return its id.
    fn append_check_result(&self, result: &CheckResult) -> Result<i64, DbError>;

    /// Newest-first check records for one endpoint.
    fn recent_check_results(
        &self,
        endpoint_id: i64,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<CheckResult>, DbError>;

    /// Oldest-first check records for one endpoint with `checked_at >= since`.
    fn query_check_results(&self, endpoint_id: i64, since: DateTime<Utc>) -> Result<Vec<CheckResult>, DbError>;

    /// Oldest-first check records across several endpoints.
    fn query_check_results_for(
        &self,
        endpoint_ids: &[i64],
        since: DateTime<Utc>,
        filter: StatusFilter,
    ) -> Result<Vec<CheckResult>, DbError>;

    fn get_user(&self, id: i64) -> Result<User, DbError>;

    /// Remove check records older than `cutoff`, returning how many went.
    fn delete_check_results_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError>;
}
