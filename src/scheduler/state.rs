//! Applies probe outcomes to endpoint state and decides when to alert.

use std::sync::Arc;

use crate::db::{CheckResult, DbError, Endpoint, EndpointStatus, Repository};
use crate::notify::{AlertKind, AlertPayload, Dispatcher};

/// What applying one result did.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOutcome {
    pub endpoint: Endpoint,
    pub alert: Option<AlertKind>,
    pub delivered: usize,
}

/// Writes status fields, records the check and fires alerts on transitions.
pub struct StateUpdater {
    repo: Arc<dyn Repository>,
    dispatcher: Arc<Dispatcher>,
    recovery_alerts: bool,
}

impl StateUpdater {
    pub fn new(repo: Arc<dyn Repository>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            repo,
            dispatcher,
            recovery_alerts: false,
        }
    }

    /// Also notify when a failing endpoint answers successfully again.
    pub fn with_recovery_alerts(mut self, enabled: bool) -> Self {
        self.recovery_alerts = enabled;
        self
    }

    /// Apply a result: state write, then check record, then alert.
    ///
    /// Each step runs even if an earlier one failed; the first persistence
    /// error is returned once all of them have been attempted. Notification
    /// failures are never returned.
    pub async fn apply(&self, endpoint: &Endpoint, result: &CheckResult) -> Result<ApplyOutcome, DbError> {
        let mut first_error: Option<DbError> = None;

        // The check immediately before this one, for debouncing
        let previous = match self.repo.recent_check_results(endpoint.id, None, 1) {
            Ok(mut checks) => Ok(checks.pop()),
            Err(e) => {
                tracing::error!("Failed to load previous check for {}: {}", endpoint.name, e);
                Err(e)
            }
        };

        let updated = apply_result(endpoint, result);
        if let Err(e) = self.repo.save_endpoint(&updated) {
            tracing::error!("Failed to save status for {}: {}", endpoint.name, e);
            first_error.get_or_insert(e);
        }

        if let Err(e) = self.repo.append_check_result(result) {
            tracing::error!("Failed to record check for {}: {}", endpoint.name, e);
            first_error.get_or_insert(e);
        }

        let alert = match previous {
            Ok(previous) => decide_alert(result, previous.as_ref(), self.recovery_alerts),
            Err(e) => {
                first_error.get_or_insert(e);
                None
            }
        };

        let mut delivered = 0;
        if let Some(kind) = alert {
            if endpoint.notifications.enabled {
                delivered = self.notify(&updated, result, kind).await;
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(ApplyOutcome {
                endpoint: updated,
                alert,
                delivered,
            }),
        }
    }

    async fn notify(&self, endpoint: &Endpoint, result: &CheckResult, kind: AlertKind) -> usize {
        let user = match self.repo.get_user(endpoint.user_id) {
            Ok(user) => user,
            Err(e) => {
                tracing::error!("User not found for notification on {}: {}", endpoint.name, e);
                return 0;
            }
        };

        let payload = AlertPayload::new(kind, endpoint, result);
        self.dispatcher.dispatch(endpoint, &user, &payload).await
    }
}

/// The endpoint as it should look after `result`.
pub fn apply_result(endpoint: &Endpoint, result: &CheckResult) -> Endpoint {
    let mut updated = endpoint.clone();
    updated.status = if result.status.is_success() {
        EndpointStatus::Up
    } else {
        EndpointStatus::Down
    };
    // Never move backwards
    updated.last_checked = Some(match endpoint.last_checked {
        Some(prev) if prev > result.checked_at => prev,
        _ => result.checked_at,
    });
    updated.last_response_time = result.response_time;
    updated.last_status_code = result.status_code;
    updated
}

/// Whether `current` is a transition worth telling someone about.
///
/// A failure alerts when there is no earlier check or the earlier check
/// succeeded. A success alerts only when recovery notices are on and the
/// earlier check failed.
pub fn decide_alert(current: &CheckResult, previous: Option<&CheckResult>, recovery_alerts: bool) -> Option<AlertKind> {
    let previous_ok = previous.map(|p| p.status.is_success());
    if current.status.is_success() {
        (recovery_alerts && previous_ok == Some(false)).then_some(AlertKind::Recovered)
    } else {
        (previous_ok != Some(false)).then_some(AlertKind::Down)
    }
}
