//! Scheduler module for running due probes on a fixed tick.

mod retention;
mod state;

pub use retention::*;
pub use state::*;

use crate::clock::Clock;
use crate::db::{DbError, Endpoint, Repository};
use crate::probe::Prober;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::{JoinHandle, JoinSet};

/// Fixed period between batches.
pub const TICK_PERIOD: Duration = Duration::from_secs(60);

/// Delay before the first batch after start.
pub const WARMUP_DELAY: Duration = Duration::from_secs(5);

/// Aggregate outcome of one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub successful: usize,
    pub failed: usize,
    pub total: usize,
}

/// Whether `endpoint` should be probed at `now`.
///
/// Inactive endpoints are never due. A never-checked endpoint is always due.
/// Otherwise at least `check_interval` minutes must have elapsed.
pub fn is_due(endpoint: &Endpoint, now: DateTime<Utc>) -> bool {
    if !endpoint.is_active {
        return false;
    }
    match endpoint.last_checked {
        None => true,
        Some(last) => now - last >= ChronoDuration::minutes(i64::from(endpoint.check_interval)),
    }
}

struct Worker {
    stop_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// The main scheduler that orchestrates probe batches.
pub struct Scheduler {
    repo: Arc<dyn Repository>,
    prober: Arc<Prober>,
    updater: Arc<StateUpdater>,
    clock: Arc<dyn Clock>,
    retention: Arc<RetentionManager>,
    batch_lock: Mutex<()>,
    worker: Mutex<Option<Worker>>,
}

impl Scheduler {
    pub fn new(
        repo: Arc<dyn Repository>,
        prober: Arc<Prober>,
        updater: Arc<StateUpdater>,
        clock: Arc<dyn Clock>,
        retention: Arc<RetentionManager>,
    ) -> Self {
        Self {
            repo,
            prober,
            updater,
            clock,
            retention,
            batch_lock: Mutex::new(()),
            worker: Mutex::new(None),
        }
    }

    /// Start the recurring batch loop and the retention manager.
    ///
    /// Starting a running scheduler only logs a warning.
    pub async fn start(self: &Arc<Self>) {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            tracing::warn!("Scheduler already running");
            return;
        }

        let (stop_tx, stop_rx) = broadcast::channel(1);
        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            scheduler.run_loop(stop_rx).await;
        });
        *worker = Some(Worker { stop_tx, handle });
        drop(worker);

        self.retention.start().await;
        tracing::info!("Scheduler started, tick every {:?}", TICK_PERIOD);
    }

    /// Stop the loop and wait for it to exit. No-op when not running.
    pub async fn stop(&self) {
        let worker = self.worker.lock().await.take();
        let Some(worker) = worker else {
            return;
        };

        let _ = worker.stop_tx.send(());
        if let Err(e) = worker.handle.await {
            tracing::error!("Scheduler loop ended abnormally: {}", e);
        }
        self.retention.stop().await;
        tracing::info!("Scheduler stopped");
    }

    #[cfg(test)]
    pub async fn is_running(&self) -> bool {
        self.worker.lock().await.is_some()
    }

    async fn run_loop(&self, mut stop_rx: broadcast::Receiver<()>) {
        let started = tokio::time::Instant::now();

        tokio::select! {
            _ = stop_rx.recv() => return,
            _ = tokio::time::sleep(WARMUP_DELAY) => self.run_logged().await,
        }

        let mut interval = tokio::time::interval_at(started + TICK_PERIOD, TICK_PERIOD);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = stop_rx.recv() => break,
                _ = interval.tick() => self.run_logged().await,
            }
        }
    }

    async fn run_logged(&self) {
        if let Err(e) = self.run_due_batch().await {
            tracing::error!("Scheduler: Batch failed: {}", e);
        }
    }

    /// Probe every due endpoint using the current time.
    pub async fn run_due_batch(&self) -> Result<BatchSummary, DbError> {
        let now = self.clock.now();
        self.run_due_batch_at(now).await
    }

    /// Probe every endpoint due at `now` concurrently and wait for all of them.
    ///
    /// Failing to list endpoints is returned. Anything that goes wrong for a
    /// single endpoint is logged and counted as failed.
    pub async fn run_due_batch_at(&self, now: DateTime<Utc>) -> Result<BatchSummary, DbError> {
        let _batch = self.batch_lock.lock().await;

        let due: Vec<Endpoint> = self
            .repo
            .list_active_endpoints()?
            .into_iter()
            .filter(|e| is_due(e, now))
            .collect();

        let mut summary = BatchSummary {
            total: due.len(),
            ..Default::default()
        };
        if due.is_empty() {
            tracing::debug!("Scheduler: No endpoints due");
            return Ok(summary);
        }

        let mut tasks = JoinSet::new();
        for endpoint in due {
            let prober = self.prober.clone();
            let updater = self.updater.clone();
            tasks.spawn(async move {
                let result = prober.probe(&endpoint).await;
                updater.apply(&endpoint, &result).await.map_err(|e| (endpoint.name, e))
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(_)) => summary.successful += 1,
                Ok(Err((name, e))) => {
                    tracing::error!("Scheduler: Failed to record check for {}: {}", name, e);
                    summary.failed += 1;
                }
                Err(e) => {
                    tracing::error!("Scheduler: Probe task aborted: {}", e);
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            "Scheduler: Batch complete: {} successful, {} failed, {} total",
            summary.successful,
            summary.failed,
            summary.total
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, TokioClock};
    use crate::db::testing::FaultyRepository;
    use crate::db::{CheckStatus, EndpointStatus, Store, User};
    use crate::notify::testing::RecordingSender;
    use crate::notify::{Channel, Dispatcher};
    use crate::probe::testing::{Script, ScriptedTransport};
    use chrono::TimeZone;
    use std::sync::atomic::Ordering;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    struct Harness {
        repo: Arc<FaultyRepository<Store>>,
        transport: Arc<ScriptedTransport>,
        clock: Arc<ManualClock>,
        email: Arc<RecordingSender>,
        scheduler: Arc<Scheduler>,
        user_id: i64,
    }

    impl Harness {
        fn new() -> Self {
            let store = Store::in_memory().unwrap();
            let mut user = User {
                name: "Ops".to_string(),
                email: "ops@example.com".to_string(),
                ..Default::default()
            };
            store.add_user(&mut user).unwrap();

            let repo = Arc::new(FaultyRepository::new(store));
            let transport = Arc::new(ScriptedTransport::new());
            let clock = Arc::new(ManualClock::new(t0()));
            let email = Arc::new(RecordingSender::new(Channel::Email));

            let prober = Arc::new(
                Prober::new(transport.clone(), clock.clone(), Duration::from_secs(2)).without_jitter(),
            );
            let dispatcher = Arc::new(Dispatcher::new(vec![email.clone()]));
            let updater = Arc::new(StateUpdater::new(repo.clone(), dispatcher));
            let retention = Arc::new(RetentionManager::new(repo.clone(), clock.clone(), 30));
            let scheduler = Arc::new(Scheduler::new(repo.clone(), prober, updater, clock.clone(), retention));

            Self {
                repo,
                transport,
                clock,
                email,
                scheduler,
                user_id: user.id,
            }
        }

        fn endpoint(&self, name: &str, last_checked: Option<DateTime<Utc>>) -> Endpoint {
            let mut endpoint = Endpoint {
                user_id: self.user_id,
                name: name.to_string(),
                url: format!("https://{}.example", name),
                check_interval: 5,
                ..Default::default()
            };
            self.repo.inner().add_endpoint(&mut endpoint).unwrap();
            if last_checked.is_some() {
                endpoint.last_checked = last_checked;
                self.repo.inner().save_endpoint(&endpoint).unwrap();
            }
            endpoint
        }
    }

    #[test]
    fn test_is_due_boundaries() {
        let now = t0();
        let mut endpoint = Endpoint {
            check_interval: 5,
            ..Default::default()
        };
        assert!(is_due(&endpoint, now));

        endpoint.last_checked = Some(now - ChronoDuration::minutes(4));
        assert!(!is_due(&endpoint, now));

        endpoint.last_checked = Some(now - ChronoDuration::seconds(299));
        assert!(!is_due(&endpoint, now));

        endpoint.last_checked = Some(now - ChronoDuration::minutes(5));
        assert!(is_due(&endpoint, now));

        endpoint.last_checked = Some(now + ChronoDuration::minutes(1));
        assert!(!is_due(&endpoint, now));

        endpoint.last_checked = None;
        endpoint.is_active = false;
        assert!(!is_due(&endpoint, now));
    }

    #[tokio::test]
    async fn test_due_endpoint_goes_down_on_503() {
        let h = Harness::new();
        let endpoint = h.endpoint("payments", Some(t0() - ChronoDuration::minutes(4)));
        h.transport.script(
            &endpoint.url,
            Script::Respond {
                status: 503,
                body_len: 19,
            },
        );

        // Four minutes since the last check: nothing to do
        let summary = h.scheduler.run_due_batch().await.unwrap();
        assert_eq!(summary, BatchSummary::default());
        assert!(h.transport.sent().is_empty());

        h.clock.advance(ChronoDuration::minutes(1));
        let summary = h.scheduler.run_due_batch().await.unwrap();
        assert_eq!(
            summary,
            BatchSummary {
                successful: 1,
                failed: 0,
                total: 1
            }
        );

        let checks = h.repo.inner().recent_check_results(endpoint.id, None, 5).unwrap();
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].status, CheckStatus::Failure);
        assert_eq!(checks[0].status_code, Some(503));
        assert_eq!(checks[0].error_message.as_deref(), Some("HTTP 503: Service Unavailable"));

        let stored = h.repo.inner().get_endpoint(endpoint.id).unwrap();
        assert_eq!(stored.status, EndpointStatus::Down);
        assert_eq!(stored.last_checked, Some(h.clock.now()));
        assert_eq!(h.email.sent().len(), 1);

        // Just probed, so not due again right away
        let summary = h.scheduler.run_due_batch().await.unwrap();
        assert_eq!(summary.total, 0);
    }

    #[tokio::test]
    async fn test_one_bad_endpoint_does_not_sink_the_batch() {
        let h = Harness::new();
        let ok = h.endpoint("catalog", None);
        let refused = h.endpoint("legacy", None);
        let crashing = h.endpoint("flaky", None);
        h.transport.script(
            &ok.url,
            Script::Respond {
                status: 200,
                body_len: 2,
            },
        );
        h.transport.script(&refused.url, Script::Refuse("connection refused".to_string()));
        h.transport.script(&crashing.url, Script::Panic);

        let summary = h.scheduler.run_due_batch().await.unwrap();
        assert_eq!(
            summary,
            BatchSummary {
                successful: 2,
                failed: 1,
                total: 3
            }
        );

        assert_eq!(h.repo.inner().get_endpoint(ok.id).unwrap().status, EndpointStatus::Up);
        let refused_checks = h.repo.inner().recent_check_results(refused.id, None, 5).unwrap();
        assert_eq!(refused_checks[0].status, CheckStatus::Error);
        assert!(h.repo.inner().recent_check_results(crashing.id, None, 5).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persistence_failures_count_as_failed() {
        let h = Harness::new();
        let a = h.endpoint("alpha", None);
        let b = h.endpoint("beta", None);
        for url in [&a.url, &b.url] {
            h.transport.script(
                url,
                Script::Respond {
                    status: 200,
                    body_len: 0,
                },
            );
        }
        h.repo.fail_append.store(true, Ordering::SeqCst);

        let summary = h.scheduler.run_due_batch().await.unwrap();
        assert_eq!(
            summary,
            BatchSummary {
                successful: 0,
                failed: 2,
                total: 2
            }
        );
        assert_eq!(h.transport.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_listing_failure_is_returned() {
        let h = Harness::new();
        h.endpoint("gamma", None);
        h.repo.fail_list.store(true, Ordering::SeqCst);

        let result = h.scheduler.run_due_batch().await;
        assert!(matches!(result, Err(DbError::Sqlite(_))));
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_inactive_endpoints_are_skipped() {
        let h = Harness::new();
        let endpoint = h.endpoint("paused", None);
        h.repo.inner().set_endpoint_active(endpoint.id, false).unwrap();

        let summary = h.scheduler.run_due_batch().await.unwrap();
        assert_eq!(summary.total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_runs_warmup_batch_and_stop_is_idempotent() {
        let h = Harness::new();
        let endpoint = h.endpoint("warm", None);
        h.transport.script(
            &endpoint.url,
            Script::Respond {
                status: 204,
                body_len: 0,
            },
        );

        h.scheduler.stop().await;
        assert!(!h.scheduler.is_running().await);

        h.scheduler.start().await;
        h.scheduler.start().await;
        assert!(h.scheduler.is_running().await);

        tokio::time::sleep(WARMUP_DELAY + Duration::from_secs(1)).await;
        assert_eq!(h.transport.sent().len(), 1);
        assert_eq!(h.repo.inner().get_endpoint(endpoint.id).unwrap().status, EndpointStatus::Up);

        h.scheduler.stop().await;
        assert!(!h.scheduler.is_running().await);
        h.scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_probes_settle_within_one_timeout() {
        let h = Harness::new();
        for name in ["north", "south", "east"] {
            let endpoint = h.endpoint(name, None);
            h.transport.script(&endpoint.url, Script::Hang);
        }

        let started = tokio::time::Instant::now();
        let summary = h.scheduler.run_due_batch().await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(
            summary,
            BatchSummary {
                successful: 3,
                failed: 0,
                total: 3
            }
        );
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_minute_endpoints_are_probed_every_tick() {
        let store = Store::in_memory().unwrap();
        let mut user = User {
            email: "cadence@example.com".to_string(),
            ..Default::default()
        };
        store.add_user(&mut user).unwrap();
        for name in ["a", "b", "c"] {
            let mut endpoint = Endpoint {
                user_id: user.id,
                name: name.to_string(),
                url: format!("https://{}.example", name),
                check_interval: 1,
                ..Default::default()
            };
            store.add_endpoint(&mut endpoint).unwrap();
        }

        let repo = Arc::new(store);
        let transport = Arc::new(ScriptedTransport::new());
        let clock = Arc::new(TokioClock::new(t0()));
        // Default prober, jitter included
        let prober = Arc::new(Prober::new(transport.clone(), clock.clone(), Duration::from_secs(2)));
        let updater = Arc::new(StateUpdater::new(repo.clone(), Arc::new(Dispatcher::new(vec![]))));
        let retention = Arc::new(RetentionManager::new(repo.clone(), clock.clone(), 30));
        let scheduler = Arc::new(Scheduler::new(repo, prober, updater, clock, retention));

        scheduler.start().await;
        tokio::time::sleep(Duration::from_secs(10 * 60 + 30)).await;
        scheduler.stop().await;

        // Warm-up at 5s is followed by ticks at minutes 2 through 10
        assert_eq!(transport.sent().len(), 3 * 10);
    }
}
