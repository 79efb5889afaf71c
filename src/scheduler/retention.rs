//! Retention manager for purging old check records.

use crate::clock::Clock;
use crate::db::{DbError, Repository};

use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// How often expired records are swept.
pub const RETENTION_PERIOD: Duration = Duration::from_secs(3600);

/// Manager for deleting check records past the retention window.
pub struct RetentionManager {
    repo: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    retention: ChronoDuration,
    stop: Arc<Mutex<Option<tokio::sync::broadcast::Sender<()>>>>,
}

impl RetentionManager {
    pub fn new(repo: Arc<dyn Repository>, clock: Arc<dyn Clock>, retention_days: i64) -> Self {
        Self {
            repo,
            clock,
            retention: ChronoDuration::days(retention_days.max(1)),
            stop: Arc::new(Mutex::new(None)),
        }
    }

    /// Delete every check record older than the retention window.
    pub fn purge_once(&self) -> Result<usize, DbError> {
        let cutoff = self.clock.now() - self.retention;
        let deleted = self.repo.delete_check_results_before(cutoff)?;
        if deleted > 0 {
            tracing::info!("RetentionManager: Deleted {} check records older than {}", deleted, cutoff);
        }
        Ok(deleted)
    }

    /// Start the retention manager background task.
    pub async fn start(self: &Arc<Self>) {
        let (tx, _) = tokio::sync::broadcast::channel(1);
        let mut rx = tx.subscribe();
        {
            let mut stop_guard = self.stop.lock().await;
            if stop_guard.is_some() {
                return;
            }
            *stop_guard = Some(tx);
        }

        let manager = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(RETENTION_PERIOD);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        if let Err(e) = manager.purge_once() {
                            tracing::error!("RetentionManager: Failed to purge check records: {}", e);
                        }
                    }
                }
            }
        });
    }

    /// Stop the retention manager.
    pub async fn stop(&self) {
        if let Some(tx) = self.stop.lock().await.take() {
            let _ = tx.send(());
        }
    }
}
