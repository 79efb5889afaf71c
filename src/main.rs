//! Uptrail - HTTP endpoint uptime monitoring.
//!
//! Probes registered endpoints on a fixed tick, records every check,
//! alerts on new failures and serves analytics over a JSON API.

mod analytics;
mod clock;
mod config;
mod db;
mod notify;
mod probe;
mod scheduler;
mod web;

use analytics::Analytics;
use clock::{Clock, SystemClock};
use config::ServerConfig;
use db::Store;
use notify::Dispatcher;
use probe::{Prober, ReqwestTransport};
use scheduler::{RetentionManager, Scheduler, StateUpdater};
use web::{AppState, Server};

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("uptrail=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting Uptrail on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Probing and alerting
    let transport = Arc::new(ReqwestTransport::new()?);
    let prober = Arc::new(Prober::new(transport, clock.clone(), cfg.request_timeout));
    let dispatcher = Arc::new(Dispatcher::with_default_senders()?);
    let updater = Arc::new(StateUpdater::new(store.clone(), dispatcher).with_recovery_alerts(cfg.recovery_alerts));
    let retention = Arc::new(RetentionManager::new(store.clone(), clock.clone(), cfg.retention_days));

    // Start scheduler
    let scheduler = Arc::new(Scheduler::new(store.clone(), prober, updater, clock.clone(), retention));
    scheduler.start().await;

    let analytics = Arc::new(Analytics::new(store.clone(), clock, cfg.thresholds));

    // Start web server
    let state = AppState::new(cfg, store, scheduler.clone(), analytics)?;
    let server = Server::new(state);

    tokio::select! {
        result = server.start() => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
    }

    scheduler.stop().await;
    Ok(())
}
