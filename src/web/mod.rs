//! Web server module.

mod error;
mod handlers;

pub use error::*;
pub use handlers::*;

use crate::analytics::Analytics;
use crate::config::ServerConfig;
use crate::db::Store;
use crate::scheduler::Scheduler;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use regex::Regex;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Accepted endpoint URLs.
const URL_PATTERN: &str = r"^https?://.+";

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<Store>,
    pub scheduler: Arc<Scheduler>,
    pub analytics: Arc<Analytics>,
    url_pattern: Regex,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        store: Arc<Store>,
        scheduler: Arc<Scheduler>,
        analytics: Arc<Analytics>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            config,
            store,
            scheduler,
            analytics,
            url_pattern: Regex::new(URL_PATTERN)?,
        })
    }
}

/// Build the router with all routes.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        // Users
        .route("/api/users", post(handlers::handle_create_user))
        .route("/api/users/{id}", get(handlers::handle_get_user))
        .route("/api/users/{id}/preferences", put(handlers::handle_update_preferences))
        .route("/api/users/{id}/endpoints", get(handlers::handle_get_user_endpoints))
        .route("/api/users/{id}/dashboard", get(handlers::handle_dashboard))
        // Endpoints
        .route("/api/endpoints", post(handlers::handle_create_endpoint))
        .route(
            "/api/endpoints/{id}",
            get(handlers::handle_get_endpoint)
                .put(handlers::handle_update_endpoint)
                .delete(handlers::handle_delete_endpoint),
        )
        .route("/api/endpoints/{id}/toggle", put(handlers::handle_toggle_endpoint))
        // Analytics
        .route("/api/endpoints/{id}/checks", get(handlers::handle_get_checks))
        .route("/api/endpoints/{id}/stats", get(handlers::handle_get_stats))
        .route("/api/endpoints/{id}/trend", get(handlers::handle_get_trend))
        .route("/api/endpoints/{id}/health", get(handlers::handle_get_health))
        // Manual batch
        .route("/api/checks/run", post(handlers::handle_run_checks))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
        .with_state(state)
}

/// Web server for Uptrail.
pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = router(self.state.clone());

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
