use axum::{
    Router,
    http::HeaderValue,
    middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::clients::IndexClient;
use crate::clock::SharedClock;
use crate::config::Config;
use crate::domain::events::NotificationEvent;
use crate::services::{JobScheduler, RateLimiter, SearchOrchestrator};
use crate::state::SharedState;

pub mod auth;
mod crawl;
mod error;
pub mod events;
mod jobs;
mod observability;
mod search;
mod system;
mod types;
mod validation;

pub use error::ApiError;
pub use types::*;

use metrics_exporter_prometheus::PrometheusHandle;

#[derive(Clone)]
pub struct AppState {
    pub shared: Arc<SharedState>,

    pub start_time: std::time::Instant,

    pub prometheus_handle: Option<PrometheusHandle>,
}

impl AppState {
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    #[must_use]
    pub fn store(&self) -> &crate::db::Store {
        &self.shared.store
    }

    #[must_use]
    pub fn clock(&self) -> &SharedClock {
        &self.shared.clock
    }

    #[must_use]
    pub fn index(&self) -> &Arc<dyn IndexClient> {
        &self.shared.index
    }

    #[must_use]
    pub fn search(&self) -> &SearchOrchestrator {
        &self.shared.search
    }

    #[must_use]
    pub fn scheduler(&self) -> &JobScheduler {
        &self.shared.scheduler
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.shared.rate_limiter
    }

    #[must_use]
    pub fn event_bus(&self) -> &tokio::sync::broadcast::Sender<NotificationEvent> {
        &self.shared.event_bus
    }
}

#[must_use]
pub fn create_app_state(
    shared: Arc<SharedState>,
    prometheus_handle: Option<PrometheusHandle>,
) -> Arc<AppState> {
    Arc::new(AppState {
        shared,
        start_time: std::time::Instant::now(),
        prometheus_handle,
    })
}

pub async fn create_app_state_from_config(
    config: Config,
    prometheus_handle: Option<PrometheusHandle>,
) -> anyhow::Result<Arc<AppState>> {
    let shared = Arc::new(SharedState::new(config).await?);
    Ok(create_app_state(shared, prometheus_handle))
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors_origins = state.config().server.cors_allowed_origins.clone();

    let api_router = create_protected_router(state.clone()).with_state(state.clone());

    let ops_router = Router::new()
        .route("/", get(system::service_info))
        .route("/health", get(system::health))
        .route("/metrics", get(observability::get_metrics))
        .with_state(state);

    let cors_layer = if cors_origins.contains(&"*".to_string()) {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|s| s.parse().ok()).collect();
        CorsLayer::new().allow_origin(origins)
    };

    Router::new()
        .nest("/api/v1", api_router)
        .merge(ops_router)
        .layer(cors_layer.allow_methods(Any).allow_headers(Any))
        .layer(middleware::from_fn(observability::track_metrics))
        .layer(TraceLayer::new_for_http())
}

/// Routes behind auth and the rate limiter. Layers added later wrap earlier
/// ones, so auth runs first and the limiter sees the resolved identity.
fn create_protected_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/search", post(search::search).get(search::search_get))
        .route("/crawl", post(crawl::submit_crawl))
        .route("/crawl/recrawl", post(crawl::submit_recrawl))
        .route("/jobs/claim", post(jobs::claim_job))
        .route("/jobs/{id}", get(jobs::get_job))
        .route("/jobs/{id}/renew", post(jobs::renew_lease))
        .route("/jobs/{id}/complete", post(jobs::complete_job))
        .route("/jobs/{id}/fail", post(jobs::fail_job))
        .merge(events::router())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::rate_limit_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(state, auth::auth_middleware))
}
