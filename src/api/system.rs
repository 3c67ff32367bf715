//! Operational endpoints: service info and health.
//!
//! Neither is authenticated nor rate limited. Health always answers 200 and
//! reports `degraded` when a dependency does not respond, so a load balancer
//! can tell a slow index apart from a dead process.

use axum::{Json, extract::State};
use std::sync::Arc;
use tracing::warn;

use super::{ApiResponse, AppState, DependencyHealth, HealthResponse, ServiceInfo};

const CONNECTED: &str = "connected";
const DISCONNECTED: &str = "disconnected";

/// `GET /`
pub async fn service_info() -> Json<ApiResponse<ServiceInfo>> {
    Json(ApiResponse::success(ServiceInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        endpoints: vec![
            "POST /api/v1/search",
            "GET /api/v1/search",
            "POST /api/v1/crawl/recrawl",
            "POST /api/v1/crawl",
            "GET /api/v1/jobs/{id}",
            "POST /api/v1/jobs/claim",
            "GET /health",
            "GET /metrics",
        ],
    }))
}

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<ApiResponse<HealthResponse>> {
    let (db, index) = tokio::join!(state.store().ping(), state.index().ping());

    let database = match db {
        Ok(()) => CONNECTED,
        Err(e) => {
            warn!(event = "health_check_failed", dependency = "database", error = %e);
            DISCONNECTED
        }
    };
    let index = if index {
        CONNECTED
    } else {
        warn!(event = "health_check_failed", dependency = "index");
        DISCONNECTED
    };

    let status = if database == CONNECTED && index == CONNECTED {
        "healthy"
    } else {
        "degraded"
    };

    Json(ApiResponse::success(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        dependencies: DependencyHealth { database, index },
        queue_depth: state.scheduler().queue_depth(),
        active_jobs: state.scheduler().active_jobs(),
        in_flight_searches: state.search().in_flight(),
    }))
}
