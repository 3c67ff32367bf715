use crate::api::AppState;
use crate::constants::headers::PROCESS_TIME;
use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

pub async fn get_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.prometheus_handle.as_ref().map_or_else(
        || "Metrics not enabled or failed to initialize".to_string(),
        metrics_exporter_prometheus::PrometheusHandle::render,
    )
}

/// Per-request span, wide event, HTTP metrics and the `x-process-time`
/// header. The auth middleware fills in `user_id` on this span.
pub async fn track_metrics(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let request_id = Uuid::new_v4().to_string();

    let method = req.method().to_string();
    let uri = req.uri().path().to_string();

    let matched_path = req
        .extensions()
        .get::<axum::extract::MatchedPath>()
        .map(|mp| mp.as_str().to_string());

    let user_agent = req
        .headers()
        .get("user-agent")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %uri,
        route = matched_path.clone(),
        user_id = tracing::field::Empty,
    );

    async move {
        let mut response = next.run(req).await;

        let elapsed = start.elapsed();
        let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let status = response.status().as_u16();

        let outcome = if status >= 500 {
            "error"
        } else if status >= 400 {
            "client_error"
        } else {
            "success"
        };

        // Job ids in raw paths would explode label cardinality
        let metrics_path = matched_path.as_deref().unwrap_or_else(|| route_label(&uri));

        let labels = [
            ("method", method.clone()),
            ("path", metrics_path.to_string()),
            ("status", status.to_string()),
        ];

        metrics::counter!("http_requests_total", &labels).increment(1);
        metrics::histogram!("http_request_duration_seconds", &labels)
            .record(elapsed.as_secs_f64());

        if let Ok(value) = HeaderValue::from_str(&format!("{:.4}", elapsed.as_secs_f64())) {
            response.headers_mut().insert(PROCESS_TIME, value);
        }

        info!(
            event = "http_request_finished",
            duration_ms = duration_ms,
            status_code = status,
            user_agent = %user_agent,
            outcome = %outcome,
            "Request finished"
        );

        response
    }
    .instrument(span)
    .await
}

/// Collapses `/api/v1/jobs/<uuid>/...` to its route template.
fn route_label(path: &str) -> &str {
    let Some(rest) = path.strip_prefix("/api/v1/jobs/") else {
        return path;
    };
    match rest.split_once('/') {
        None if rest == "claim" => path,
        None => "/api/v1/jobs/{id}",
        Some((_, "renew")) => "/api/v1/jobs/{id}/renew",
        Some((_, "complete")) => "/api/v1/jobs/{id}/complete",
        Some((_, "fail")) => "/api/v1/jobs/{id}/fail",
        Some(_) => "/api/v1/jobs/{id}/*",
    }
}
