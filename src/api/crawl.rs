use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
};
use std::sync::Arc;
use tracing::info;

use super::auth::Identity;
use super::{ApiError, ApiResponse, AppState, CrawlJobResponse, CrawlRequest};
use crate::constants::jobs::{DEFAULT_CRAWL_PRIORITY, DEFAULT_RECRAWL_PRIORITY};
use crate::domain::{Job, JobKind};

/// POST /api/v1/crawl/recrawl
pub async fn submit_recrawl(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<CrawlRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CrawlJobResponse>>), ApiError> {
    submit(&state, &identity, request, JobKind::Recrawl).await
}

/// POST /api/v1/crawl
pub async fn submit_crawl(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<CrawlRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CrawlJobResponse>>), ApiError> {
    submit(&state, &identity, request, JobKind::Crawl).await
}

async fn submit(
    state: &AppState,
    identity: &Identity,
    request: CrawlRequest,
    kind: JobKind,
) -> Result<(StatusCode, Json<ApiResponse<CrawlJobResponse>>), ApiError> {
    let priority = request.priority.unwrap_or(match kind {
        JobKind::Recrawl => DEFAULT_RECRAWL_PRIORITY,
        JobKind::Crawl => DEFAULT_CRAWL_PRIORITY,
    });

    let job = state.scheduler().submit(&request.url, priority, kind).await?;
    info!(job_id = %job.id, submitted_by = %identity.name, "Accepted crawl request");

    let message = submission_message(&job, state.config().scheduler.sla_window(kind));
    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(CrawlJobResponse {
            job_id: job.id,
            kind: job.kind,
            status: job.status,
            priority: job.priority,
            created_at: job.created_at,
            sla_deadline: job.sla_deadline,
            message,
        })),
    ))
}

fn submission_message(job: &Job, window: chrono::Duration) -> String {
    let label = match job.kind {
        JobKind::Recrawl => "Re-crawl",
        JobKind::Crawl => "Crawl",
    };
    format!(
        "{label} job created successfully. Will complete within {}.",
        humanize(window)
    )
}

fn humanize(window: chrono::Duration) -> String {
    let minutes = window.num_minutes();
    if minutes > 0 && minutes % 60 == 0 {
        let hours = minutes / 60;
        if hours == 1 {
            "1 hour".to_string()
        } else {
            format!("{hours} hours")
        }
    } else if minutes == 1 {
        "1 minute".to_string()
    } else {
        format!("{minutes} minutes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_submission_message() {
        let job = Job::new(JobKind::Recrawl, "https://a.test", 10, Utc::now(), Duration::hours(1));
        assert_eq!(
            submission_message(&job, Duration::hours(1)),
            "Re-crawl job created successfully. Will complete within 1 hour."
        );
    }

    #[test]
    fn test_humanize() {
        assert_eq!(humanize(Duration::hours(24)), "24 hours");
        assert_eq!(humanize(Duration::minutes(90)), "90 minutes");
        assert_eq!(humanize(Duration::minutes(1)), "1 minute");
    }
}
