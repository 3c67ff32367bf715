use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::validation::{validate_failure_reason, validate_job_id, validate_worker_id};
use super::{
    ApiError, ApiResponse, AppState, ClaimResponse, CompleteRequest, FailRequest, JobDto,
    WorkerRequest,
};
use crate::domain::WorkerLease;

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<JobDto>>, ApiError> {
    let job_id = validate_job_id(&id)?;
    let job = state.scheduler().get(job_id).await?;
    Ok(Json(ApiResponse::success(job.into())))
}

/// POST /api/v1/jobs/claim
///
/// 204 when nothing is pending.
pub async fn claim_job(
    State(state): State<Arc<AppState>>,
    Json(request): Json<WorkerRequest>,
) -> Result<Response, ApiError> {
    let worker = validate_worker_id(&request.worker_id)?;
    let claim = state.scheduler().claim(&worker).await?;

    Ok(claim.map_or_else(
        || StatusCode::NO_CONTENT.into_response(),
        |claim| {
            Json(ApiResponse::success(ClaimResponse {
                job: claim.job.into(),
                lease: claim.lease,
            }))
            .into_response()
        },
    ))
}

/// POST /api/v1/jobs/{id}/renew
pub async fn renew_lease(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<WorkerRequest>,
) -> Result<Json<ApiResponse<WorkerLease>>, ApiError> {
    let job_id = validate_job_id(&id)?;
    let worker = validate_worker_id(&request.worker_id)?;
    let lease = state.scheduler().renew(job_id, &worker).await?;
    Ok(Json(ApiResponse::success(lease)))
}

/// POST /api/v1/jobs/{id}/complete
pub async fn complete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<CompleteRequest>,
) -> Result<Json<ApiResponse<JobDto>>, ApiError> {
    let job_id = validate_job_id(&id)?;
    let worker = validate_worker_id(&request.worker_id)?;
    let job = state
        .scheduler()
        .complete(job_id, &worker, request.result)
        .await?;
    Ok(Json(ApiResponse::success(job.into())))
}

/// POST /api/v1/jobs/{id}/fail
pub async fn fail_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<FailRequest>,
) -> Result<Json<ApiResponse<JobDto>>, ApiError> {
    let job_id = validate_job_id(&id)?;
    let worker = validate_worker_id(&request.worker_id)?;
    let reason = validate_failure_reason(&request.reason)?;
    let job = state.scheduler().fail(job_id, &worker, reason).await?;
    Ok(Json(ApiResponse::success(job.into())))
}
