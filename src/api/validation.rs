use super::ApiError;
use crate::domain::{JobId, WorkerId};

const MAX_WORKER_ID_LEN: usize = 128;

pub fn validate_job_id(raw: &str) -> Result<JobId, ApiError> {
    raw.parse::<JobId>()
        .map_err(|_| ApiError::validation(format!("Invalid job ID format: {raw}")))
}

pub fn validate_worker_id(raw: &str) -> Result<WorkerId, ApiError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ApiError::validation("Worker ID cannot be empty"));
    }
    if trimmed.len() > MAX_WORKER_ID_LEN {
        return Err(ApiError::validation(format!(
            "Worker ID must be {MAX_WORKER_ID_LEN} characters or less"
        )));
    }
    Ok(WorkerId::from(trimmed))
}

pub fn validate_failure_reason(reason: &str) -> Result<&str, ApiError> {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        return Err(ApiError::validation("Failure reason cannot be empty"));
    }
    Ok(trimmed)
}
