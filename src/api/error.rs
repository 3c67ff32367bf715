use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use std::fmt;

use super::ApiResponse;
use crate::constants::headers;
use crate::domain::{JobId, RateDecision};
use crate::services::{SchedulerError, SearchError};

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),

    ValidationError(String),

    Conflict(String),

    Unauthorized(String),

    RateLimited {
        decision: RateDecision,
        retry_after: i64,
    },

    GatewayTimeout(String),

    ServiceUnavailable { service: String, message: String },

    InternalError(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(msg) => write!(f, "Not found: {msg}"),
            Self::ValidationError(msg) => write!(f, "Validation error: {msg}"),
            Self::Conflict(msg) => write!(f, "Conflict: {msg}"),
            Self::Unauthorized(msg) => write!(f, "Unauthorized: {msg}"),
            Self::RateLimited { decision, .. } => {
                write!(f, "Rate limit exceeded, resets at {}", decision.reset_at)
            }
            Self::GatewayTimeout(msg) => write!(f, "Timed out: {msg}"),
            Self::ServiceUnavailable { service, message } => {
                write!(f, "{service} unavailable: {message}")
            }
            Self::InternalError(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

/// `X-RateLimit-*` headers describing `decision`.
pub fn rate_limit_headers(decision: &RateDecision) -> HeaderMap {
    let mut map = HeaderMap::new();
    map.insert(headers::RATE_LIMIT_LIMIT, HeaderValue::from(decision.limit));
    map.insert(
        headers::RATE_LIMIT_REMAINING,
        HeaderValue::from(decision.remaining),
    );
    map.insert(
        headers::RATE_LIMIT_RESET,
        HeaderValue::from(decision.reset_at.timestamp()),
    );
    map
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Self::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            Self::RateLimited {
                decision,
                retry_after,
            } => {
                let retry_after = *retry_after;
                let mut headers = rate_limit_headers(decision);
                headers.insert(
                    axum::http::header::RETRY_AFTER,
                    HeaderValue::from(retry_after),
                );
                let body = ApiResponse::<()>::error(format!(
                    "Rate limit exceeded. Try again in {retry_after} seconds"
                ));
                return (StatusCode::TOO_MANY_REQUESTS, headers, Json(body)).into_response();
            }
            Self::GatewayTimeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg.clone()),
            Self::ServiceUnavailable { service, message } => {
                tracing::warn!("{} unavailable: {}", service, message);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    format!("{service} is temporarily unavailable"),
                )
            }
            Self::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ApiResponse::<()>::error(error_message);
        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalError(err.to_string())
    }
}

impl From<SearchError> for ApiError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::Validation(e) => Self::validation(e.to_string()),
            SearchError::MalformedQuery(msg) => Self::validation(format!("Malformed query: {msg}")),
            SearchError::Timeout => {
                Self::GatewayTimeout("Search did not complete in time".to_string())
            }
            SearchError::Unavailable { attempts, message } => Self::ServiceUnavailable {
                service: "Search index".to_string(),
                message: format!("{message} (after {attempts} attempts)"),
            },
            SearchError::Internal(msg) => Self::internal(msg),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::Validation(msg) => Self::validation(msg),
            SchedulerError::NotFound(id) => Self::job_not_found(id),
            SchedulerError::Terminal { .. } | SchedulerError::LeaseLost(_) => {
                Self::Conflict(err.to_string())
            }
            SchedulerError::Unavailable { attempts, message } => Self::ServiceUnavailable {
                service: "Job store".to_string(),
                message: format!("{message} (after {attempts} attempts)"),
            },
        }
    }
}

impl ApiError {
    pub fn job_not_found(id: JobId) -> Self {
        Self::NotFound(format!("Job {id} not found"))
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }
}
