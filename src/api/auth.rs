use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use super::error::rate_limit_headers;
use super::{ApiError, AppState};
use crate::constants::{headers::API_KEY, identity::ANONYMOUS};
use crate::domain::RateKey;

/// Caller resolved from the request credentials.
#[derive(Debug, Clone)]
pub struct Identity {
    pub name: String,
    pub rate_key: RateKey,
}

// ============================================================================
// Middleware
// ============================================================================

/// Resolves the caller from:
/// 1. `X-API-Key` header
/// 2. `Authorization: Bearer <api_key>` header
///
/// A request without a key runs as the anonymous identity when allowed.
/// An unknown key is always rejected.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let config = state.config();

    let identity = match extract_api_key(&headers) {
        Some(key) => {
            let Some(entry) = config.find_api_key(&key) else {
                return Err(ApiError::Unauthorized("Invalid API key".to_string()));
            };
            Identity {
                name: entry.name.clone(),
                rate_key: config.rate_key_for(entry),
            }
        }
        None if config.auth.allow_anonymous => Identity {
            name: ANONYMOUS.to_string(),
            rate_key: config.anonymous_rate_key(),
        },
        None => return Err(ApiError::Unauthorized("API key required".to_string())),
    };

    tracing::Span::current().record("user_id", identity.name.as_str());
    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

/// Admits the request against its identity's quota before any handler
/// touches the cache, the index or the scheduler.
pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !state.config().rate_limit.enabled {
        return Ok(next.run(request).await);
    }

    let Some(identity) = request.extensions().get::<Identity>().cloned() else {
        return Err(ApiError::internal("Rate limiter ran without an identity"));
    };

    let decision = state.rate_limiter().admit(&identity.rate_key, 1).await;
    if !decision.allowed {
        let retry_after = decision.retry_after_secs(state.clock().now());
        return Err(ApiError::RateLimited {
            decision,
            retry_after,
        });
    }

    let mut response = next.run(request).await;
    response.headers_mut().extend(rate_limit_headers(&decision));
    Ok(response)
}

fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(api_key) = headers.get(API_KEY)
        && let Ok(key_str) = api_key.to_str()
    {
        return Some(key_str.trim().to_string());
    }

    if let Some(auth_header) = headers.get(axum::http::header::AUTHORIZATION)
        && let Ok(auth_str) = auth_header.to_str()
        && let Some(token) = auth_str.strip_prefix("Bearer ")
    {
        return Some(token.trim().to_string());
    }

    None
}
