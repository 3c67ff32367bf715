use axum::{
    Json,
    extract::{Query, State},
};
use std::sync::Arc;
use std::time::Duration;

use super::{ApiError, ApiResponse, AppState, SearchParams, SearchRequest, SearchResponse};
use crate::domain::SearchQuery;

/// POST /api/v1/search
pub async fn search(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<ApiResponse<SearchResponse>>, ApiError> {
    run_search(&state, request).await
}

/// GET /api/v1/search?q=&page=&page_size=&timeout_ms=
pub async fn search_get(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<ApiResponse<SearchResponse>>, ApiError> {
    run_search(&state, params.into()).await
}

async fn run_search(
    state: &AppState,
    request: SearchRequest,
) -> Result<Json<ApiResponse<SearchResponse>>, ApiError> {
    let query = SearchQuery::new(request.query.trim(), request.page, request.page_size);
    if request.timeout_ms == Some(0) {
        return Err(ApiError::validation("timeout_ms must be at least 1"));
    }
    let timeout = request.timeout_ms.map(Duration::from_millis);
    let outcome = state.search().search(query, timeout).await?;
    Ok(Json(ApiResponse::success(outcome.into())))
}
