//! Ad-hoc search, result validation and recommendations.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use bms_core::SearchResult;
use bms_engine::{AutoSearchRequest, ScoredResult, ValidationReceipt, ValidationRequest};
use serde::Deserialize;

use super::{ApiError, ApiResponse, ApiResult, AppState};
use crate::middleware::RequestId;

const DEFAULT_RECOMMENDATIONS: usize = 10;
const MAX_RECOMMENDATIONS: usize = 100;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(in crate::api) struct RecommendQuery {
    pub user_id: Option<String>,
    pub limit: Option<usize>,
}

pub(in crate::api) async fn auto_search(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<AutoSearchRequest>,
) -> ApiResult<Vec<SearchResult>> {
    let results = state
        .engine
        .recommender
        .auto_search(body)
        .await
        .map_err(|e| ApiError::from_engine(&req_id.0, e))?;
    Ok(ApiResponse::new(req_id, results))
}

/// POST /api/validate/{result_id}
pub(in crate::api) async fn validate_result(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(result_id): Path<String>,
    Json(body): Json<ValidationRequest>,
) -> ApiResult<ValidationReceipt> {
    let receipt = state
        .engine
        .recommender
        .record_validation(&result_id, body)
        .await
        .map_err(|e| ApiError::from_engine(&req_id.0, e))?;
    Ok(ApiResponse::new(req_id, receipt))
}

/// GET /api/recommend?userId=&limit=
pub(in crate::api) async fn recommend(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<RecommendQuery>,
) -> ApiResult<Vec<ScoredResult>> {
    let Some(user_id) = query.user_id.as_deref().map(str::trim).filter(|u| !u.is_empty()) else {
        return Err(ApiError::new(req_id.0, "validation_error", "userId is required"));
    };
    let limit = query
        .limit
        .unwrap_or(DEFAULT_RECOMMENDATIONS)
        .clamp(1, MAX_RECOMMENDATIONS);
    let scored = state
        .engine
        .recommender
        .recommend(user_id, limit)
        .await
        .map_err(|e| ApiError::from_engine(&req_id.0, e))?;
    Ok(ApiResponse::new(req_id, scored))
}
