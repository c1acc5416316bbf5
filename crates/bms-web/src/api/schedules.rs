//! Scheduled search handlers. Schedules are keyed by `(userId, keywords)`.

use axum::{
    extract::{Query, State},
    Extension, Json,
};
use bms_core::{ScheduleDraft, ScheduleOptions, SchedulePatch, ScheduledSearch};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiResponse, ApiResult, AppState};
use crate::middleware::RequestId;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(in crate::api) struct ListQuery {
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(in crate::api) struct ScheduleKey {
    pub user_id: String,
    pub keywords: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(in crate::api) struct UpdateScheduleRequest {
    pub user_id: String,
    pub keywords: String,
    #[serde(flatten)]
    pub patch: SchedulePatch,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(in crate::api) struct DeletedSchedule {
    pub user_id: String,
    pub keywords: String,
    pub deleted: bool,
}

pub(in crate::api) async fn list_schedules(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<ScheduledSearch>> {
    let schedules = state
        .engine
        .scheduler
        .list(query.user_id.as_deref())
        .await
        .map_err(|e| ApiError::from_engine(&req_id.0, e))?;
    Ok(ApiResponse::new(req_id, schedules))
}

pub(in crate::api) async fn create_schedule(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<ScheduleDraft>,
) -> ApiResult<ScheduledSearch> {
    let schedule = state
        .engine
        .scheduler
        .create(body)
        .await
        .map_err(|e| ApiError::from_engine(&req_id.0, e))?;
    Ok(ApiResponse::new(req_id, schedule))
}

pub(in crate::api) async fn update_schedule(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<UpdateScheduleRequest>,
) -> ApiResult<ScheduledSearch> {
    let schedule = state
        .engine
        .scheduler
        .update(&body.user_id, &body.keywords, body.patch)
        .await
        .map_err(|e| ApiError::from_engine(&req_id.0, e))?;
    Ok(ApiResponse::new(req_id, schedule))
}

/// Hard delete.
pub(in crate::api) async fn delete_schedule(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<ScheduleKey>,
) -> ApiResult<DeletedSchedule> {
    state
        .engine
        .scheduler
        .delete(&body.user_id, &body.keywords)
        .await
        .map_err(|e| ApiError::from_engine(&req_id.0, e))?;
    Ok(ApiResponse::new(
        req_id,
        DeletedSchedule {
            user_id: body.user_id,
            keywords: body.keywords,
            deleted: true,
        },
    ))
}

pub(in crate::api) async fn toggle_schedule(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<ScheduleKey>,
) -> ApiResult<ScheduledSearch> {
    let schedule = state
        .engine
        .scheduler
        .toggle_active(&body.user_id, &body.keywords)
        .await
        .map_err(|e| ApiError::from_engine(&req_id.0, e))?;
    Ok(ApiResponse::new(req_id, schedule))
}

pub(in crate::api) async fn schedule_options(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> ApiResult<ScheduleOptions> {
    Ok(ApiResponse::new(req_id, state.engine.scheduler.options()))
}
