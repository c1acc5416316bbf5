//! Offer, validation, assignment and TDR handlers.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    Extension, Json,
};
use bms_core::{AssignmentDetails, Department, Modality, Offer, OfferDraft, OfferId, OfferPatch};
use bms_engine::{BulkAssignRequest, BulkItemResult, Caller};
use bms_storage::{ListOrder, OfferFilter, StoredArtifact};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiResponse, ApiResult, AppState};
use crate::middleware::RequestId;

#[derive(Debug, Default, Deserialize)]
pub(in crate::api) struct OrderQuery {
    pub order: Option<ListOrder>,
}

#[derive(Debug, Deserialize)]
pub(in crate::api) struct CancelRequest {
    #[serde(default)]
    pub justification: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(in crate::api) enum ValidationAction {
    Submit,
    Approve,
    Reject,
}

#[derive(Debug, Deserialize)]
pub(in crate::api) struct ValidateRequest {
    pub action: ValidationAction,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(in crate::api) struct AssignRequest {
    #[serde(default)]
    pub lead: Option<Department>,
    #[serde(default)]
    pub associate: Option<Department>,
}

#[derive(Debug, Deserialize)]
pub(in crate::api) struct ModalityRequest {
    pub modality: Modality,
    #[serde(default)]
    pub justification: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(in crate::api) struct UploadQuery {
    pub filename: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(in crate::api) struct UploadResponse {
    pub offer: Offer,
    pub file_id: String,
    pub content_hash: String,
    pub byte_size: usize,
    pub deduplicated: bool,
}

impl UploadResponse {
    fn new(offer: Offer, stored: StoredArtifact) -> Self {
        Self {
            offer,
            file_id: stored.file_id,
            content_hash: stored.content_hash,
            byte_size: stored.byte_size,
            deduplicated: stored.deduplicated,
        }
    }
}

fn parse_department(req_id: &str, raw: &str) -> Result<Department, ApiError> {
    raw.parse::<Department>()
        .map_err(|e| ApiError::new(req_id, "validation_error", e.to_string()))
}

/// POST /api/offres
pub(in crate::api) async fn create_offer(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(caller): Extension<Caller>,
    Json(body): Json<OfferDraft>,
) -> ApiResult<Offer> {
    let offer = state
        .engine
        .offers
        .create(&caller, body)
        .await
        .map_err(|e| ApiError::from_engine(&req_id.0, e))?;
    Ok(ApiResponse::new(req_id, offer))
}

/// GET /api/offres: filters as query parameters, plus `order`.
pub(in crate::api) async fn list_offers(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(filter): Query<OfferFilter>,
    Query(order): Query<OrderQuery>,
) -> ApiResult<Vec<Offer>> {
    let offers = state
        .engine
        .offers
        .list(&filter, order.order.unwrap_or_default())
        .await
        .map_err(|e| ApiError::from_engine(&req_id.0, e))?;
    Ok(ApiResponse::new(req_id, offers))
}

pub(in crate::api) async fn get_offer(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<OfferId>,
) -> ApiResult<Offer> {
    let offer = state
        .engine
        .offers
        .get(id)
        .await
        .map_err(|e| ApiError::from_engine(&req_id.0, e))?;
    Ok(ApiResponse::new(req_id, offer))
}

/// PUT /api/offres/{id}: sparse update.
pub(in crate::api) async fn update_offer(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<OfferId>,
    Json(body): Json<OfferPatch>,
) -> ApiResult<Offer> {
    let offer = state
        .engine
        .offers
        .update(&caller, id, body)
        .await
        .map_err(|e| ApiError::from_engine(&req_id.0, e))?;
    Ok(ApiResponse::new(req_id, offer))
}

/// DELETE /api/offres/{id}: soft cancel with a justification.
pub(in crate::api) async fn cancel_offer(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<OfferId>,
    Json(body): Json<CancelRequest>,
) -> ApiResult<Offer> {
    let offer = state
        .engine
        .offers
        .cancel(&caller, id, &body.justification)
        .await
        .map_err(|e| ApiError::from_engine(&req_id.0, e))?;
    Ok(ApiResponse::new(req_id, offer))
}

/// PATCH /api/offres/{id}/validate
pub(in crate::api) async fn validate_offer(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<OfferId>,
    Json(body): Json<ValidateRequest>,
) -> ApiResult<Offer> {
    let offers = &state.engine.offers;
    let result = match body.action {
        ValidationAction::Submit => offers.submit(&caller, id).await,
        ValidationAction::Approve => offers.approve(&caller, id, body.comment).await,
        ValidationAction::Reject => {
            offers
                .reject(&caller, id, body.comment.as_deref().unwrap_or_default())
                .await
        }
    };
    let offer = result.map_err(|e| ApiError::from_engine(&req_id.0, e))?;
    Ok(ApiResponse::new(req_id, offer))
}

pub(in crate::api) async fn assign_offer(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<OfferId>,
    Json(body): Json<AssignRequest>,
) -> ApiResult<Offer> {
    let offer = state
        .engine
        .assignments
        .assign(&caller, id, body.lead, body.associate)
        .await
        .map_err(|e| ApiError::from_engine(&req_id.0, e))?;
    Ok(ApiResponse::new(req_id, offer))
}

pub(in crate::api) async fn update_assignment_details(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<OfferId>,
    Json(body): Json<AssignmentDetails>,
) -> ApiResult<Offer> {
    let offer = state
        .engine
        .assignments
        .update_assignment_details(&caller, id, body)
        .await
        .map_err(|e| ApiError::from_engine(&req_id.0, e))?;
    Ok(ApiResponse::new(req_id, offer))
}

pub(in crate::api) async fn set_modality(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<OfferId>,
    Json(body): Json<ModalityRequest>,
) -> ApiResult<Offer> {
    let offer = state
        .engine
        .assignments
        .set_modality(&caller, id, body.modality, body.justification.as_deref())
        .await
        .map_err(|e| ApiError::from_engine(&req_id.0, e))?;
    Ok(ApiResponse::new(req_id, offer))
}

/// POST /api/offres/bulk-assign: always 200; failures are per id.
pub(in crate::api) async fn bulk_assign(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(caller): Extension<Caller>,
    Json(body): Json<BulkAssignRequest>,
) -> ApiResult<Vec<BulkItemResult>> {
    let results = state
        .engine
        .assignments
        .bulk_assign(&caller, body)
        .await
        .map_err(|e| ApiError::from_engine(&req_id.0, e))?;
    Ok(ApiResponse::new(req_id, results))
}

pub(in crate::api) async fn list_lead(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(dept): Path<String>,
) -> ApiResult<Vec<Offer>> {
    let dept = parse_department(&req_id.0, &dept)?;
    let offers = state
        .engine
        .assignments
        .list_lead(dept)
        .await
        .map_err(|e| ApiError::from_engine(&req_id.0, e))?;
    Ok(ApiResponse::new(req_id, offers))
}

pub(in crate::api) async fn list_associate(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(dept): Path<String>,
) -> ApiResult<Vec<Offer>> {
    let dept = parse_department(&req_id.0, &dept)?;
    let offers = state
        .engine
        .assignments
        .list_associate(dept)
        .await
        .map_err(|e| ApiError::from_engine(&req_id.0, e))?;
    Ok(ApiResponse::new(req_id, offers))
}

/// POST /api/offres/{id}/tdr: raw document bytes. The extension comes from
/// `?filename=` when given, else from the content type.
pub(in crate::api) async fn upload_tdr(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<OfferId>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<UploadResponse> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let extension = query
        .filename
        .as_deref()
        .and_then(|name| name.rsplit_once('.').map(|(_, ext)| ext.to_string()))
        .unwrap_or_else(|| extension_for(content_type).to_string());

    let (offer, stored) = state
        .engine
        .offers
        .attach_tdr(&caller, id, &extension, &body)
        .await
        .map_err(|e| ApiError::from_engine(&req_id.0, e))?;
    Ok(ApiResponse::new(req_id, UploadResponse::new(offer, stored)))
}

/// GET /api/offres/{id}/tdr/{file_id}: the stored bytes, unwrapped.
pub(in crate::api) async fn download_tdr(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path((id, file_id)): Path<(OfferId, String)>,
) -> Result<Response, ApiError> {
    let bytes = state
        .engine
        .offers
        .read_tdr(id, &file_id)
        .await
        .map_err(|e| ApiError::from_engine(&req_id.0, e))?;
    let ext = file_id.rsplit_once('.').map(|(_, ext)| ext).unwrap_or_default();
    let mut response = bytes.into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(ext)),
    );
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{file_id}\"")) {
        response.headers_mut().insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

const DOCUMENT_TYPES: [(&str, &str); 5] = [
    ("pdf", "application/pdf"),
    ("doc", "application/msword"),
    (
        "docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
    ("txt", "text/plain"),
    ("zip", "application/zip"),
];

fn extension_for(content_type: &str) -> &'static str {
    let mime = content_type.split(';').next().unwrap_or_default().trim();
    DOCUMENT_TYPES
        .iter()
        .find(|(_, m)| m.eq_ignore_ascii_case(mime))
        .map_or("bin", |&(ext, _)| ext)
}

fn content_type_for(ext: &str) -> &'static str {
    DOCUMENT_TYPES
        .iter()
        .find(|(e, _)| e.eq_ignore_ascii_case(ext))
        .map_or("application/octet-stream", |&(_, mime)| mime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_types_round_trip_through_extension() {
        assert_eq!(extension_for("application/pdf; charset=binary"), "pdf");
        assert_eq!(extension_for("image/png"), "bin");
        assert_eq!(content_type_for("DOCX"), DOCUMENT_TYPES[2].1);
        assert_eq!(content_type_for("exe"), "application/octet-stream");
    }
}
