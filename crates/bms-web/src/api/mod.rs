mod offers;
mod schedules;
mod search;

use axum::{
    extract::State,
    http::{header, HeaderName, Method, StatusCode},
    response::IntoResponse,
    routing::{get, patch, post},
    Extension, Json, Router,
};
use bms_engine::{Dashboard, Engine, EngineError, ErrorKind};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::middleware::{request_id, require_bearer_auth, AuthState, RequestId};

#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: ErrorBody,
    pub meta: ResponseMeta,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct HealthData {
    status: &'static str,
    service: &'static str,
}

impl ResponseMeta {
    pub(crate) fn new(request_id: String) -> Self {
        Self {
            request_id,
            timestamp: Utc::now(),
        }
    }
}

impl<T: Serialize> ApiResponse<T> {
    pub(crate) fn new(req_id: RequestId, data: T) -> Json<Self> {
        Json(Self {
            data,
            meta: ResponseMeta::new(req_id.0),
        })
    }
}

impl ApiError {
    pub fn new(
        request_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
            },
            meta: ResponseMeta::new(request_id.into()),
        }
    }

    /// Infrastructure failures get a generic retry-later message; the
    /// detail only goes to the log.
    pub fn from_engine(request_id: &str, err: EngineError) -> Self {
        let kind = err.kind();
        if kind == ErrorKind::Internal {
            tracing::error!(error = %err, "request failed");
            return Self::new(
                request_id,
                kind.code(),
                "the service is temporarily unavailable, please retry later",
            );
        }
        tracing::debug!(error = %err, code = kind.code(), "request rejected");
        Self::new(request_id, kind.code(), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.error.code.as_str() {
            "validation_error" | "bad_request" => StatusCode::BAD_REQUEST,
            "unauthorized" => StatusCode::UNAUTHORIZED,
            "forbidden" => StatusCode::FORBIDDEN,
            "not_found" => StatusCode::NOT_FOUND,
            "invalid_state_transition" | "conflict" | "duplicate" => StatusCode::CONFLICT,
            "executor_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
            "executor_timeout" => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

pub(crate) type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn build_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-request-id"),
            HeaderName::from_static(crate::middleware::USER_HEADER),
        ])
}

fn protected_router(auth: AuthState) -> Router<AppState> {
    Router::new()
        .route(
            "/api/offres",
            get(offers::list_offers).post(offers::create_offer),
        )
        .route("/api/offres/bulk-assign", post(offers::bulk_assign))
        .route(
            "/api/offres/{id}",
            get(offers::get_offer)
                .put(offers::update_offer)
                .delete(offers::cancel_offer),
        )
        .route("/api/offres/{id}/validate", patch(offers::validate_offer))
        .route("/api/offres/{id}/assign", patch(offers::assign_offer))
        .route(
            "/api/offres/{id}/assignment-details",
            patch(offers::update_assignment_details),
        )
        .route("/api/offres/{id}/modality", patch(offers::set_modality))
        .route("/api/offres/{id}/tdr", post(offers::upload_tdr))
        .route("/api/offres/{id}/tdr/{file_id}", get(offers::download_tdr))
        .route("/api/poles/{dept}/lead", get(offers::list_lead))
        .route("/api/poles/{dept}/associate", get(offers::list_associate))
        .route(
            "/api/scheduled-searches",
            get(schedules::list_schedules)
                .post(schedules::create_schedule)
                .put(schedules::update_schedule)
                .delete(schedules::delete_schedule),
        )
        .route(
            "/api/scheduled-searches/toggle",
            patch(schedules::toggle_schedule),
        )
        .route(
            "/api/scheduled-searches/options",
            get(schedules::schedule_options),
        )
        .route("/api/auto-search", post(search::auto_search))
        .route("/api/validate/{result_id}", post(search::validate_result))
        .route("/api/recommend", get(search::recommend))
        .route("/api/dashboard", get(dashboard))
        .layer(axum::middleware::from_fn_with_state(
            auth,
            require_bearer_auth,
        ))
}

pub fn build_app(state: AppState, auth: AuthState) -> Router {
    let public_routes = Router::new().route("/api/health", get(health));

    Router::new()
        .merge(public_routes)
        .merge(protected_router(auth))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(build_cors())
                .layer(axum::middleware::from_fn(request_id)),
        )
        .with_state(state)
}

async fn health(Extension(req_id): Extension<RequestId>) -> impl IntoResponse {
    (
        StatusCode::OK,
        ApiResponse::new(
            req_id,
            HealthData {
                status: "ok",
                service: "bms",
            },
        ),
    )
}

async fn dashboard(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> ApiResult<Dashboard> {
    let summary = state
        .engine
        .dashboard()
        .await
        .map_err(|e| ApiError::from_engine(&req_id.0, e))?;
    Ok(ApiResponse::new(req_id, summary))
}
