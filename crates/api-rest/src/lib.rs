//! # API REST
//!
//! REST API implementation for the Patient Safety Guardian.
//!
//! Handles:
//! - HTTP endpoints with axum over the core `SessionManager`
//! - OpenAPI documentation (Swagger UI behind the `swagger-ui` feature)
//! - REST-specific concerns (JSON serialization, CORS, status codes, optional API key)
//!
//! Uses `api-shared` for request/response types.

#![warn(rust_2018_idioms)]

pub mod env;
pub mod error;

use api_shared::{
    validate_api_key, AbandonSessionRes, AuditRecordRes, AuditTrailRes, ClarificationRes,
    DecisionRes, ErrorRes, FindingRes, HealthRes, HealthService, ListPatientsRes, PatientRes,
    StartSessionReq, StartSessionRes, SubmitOrderReq, SubmitOrderRes,
};
use axum::{
    extract::{Path, Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use guardian_core::{SessionId, SessionManager, SessionStatus};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;

pub use error::ApiError;

/// Header carrying the API key when one is configured.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Application state for the REST API server
///
/// Contains shared state that needs to be accessible to all request handlers.
#[derive(Clone)]
pub struct AppState {
    manager: Arc<SessionManager>,
    api_key: Option<Arc<str>>,
}

impl AppState {
    pub fn new(manager: Arc<SessionManager>, api_key: Option<String>) -> Self {
        Self {
            manager,
            api_key: api_key.map(Arc::from),
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        list_patients,
        start_session,
        submit_order,
        get_audit_trail,
        abandon_session,
    ),
    components(schemas(
        HealthRes,
        ErrorRes,
        PatientRes,
        ListPatientsRes,
        StartSessionReq,
        StartSessionRes,
        SubmitOrderReq,
        SubmitOrderRes,
        DecisionRes,
        ClarificationRes,
        FindingRes,
        AuditRecordRes,
        AuditTrailRes,
        AbandonSessionRes,
    ))
)]
pub struct ApiDoc;

/// Builds the REST router.
///
/// `/health` is always open. Every other route requires the `x-api-key` header when the state
/// carries an API key.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/patients", get(list_patients))
        .route("/sessions", post(start_session))
        .route("/sessions/:id", delete(abandon_session))
        .route("/sessions/:id/orders", post(submit_order))
        .route("/sessions/:id/audit", get(get_audit_trail))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    let app = Router::new().route("/health", get(health)).merge(protected);

    #[cfg(feature = "swagger-ui")]
    let app = app.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    );
    #[cfg(not(feature = "swagger-ui"))]
    let app = app.route("/api-docs/openapi.json", get(openapi_json));

    app.layer(CorsLayer::permissive()).with_state(state)
}

async fn require_api_key(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(expected) = state.api_key.as_deref() else {
        return next.run(request).await;
    };
    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    match validate_api_key(provided, expected) {
        Ok(()) => next.run(request).await,
        Err(e) => {
            tracing::warn!(path = %request.uri().path(), "rejected request: {}", e);
            ApiError::from(e).into_response()
        }
    }
}

#[cfg(not(feature = "swagger-ui"))]
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

fn parse_session_id(id: &str) -> Result<SessionId, ApiError> {
    SessionId::parse(id).map_err(|e| guardian_core::GuardianError::from(e).into())
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for the REST API
///
/// Used for monitoring and load balancer health checks.
async fn health() -> Json<HealthRes> {
    Json(HealthService::check_health())
}

#[utoipa::path(
    get,
    path = "/patients",
    responses(
        (status = 200, description = "Patients with a readable record", body = ListPatientsRes),
        (status = 500, description = "Internal server error", body = ErrorRes)
    )
)]
/// List every patient whose record can be looked up
///
/// # Errors
/// Returns `500 Internal Server Error` if the patient data directory cannot be read.
async fn list_patients(State(state): State<AppState>) -> Result<Json<ListPatientsRes>, ApiError> {
    let patients = state.manager.list_patients().await?;
    Ok(Json(ListPatientsRes {
        patients: patients.into_iter().map(PatientRes::from).collect(),
    }))
}

#[utoipa::path(
    post,
    path = "/sessions",
    request_body = StartSessionReq,
    responses(
        (status = 200, description = "Session started", body = StartSessionRes),
        (status = 400, description = "Invalid patient identifier", body = ErrorRes),
        (status = 404, description = "Unknown patient", body = ErrorRes),
        (status = 500, description = "Internal server error", body = ErrorRes)
    )
)]
/// Start a safety session for one patient
///
/// # Errors
/// Returns `404 Not Found` if there is no record for the patient. No session is created.
async fn start_session(
    State(state): State<AppState>,
    Json(req): Json<StartSessionReq>,
) -> Result<Json<StartSessionRes>, ApiError> {
    let session_id = state.manager.start_session(&req.patient_id).await?;
    Ok(Json(StartSessionRes {
        session_id: session_id.to_string(),
        status: SessionStatus::Pending.to_string(),
    }))
}

#[utoipa::path(
    post,
    path = "/sessions/{id}/orders",
    request_body = SubmitOrderReq,
    params(("id" = String, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Decision or clarification request", body = SubmitOrderRes),
        (status = 400, description = "Bad request", body = ErrorRes),
        (status = 404, description = "Unknown session", body = ErrorRes),
        (status = 409, description = "Session already closed", body = ErrorRes),
        (status = 500, description = "Internal server error", body = ErrorRes)
    )
)]
/// Submit a medication order, or a reply to a clarification question
///
/// # Errors
/// Returns `409 Conflict` once the session is blocked, approved or abandoned.
async fn submit_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SubmitOrderReq>,
) -> Result<Json<SubmitOrderRes>, ApiError> {
    let session_id = parse_session_id(&id)?;
    let outcome = state.manager.submit_order(session_id, &req.text).await?;
    Ok(Json(SubmitOrderRes::from(&outcome)))
}

#[utoipa::path(
    get,
    path = "/sessions/{id}/audit",
    params(("id" = String, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Audit records in sequence order", body = AuditTrailRes),
        (status = 404, description = "Unknown session", body = ErrorRes)
    )
)]
/// Read a session's audit trail
async fn get_audit_trail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AuditTrailRes>, ApiError> {
    let session_id = parse_session_id(&id)?;
    let records = state.manager.get_audit_trail(session_id).await?;
    Ok(Json(AuditTrailRes {
        session_id: session_id.to_string(),
        records: records.iter().map(AuditRecordRes::from).collect(),
    }))
}

#[utoipa::path(
    delete,
    path = "/sessions/{id}",
    params(("id" = String, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Session abandoned", body = AbandonSessionRes),
        (status = 404, description = "Unknown session", body = ErrorRes),
        (status = 409, description = "Session already closed", body = ErrorRes)
    )
)]
/// Abandon a session that has not been decided
///
/// Evidence gathered so far is flushed to the audit log.
async fn abandon_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AbandonSessionRes>, ApiError> {
    let session_id = parse_session_id(&id)?;
    state.manager.abandon_session(session_id).await?;
    Ok(Json(AbandonSessionRes {
        session_id: session_id.to_string(),
        status: SessionStatus::Abandoned.to_string(),
    }))
}
