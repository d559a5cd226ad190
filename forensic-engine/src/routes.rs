//! HTTP API routes for the forensic engine.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config_store::SnapshotSummary;
use crate::jobs::{JobManager, JobState, JobStatus, TransitionRecord};
use crate::pipeline::{AnalysisReport, StageAttempt};
use crate::statement::PeriodRange;

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

// ============================================================================
// State
// ============================================================================

/// Shared state for route handlers.
pub struct ServiceState {
    pub jobs: Arc<JobManager>,
}

impl ServiceState {
    pub fn new(jobs: Arc<JobManager>) -> Arc<Self> {
        Arc::new(Self { jobs })
    }
}

// ============================================================================
// Response Types
// ============================================================================

/// Standard API response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

/// Error carried to the client with the status code of the shared error type.
pub struct ApiError(forensic_common::Error);

impl<E: Into<forensic_common::Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        } else {
            tracing::debug!(error = %self.0, status = status.as_u16(), "Request rejected");
        }
        (status, Json(ApiResponse::<()>::error(self.0.to_string()))).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

// ============================================================================
// Health Routes
// ============================================================================

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "forensic-engine",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// Job Routes
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub company_id: String,
    pub range: PeriodRange,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: String,
    pub state: JobState,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelJobResponse {
    pub job_id: String,
    /// State the job was in when cancellation was requested
    pub previous_state: JobState,
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<usize>,
}

async fn submit_job(
    State(state): State<Arc<ServiceState>>,
    Json(req): Json<SubmitJobRequest>,
) -> Result<(StatusCode, Json<ApiResponse<SubmitJobResponse>>), ApiError> {
    let job_id = state.jobs.submit(&req.company_id, req.range).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(SubmitJobResponse {
            job_id,
            state: JobState::Created,
        })),
    ))
}

async fn list_jobs(State(state): State<Arc<ServiceState>>, Query(query): Query<ListQuery>) -> ApiResult<Vec<JobStatus>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    Ok(Json(ApiResponse::success(state.jobs.list(limit).await?)))
}

async fn get_job(State(state): State<Arc<ServiceState>>, Path(id): Path<String>) -> ApiResult<JobStatus> {
    Ok(Json(ApiResponse::success(state.jobs.status(&id).await?)))
}

async fn get_result(State(state): State<Arc<ServiceState>>, Path(id): Path<String>) -> ApiResult<AnalysisReport> {
    Ok(Json(ApiResponse::success(state.jobs.result(&id).await?)))
}

async fn cancel_job(State(state): State<Arc<ServiceState>>, Path(id): Path<String>) -> ApiResult<CancelJobResponse> {
    let previous_state = state.jobs.cancel(&id).await?;
    Ok(Json(ApiResponse::success(CancelJobResponse {
        job_id: id,
        previous_state,
    })))
}

async fn get_transitions(
    State(state): State<Arc<ServiceState>>,
    Path(id): Path<String>,
) -> ApiResult<Vec<TransitionRecord>> {
    Ok(Json(ApiResponse::success(state.jobs.transitions(&id).await?)))
}

async fn get_attempts(State(state): State<Arc<ServiceState>>, Path(id): Path<String>) -> ApiResult<Vec<StageAttempt>> {
    Ok(Json(ApiResponse::success(state.jobs.attempts(&id).await?)))
}

// ============================================================================
// Config Routes
// ============================================================================

async fn get_config(State(state): State<Arc<ServiceState>>) -> Json<ApiResponse<SnapshotSummary>> {
    let snapshot = state.jobs.rules().snapshot().await;
    Json(ApiResponse::success(snapshot.summary()))
}

async fn reload_config(State(state): State<Arc<ServiceState>>) -> ApiResult<SnapshotSummary> {
    let snapshot = state.jobs.rules().reload().await?;
    Ok(Json(ApiResponse::success(snapshot.summary())))
}

// ============================================================================
// Router Builder
// ============================================================================

/// Build the engine HTTP router.
pub fn build_router(state: Arc<ServiceState>) -> Router {
    Router::new()
        .route("/health", get(health))
        // Job endpoints
        .route("/api/v1/jobs", post(submit_job).get(list_jobs))
        .route("/api/v1/jobs/:id", get(get_job))
        .route("/api/v1/jobs/:id/result", get(get_result))
        .route("/api/v1/jobs/:id/cancel", post(cancel_job))
        .route("/api/v1/jobs/:id/transitions", get(get_transitions))
        .route("/api/v1/jobs/:id/attempts", get(get_attempts))
        // Rule configuration
        .route("/api/v1/config", get(get_config))
        .route("/api/v1/config/reload", post(reload_config))
        .with_state(state)
}
