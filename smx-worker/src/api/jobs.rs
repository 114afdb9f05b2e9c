//! Job submission and status endpoints
//!
//! Both endpoints require the worker bearer token. `POST /jobs` responds
//! immediately with the queued status and schedules execution on the
//! runtime; `GET /jobs/{id}` reads the in-memory registry.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use smx_common::{signing, JobRequest, WorkerJobStatus};
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::jobs::engine;
use crate::AppState;

/// Build job routes
pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(create_job))
        .route("/jobs/:external_job_id", get(get_job_status))
}

/// POST /jobs
async fn create_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<JobRequest>, JsonRejection>,
) -> ApiResult<Json<WorkerJobStatus>> {
    authorize(&headers, &state.config.api_key)?;

    let Json(job) = payload.map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
    job.validate()?;

    let model = engine::initial_model(&state.config, job.tool_type);
    let status = WorkerJobStatus::queued(&job.job_id, &model);
    state.registry.insert(status.clone()).await;

    info!(job_id = %job.job_id, tool = %job.tool_type, "Job accepted");
    tokio::spawn(engine::execute_job(state.clone(), job));

    Ok(Json(status))
}

/// GET /jobs/{externalJobId}
async fn get_job_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(external_job_id): Path<String>,
) -> ApiResult<Json<WorkerJobStatus>> {
    authorize(&headers, &state.config.api_key)?;

    state
        .registry
        .get(&external_job_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Job not found".to_string()))
}

/// Constant-time bearer check against the configured worker key.
fn authorize(headers: &HeaderMap, expected_token: &str) -> ApiResult<()> {
    let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    signing::verify_bearer(header, expected_token)?;
    Ok(())
}
