//! Handlers for the `/jobs` resource.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use quboflow_core::error::CoreError;
use quboflow_core::job::{Job, JobSubmission};
use quboflow_core::types::JobId;
use serde::Serialize;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
}

/// POST /api/v1/jobs
///
/// Register and queue a job. Returns 202 with its id before any work starts.
pub async fn submit_job(
    State(state): State<AppState>,
    payload: Result<Json<JobSubmission>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(input) = payload?;
    input.validate().map_err(CoreError::from)?;

    let job = Job::new(input);
    tracing::info!(
        job_id = %job.id,
        solver = %job.solver_reference,
        dataset = %job.dataset_reference,
        "Job submitted",
    );
    let job_id = state.dispatcher.submit(job)?;

    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { job_id })))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<Json<DataResponse<Job>>> {
    let job = state.registry.get(id).ok_or(AppError::Core(CoreError::NotFound {
        entity: "Job",
        id: id.to_string(),
    }))?;
    Ok(Json(DataResponse { data: job }))
}
