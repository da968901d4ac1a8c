//! Direct synchronous execution.
//!
//! Runs the whole pipeline inside the request and answers with the
//! normalized solver output. No job record is created and no progress is
//! published.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use quboflow_core::error::CoreError;
use quboflow_core::messages::ProgressEvent;
use quboflow_core::types::Parameters;
use quboflow_worker::{Artifact, SolveRequest};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Each artifact is given either inline (base64) or as a storage reference.
#[derive(Debug, Deserialize)]
pub struct SolveInput {
    pub solver_code_b64: Option<String>,
    pub solver_reference: Option<String>,
    pub dataset_bytes_b64: Option<String>,
    pub dataset_reference: Option<String>,
    #[serde(default)]
    pub parameters: Parameters,
}

#[derive(Debug, Serialize)]
pub struct SolveResponse {
    pub ok: bool,
    pub solver_output: Value,
}

impl SolveInput {
    fn into_request(self) -> Result<SolveRequest, CoreError> {
        Ok(SolveRequest {
            solver: artifact(
                "solver_code_b64",
                self.solver_code_b64,
                "solver_reference",
                self.solver_reference,
            )?,
            dataset: artifact(
                "dataset_bytes_b64",
                self.dataset_bytes_b64,
                "dataset_reference",
                self.dataset_reference,
            )?,
            parameters: self.parameters,
        })
    }
}

fn artifact(
    inline_field: &str,
    inline: Option<String>,
    reference_field: &str,
    reference: Option<String>,
) -> Result<Artifact, CoreError> {
    match (inline, reference) {
        (Some(encoded), None) => STANDARD
            .decode(encoded.trim())
            .map(Artifact::Inline)
            .map_err(|e| CoreError::Validation(format!("{inline_field} is not valid base64: {e}"))),
        (None, Some(reference)) if !reference.trim().is_empty() => {
            Ok(Artifact::Reference(reference))
        }
        (Some(_), Some(_)) => Err(CoreError::Validation(format!(
            "give either {inline_field} or {reference_field}, not both"
        ))),
        _ => Err(CoreError::Validation(format!(
            "one of {inline_field} or {reference_field} is required"
        ))),
    }
}

/// POST /api/v1/solve
///
/// The pipeline runs in its own task so a crashing solver yields a JSON 500
/// instead of tearing down the connection.
pub async fn solve(
    State(state): State<AppState>,
    payload: Result<Json<SolveInput>, JsonRejection>,
) -> AppResult<Json<SolveResponse>> {
    let Json(input) = payload?;
    let request = input.into_request()?;
    let runner = Arc::clone(&state.runner);

    let solver_output = tokio::spawn(async move {
        let progress = |event: ProgressEvent| {
            tracing::debug!(iteration = event.iteration, cost = event.cost, "Solve progress");
        };
        runner.solve(&request, &progress).await
    })
    .await
    .map_err(|e| AppError::InternalError(format!("Solver execution was lost: {e}")))??;
    tracing::info!("Direct solve completed");

    Ok(Json(SolveResponse {
        ok: true,
        solver_output,
    }))
}
