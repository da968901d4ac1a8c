use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use quboflow_core::error::CoreError;
use serde_json::json;

use crate::engine::dispatcher::DispatchError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `quboflow_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The job queue cannot take more work.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    core.code(),
                    format!("{entity} with id {id} not found"),
                ),
                CoreError::Validation(_)
                | CoreError::DatasetFormat(_)
                | CoreError::ParameterBinding { .. }
                | CoreError::PluginContract(_) => {
                    (StatusCode::BAD_REQUEST, core.code(), core.to_string())
                }
                CoreError::Fetch(_) => (StatusCode::BAD_GATEWAY, core.code(), core.to_string()),
                CoreError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal core error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        core.code(),
                        "An internal error occurred".to_string(),
                    )
                }
                CoreError::Provision(_)
                | CoreError::Execution(_)
                | CoreError::Serialization(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, core.code(), core.to_string())
                }
            },

            // --- Dispatcher errors ---
            AppError::Dispatch(err) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                err.to_string(),
            ),

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
