//! Tests for `AppError` -> HTTP response mapping.
//!
//! These call `IntoResponse` directly on `AppError` values; no server needed.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use http_body_util::BodyExt;
use quboflow_api::engine::DispatchError;
use quboflow_api::error::AppError;
use quboflow_core::error::CoreError;

/// Helper: convert an `AppError` into its status code and parsed JSON body.
async fn error_to_response(err: AppError) -> (StatusCode, serde_json::Value) {
    let response = err.into_response();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    (status, json)
}

#[tokio::test]
async fn not_found_error_returns_404() {
    let err = AppError::Core(CoreError::NotFound {
        entity: "Job",
        id: "42".into(),
    });

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
    assert_eq!(json["error"], "Job with id 42 not found");
}

#[tokio::test]
async fn caller_errors_return_400() {
    let cases = [
        (CoreError::Validation("bad".into()), "VALIDATION_ERROR"),
        (CoreError::DatasetFormat("ragged".into()), "DATASET_FORMAT_ERROR"),
        (
            CoreError::ParameterBinding {
                parameter: "max_iters".into(),
            },
            "PARAMETER_BINDING_ERROR",
        ),
        (CoreError::PluginContract("no solve".into()), "PLUGIN_CONTRACT_ERROR"),
    ];
    for (err, code) in cases {
        let message = err.to_string();
        let (status, json) = error_to_response(AppError::Core(err)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{code}");
        assert_eq!(json["code"], code);
        assert_eq!(json["error"], message);
    }
}

#[tokio::test]
async fn fetch_error_returns_502() {
    let err = AppError::Core(CoreError::Fetch("bucket/x: HTTP 403".into()));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["code"], "FETCH_ERROR");
    assert_eq!(json["error"], "FetchError: bucket/x: HTTP 403");
}

#[tokio::test]
async fn execution_error_returns_500_with_message() {
    let err = AppError::Core(CoreError::Execution("ZeroDivisionError: division by zero".into()));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["code"], "EXECUTION_ERROR");
    assert_eq!(json["error"], "ExecutionError: ZeroDivisionError: division by zero");
}

#[tokio::test]
async fn internal_error_returns_500_and_sanitizes_message() {
    let err = AppError::InternalError("secret path /etc/shadow".into());

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["code"], "INTERNAL_ERROR");
    assert_eq!(json["error"], "An internal error occurred");
}

#[tokio::test]
async fn full_queue_returns_503() {
    let (status, json) = error_to_response(AppError::Dispatch(DispatchError::QueueFull)).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["code"], "SERVICE_UNAVAILABLE");
}

#[tokio::test]
async fn bad_request_error_returns_400() {
    let (status, json) = error_to_response(AppError::BadRequest("nope".into())).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "BAD_REQUEST");
    assert_eq!(json["error"], "nope");
}
