pub mod health;
pub mod jobs;
pub mod solve;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /jobs                  submit (POST)
/// /jobs/{id}             job record (GET)
/// /ws/{job_id}           WebSocket progress relay
/// /solve                 direct synchronous execution (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/jobs", jobs::router())
        .route("/ws/{job_id}", get(ws::ws_handler))
        .merge(solve::router())
}
