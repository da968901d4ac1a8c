use axum::routing::post;
use axum::Router;

use crate::handlers::solve;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/solve", post(solve::solve))
}
