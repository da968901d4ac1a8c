use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::{future, SinkExt, StreamExt};
use quboflow_core::types::JobId;
use quboflow_events::relay;

use crate::state::AppState;

/// HTTP handler that upgrades the connection to a job progress stream.
///
/// The socket receives every payload published on the job's channel, in
/// order, and is closed by the server after the terminal payload.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(job_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, job_id, state))
}

/// Relay one job channel into a WebSocket.
///
/// Subscribes before consulting the registry: a job finishing in between
/// is then either seen as finished or has its terminal payload delivered on
/// the subscription.
async fn handle_socket(socket: WebSocket, job_id: String, state: AppState) {
    let subscription = state.bus.subscribe(&job_id);
    tracing::info!(job_id = %job_id, "Progress subscriber connected");

    let (mut sink, mut stream) = socket.split();

    let finished = job_id
        .parse::<JobId>()
        .ok()
        .and_then(|id| state.registry.terminal_payload(id));
    if let Some(payload) = finished {
        tracing::debug!(job_id = %job_id, "Job already finished, sending stored outcome");
        if sink.send(Message::Text(payload.into())).await.is_ok() {
            let _ = sink.close().await;
        }
        return;
    }

    let sink = sink.with(|payload: String| {
        future::ready(Ok::<_, axum::Error>(Message::Text(payload.into())))
    });
    let disconnected = async move {
        while let Some(result) = stream.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    };

    let outcome = relay(subscription, sink, disconnected).await;
    tracing::info!(job_id = %job_id, outcome = ?outcome, "Progress subscriber done");
}
