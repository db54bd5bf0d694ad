// Metrics endpoint

use crate::app::state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;

/// Returns JSON with all service statistics including:
/// - Sessions added, failed, evicted, reaped and removed
/// - Active and streaming sessions, open streams
/// - Bytes streamed, uptime and bytes per second
///
/// Protected by the token middleware.
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    let sessions = state.sessions.list_active();
    let snapshot = state.metrics.get_snapshot(&sessions);

    (StatusCode::OK, Json(snapshot)).into_response()
}
