// Session administration endpoints

use crate::app::error::{ApiError, SessionError};
use crate::app::state::AppState;
use crate::models::api::RemoveResponse;
use crate::validation::identifier::parse_info_hash;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::info;

/// GET /sessions
pub async fn list_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.sessions.list_active())
}

/// DELETE /sessions/{info_hash}
///
/// Stops tracking the torrent and releases its engine handle. Streams still
/// open on it end with an error.
pub async fn remove_handler(
    State(state): State<Arc<AppState>>,
    Path(info_hash): Path<String>,
) -> Result<Response, ApiError> {
    let info_hash = parse_info_hash(&info_hash)?;

    if !state.sessions.remove(&info_hash).await {
        return Err(SessionError::SessionNotFound.into());
    }

    info!(info_hash = %info_hash, "Session removed on request");
    Ok((
        StatusCode::OK,
        Json(RemoveResponse {
            success: true,
            info_hash,
        }),
    )
        .into_response())
}
