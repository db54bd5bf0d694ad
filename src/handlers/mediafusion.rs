// MediaFusion direct-torrent provider endpoints

use crate::app::error::{ApiError, SessionError};
use crate::app::state::AppState;
use crate::models::api::{ProviderHealth, ResolveRequest, ResolveResponse};
use crate::validation::identifier::parse_info_hash;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

/// POST /mediafusion/resolve
///
/// Adds the torrent, waits for it to become playable and returns a stream URL
/// for the requested file, or the largest video file.
pub async fn resolve_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ResolveRequest>,
) -> Result<Response, ApiError> {
    let identifier = request.identifier().ok_or_else(|| {
        ApiError::BadRequest(
            "Missing torrent identifier (infoHash, magnet, or torrentUrl required)".to_string(),
        )
    })?;

    let resolved = state
        .resolve(identifier, request.file_index)
        .await
        .inspect_err(|e| warn!(identifier, error = %e, "MediaFusion resolve failed"))?;

    let response = ResolveResponse {
        url: resolved.url,
        name: resolved.file.name,
        size: resolved.file.length,
        ready: resolved.ready,
    };

    Ok((StatusCode::OK, Json(response)).into_response())
}

/// GET /mediafusion/status/{info_hash}
pub async fn status_handler(
    State(state): State<Arc<AppState>>,
    Path(info_hash): Path<String>,
) -> Result<Response, ApiError> {
    let info_hash = parse_info_hash(&info_hash)?;
    let status = state
        .sessions
        .status(&info_hash)
        .ok_or(SessionError::SessionNotFound)?;

    Ok((StatusCode::OK, Json(status)).into_response())
}

/// GET /mediafusion/health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let torrents = state.sessions.list_active();

    Json(ProviderHealth {
        status: "ok".to_string(),
        service: "mediafusion-provider".to_string(),
        active_torrents: torrents.len(),
        torrents,
    })
}

/// GET /mediafusion/info
pub async fn info_handler() -> impl IntoResponse {
    Json(json!({
        "name": "Self-Hosted Debrid",
        "type": "direct-torrent",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Self-hosted P2P torrent streaming provider",
        "endpoints": {
            "resolve": "/mediafusion/resolve",
            "status": "/mediafusion/status/{info_hash}",
            "health": "/mediafusion/health",
        },
    }))
}
