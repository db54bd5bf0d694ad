use crate::app::state::AppState;
use crate::models::api::HealthResponse;
use crate::utils::time::current_timestamp;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use std::sync::Arc;

/// Health check handler
///
/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let timestamp = current_timestamp();

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            service: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: timestamp - state.metrics.start_time,
            timestamp,
            active_sessions: state.sessions.registry().len(),
        }),
    )
}

/// Service description with the URLs integrations should use
///
/// GET /
pub async fn index_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let base = state.base_url();

    Json(json!({
        "name": "Self-Hosted Debrid",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Self-hosted P2P torrent streaming service",
        "endpoints": {
            "stremio": {
                "manifest": format!("{}/stremio/manifest.json", base),
                "health": format!("{}/stremio/health", base),
            },
            "mediafusion": {
                "resolve": format!("{}/mediafusion/resolve", base),
                "status": format!("{}/mediafusion/status/{{info_hash}}", base),
                "info": format!("{}/mediafusion/info", base),
                "health": format!("{}/mediafusion/health", base),
            },
            "stream": format!("{}/stream/{{info_hash}}/{{file_index}}", base),
            "sessions": format!("{}/sessions", base),
            "metrics": format!("{}/metrics", base),
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::state::testing::test_state;
    use axum::body::Body;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_health_handler() {
        let (_, state) = test_state(None);
        let response = health_handler(State(state)).await.into_response();

        let (parts, body) = response.into_parts();
        assert_eq!(parts.status, StatusCode::OK);

        let bytes = Body::new(body).collect().await.unwrap().to_bytes();
        let health: HealthResponse = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(health.status, "ok");
        assert_eq!(health.active_sessions, 0);
        assert!(health.timestamp > 0);
        assert!(health.uptime_seconds >= 0);
    }

    #[tokio::test]
    async fn test_index_uses_base_url() {
        let (_, state) = test_state(None);
        let response = index_handler(State(state)).await.into_response();

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let info: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(
            info["endpoints"]["stremio"]["manifest"],
            "http://debrid.local:8080/stremio/manifest.json"
        );
    }
}
