// HTTP routes configuration

use crate::app::state::AppState;
use crate::handlers::{fallback, health, mediafusion, metrics, sessions, stream, stremio};
use crate::utils::auth::require_token;
use axum::{
    http::{header, Method},
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Players and addon hosts live on other origins
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::HEAD, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::RANGE])
        .expose_headers([header::CONTENT_RANGE, header::ACCEPT_RANGES, header::CONTENT_LENGTH])
}

pub fn build_router(state: Arc<AppState>) -> Router {
    // Token-protected endpoints
    let protected = Router::new()
        .route(
            "/stream/{info_hash}/{file_index}",
            get(stream::stream_handler).head(stream::stream_head_handler),
        )
        .route("/mediafusion/resolve", post(mediafusion::resolve_handler))
        .route("/mediafusion/status/{info_hash}", get(mediafusion::status_handler))
        .route("/mediafusion/health", get(mediafusion::health_handler))
        .route("/mediafusion/info", get(mediafusion::info_handler))
        .route("/stremio/manifest.json", get(stremio::manifest_handler))
        .route("/stremio/stream/{type}/{id}", get(stremio::stream_handler))
        .route("/stremio/health", get(stremio::health_handler))
        .route("/sessions", get(sessions::list_handler))
        .route("/sessions/{info_hash}", delete(sessions::remove_handler))
        .route("/metrics", get(metrics::metrics_handler))
        .route_layer(middleware::from_fn_with_state(Arc::clone(&state), require_token));

    Router::new()
        // Public endpoints
        .route("/", get(health::index_handler))
        .route("/health", get(health::health_handler))
        .merge(protected)
        // 404 fallback for all unmatched routes
        .fallback(fallback::fallback_handler)
        .layer(cors_layer())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::state::testing::{test_state, TEST_TOKEN};
    use crate::engine::simulated::{pattern_byte, SimulatedEngine};
    use crate::models::api::{ResolveResponse, StremioStreamResponse};
    use crate::models::session::SessionSnapshot;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        response::Response,
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const HASH: &str = "eeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee";

    fn router(token: Option<&str>) -> (Arc<SimulatedEngine>, Arc<AppState>, Router) {
        let (engine, state) = test_state(token);
        let router = build_router(Arc::clone(&state));
        (engine, state, router)
    }

    async fn send(router: &Router, request: Request<Body>) -> Response {
        router.clone().oneshot(request).await.unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn resolve(router: &Router, body: &str) -> Response {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/mediafusion/resolve")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        send(router, request).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_public_routes_skip_auth() {
        let (_, _, router) = router(Some(TEST_TOKEN));

        assert_eq!(send(&router, get_request("/health")).await.status(), StatusCode::OK);
        assert_eq!(send(&router, get_request("/")).await.status(), StatusCode::OK);
    }

    #[tokio::test(start_paused = true)]
    async fn test_protected_routes_require_token() {
        let (_, _, router) = router(Some(TEST_TOKEN));

        let response = send(&router, get_request("/sessions")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .uri("/sessions")
            .header(header::AUTHORIZATION, "Bearer wrong")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&router, request).await.status(), StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .uri("/sessions")
            .header(header::AUTHORIZATION, format!("Bearer {}", TEST_TOKEN))
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&router, request).await.status(), StatusCode::OK);

        let response = send(&router, get_request("/metrics?token=s3cret%20token")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_then_stream_range() {
        let (_, _, router) = router(None);

        let response = resolve(&router, &format!(r#"{{"infoHash":"{}"}}"#, HASH)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let resolved: ResolveResponse = json_body(response).await;
        assert_eq!(resolved.size, 1000);
        assert!(resolved.ready);
        assert!(resolved.url.ends_with(&format!("/stream/{}/0", HASH)));

        let request = Request::builder()
            .uri(format!("/stream/{}/0", HASH))
            .header(header::RANGE, "bytes=0-99")
            .body(Body::empty())
            .unwrap();
        let response = send(&router, request).await;

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 0-99/1000");
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "100");

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let expected: Vec<u8> = (0..100).map(|offset| pattern_byte(0, offset)).collect();
        assert_eq!(bytes.to_vec(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_errors() {
        let (_, _, router) = router(None);

        let response = send(&router, get_request(&format!("/stream/{}/0", HASH))).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = send(&router, get_request("/stream/not-a-hash/0")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        resolve(&router, &format!(r#"{{"infoHash":"{}"}}"#, HASH)).await;

        let request = Request::builder()
            .uri(format!("/stream/{}/0", HASH))
            .header(header::RANGE, "bytes=900-1099")
            .body(Body::empty())
            .unwrap();
        let response = send(&router, request).await;
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */1000");
    }

    #[tokio::test(start_paused = true)]
    async fn test_head_returns_headers_only() {
        let (engine, _, router) = router(None);
        resolve(&router, &format!(r#"{{"infoHash":"{}"}}"#, HASH)).await;

        let request = Request::builder()
            .method(Method::HEAD)
            .uri(format!("/stream/{}/0", HASH))
            .body(Body::empty())
            .unwrap();
        let response = send(&router, request).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "1000");
        assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert!(bytes.is_empty());
        assert_eq!(engine.submissions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_rejects_missing_and_invalid_identifiers() {
        let (_, _, router) = router(None);

        assert_eq!(resolve(&router, "{}").await.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            resolve(&router, r#"{"magnet":"not a magnet"}"#).await.status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_and_removal() {
        let (engine, _, router) = router(None);

        let response = send(&router, get_request(&format!("/mediafusion/status/{}", HASH))).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        resolve(&router, &format!(r#"{{"infoHash":"{}"}}"#, HASH)).await;

        let response = send(&router, get_request(&format!("/mediafusion/status/{}", HASH))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let status: serde_json::Value = json_body(response).await;
        assert_eq!(status["infoHash"], HASH);
        assert_eq!(status["ready"], true);

        let sessions: Vec<SessionSnapshot> = json_body(send(&router, get_request("/sessions")).await).await;
        assert_eq!(sessions.len(), 1);

        let request = Request::builder()
            .method(Method::DELETE)
            .uri(format!("/sessions/{}", HASH))
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&router, request).await.status(), StatusCode::OK);
        assert_eq!(engine.releases(), 1);

        let request = Request::builder()
            .method(Method::DELETE)
            .uri(format!("/sessions/{}", HASH))
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&router, request).await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stremio_streams() {
        let (_, _, router) = router(None);

        let response = send(&router, get_request("/stremio/stream/movie/tt1234567.json")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let empty: StremioStreamResponse = json_body(response).await;
        assert!(empty.streams.is_empty());

        let uri = format!("/stremio/stream/movie/infohash:{}.json", HASH);
        let found: StremioStreamResponse = json_body(send(&router, get_request(&uri)).await).await;
        assert_eq!(found.streams.len(), 1);
        assert_eq!(found.streams[0].behavior_hints.binge_group, format!("debrid-{}", HASH));
        assert!(found.streams[0].url.ends_with(&format!("/stream/{}/0", HASH)));

        let manifest = send(&router, get_request("/stremio/manifest.json")).await;
        assert_eq!(manifest.status(), StatusCode::OK);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_route_is_json_404() {
        let (_, _, router) = router(None);

        let response = send(&router, get_request("/announce")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = json_body(response).await;
        assert_eq!(body["success"], false);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cors_exposes_range_headers() {
        let (_, _, router) = router(None);

        let request = Request::builder()
            .uri("/health")
            .header(header::ORIGIN, "http://player.example")
            .body(Body::empty())
            .unwrap();
        let response = send(&router, request).await;

        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        let exposed = response.headers()[header::ACCESS_CONTROL_EXPOSE_HEADERS]
            .to_str()
            .unwrap()
            .to_ascii_lowercase();
        assert!(exposed.contains("content-range"));
        assert!(exposed.contains("accept-ranges"));
    }
}
