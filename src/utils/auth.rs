use crate::app::error::ApiError;
use crate::app::state::AppState;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::warn;

/// Verify a token using constant-time comparison
///
/// The comparison time does not depend on where the first mismatching byte is,
/// so the token cannot be guessed character by character.
pub fn verify_token(provided: &str, expected: &str) -> bool {
    provided.len() == expected.len()
        && provided
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

/// Token from `Authorization: Bearer`, else from the `token` query parameter
pub fn extract_token(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    let from_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty());

    from_header.or_else(|| {
        url::form_urlencoded::parse(query?.as_bytes())
            .find(|(key, _)| key == "token")
            .map(|(_, value)| value.into_owned())
    })
}

/// Rejects requests without the configured token. No-op when auth is disabled.
pub async fn require_token(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.config.auth.token.as_deref() else {
        return Ok(next.run(request).await);
    };

    let provided = extract_token(request.headers(), request.uri().query());
    match provided {
        Some(token) if verify_token(&token, expected) => Ok(next.run(request).await),
        _ => {
            warn!(path = %request.uri().path(), "Unauthorized request");
            Err(ApiError::Unauthorized)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_verify_token_valid() {
        assert!(verify_token("test-key", "test-key"));
    }

    #[test]
    fn test_verify_token_invalid() {
        assert!(!verify_token("wrong-key", "test-key"));
        assert!(!verify_token("Test-Key", "test-key"));
    }

    #[test]
    fn test_verify_token_different_length() {
        assert!(!verify_token("short", "much-longer-key"));
    }

    #[test]
    fn test_extract_token_prefers_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));

        assert_eq!(extract_token(&headers, Some("token=xyz")), Some("abc".to_string()));
    }

    #[test]
    fn test_extract_token_from_query() {
        let headers = HeaderMap::new();

        assert_eq!(
            extract_token(&headers, Some("a=1&token=s3cret+token")),
            Some("s3cret token".to_string())
        );
        assert_eq!(extract_token(&headers, Some("a=1")), None);
        assert_eq!(extract_token(&headers, None), None);
    }

    #[test]
    fn test_extract_token_ignores_other_schemes() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic Zm9vOmJhcg=="));

        assert_eq!(extract_token(&headers, None), None);
    }
}
