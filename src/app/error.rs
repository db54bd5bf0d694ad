// Centralized error handling for the streaming service

use crate::engine::EngineError as TransferError;
use crate::models::api::ErrorResponse;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;

/// Seconds a client should wait before retrying a not-yet-ready stream
const RETRY_AFTER_SECS: &str = "5";

/// Errors raised by the session lifecycle and streaming controllers
///
/// `Clone` so that every caller coalesced onto one single-flight add observes
/// the same outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Invalid torrent identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Timed out waiting for torrent metadata")]
    MetadataTimeout,

    #[error("Timed out waiting for torrent to become ready")]
    ReadinessTimeout,

    #[error("Torrent engine error: {0}")]
    EngineError(String),

    #[error("File index {index} out of range (torrent has {count} files)")]
    FileIndexOutOfRange { index: usize, count: usize },

    #[error("No playable video file found in torrent")]
    NoPlayableFile,

    #[error("Requested range not satisfiable: {header}")]
    InvalidRange { header: String, length: u64 },

    #[error("Torrent session not found")]
    SessionNotFound,

    #[error("Torrent not ready yet, please retry")]
    NotReady,
}

impl SessionError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SessionError::InvalidIdentifier(_) => StatusCode::BAD_REQUEST,
            SessionError::MetadataTimeout => StatusCode::GATEWAY_TIMEOUT,
            SessionError::ReadinessTimeout => StatusCode::SERVICE_UNAVAILABLE,
            SessionError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            SessionError::EngineError(_) => StatusCode::BAD_GATEWAY,
            SessionError::FileIndexOutOfRange { .. } => StatusCode::NOT_FOUND,
            SessionError::NoPlayableFile => StatusCode::NOT_FOUND,
            SessionError::InvalidRange { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            SessionError::SessionNotFound => StatusCode::NOT_FOUND,
        }
    }
}

impl From<TransferError> for SessionError {
    fn from(err: TransferError) -> Self {
        SessionError::EngineError(err.to_string())
    }
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let mut response = (
            status,
            Json(ErrorResponse {
                success: false,
                error: self.to_string(),
            }),
        )
            .into_response();

        match &self {
            SessionError::ReadinessTimeout | SessionError::NotReady => {
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from_static(RETRY_AFTER_SECS));
            }
            SessionError::InvalidRange { length, .. } => {
                if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", length)) {
                    response.headers_mut().insert(header::CONTENT_RANGE, value);
                }
            }
            _ => {}
        }

        response
    }
}

/// Errors surfaced by HTTP handlers
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid or missing authentication token")]
    Unauthorized,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Session(err) => return err.clone().into_response(),
        };

        (
            status,
            Json(ErrorResponse {
                success: false,
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            SessionError::InvalidIdentifier("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(SessionError::MetadataTimeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(SessionError::EngineError("boom".into()).status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(SessionError::SessionNotFound.status_code(), StatusCode::NOT_FOUND);
        assert!(SessionError::ReadinessTimeout.status_code().is_server_error());
    }

    #[test]
    fn test_not_ready_sets_retry_after() {
        let response = SessionError::NotReady.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "5");
    }

    #[test]
    fn test_invalid_range_sets_content_range() {
        let response = SessionError::InvalidRange {
            header: "bytes=900-1099".to_string(),
            length: 1000,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers().get(header::CONTENT_RANGE).unwrap(), "bytes */1000");
    }

    #[test]
    fn test_api_error_delegates_session_status() {
        let response = ApiError::from(SessionError::SessionNotFound).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = ApiError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
