// Range streaming endpoint

use crate::app::error::ApiError;
use crate::app::state::AppState;
use crate::models::torrent::InfoHash;
use crate::validation::identifier::{parse_file_index, parse_info_hash};
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

fn stream_target(info_hash: &str, file_index: &str) -> Result<(InfoHash, usize), ApiError> {
    Ok((parse_info_hash(info_hash)?, parse_file_index(file_index)?))
}

fn range_header(headers: &HeaderMap) -> Result<Option<&str>, ApiError> {
    headers
        .get(header::RANGE)
        .map(|value| {
            value
                .to_str()
                .map_err(|_| ApiError::BadRequest("Range header is not valid ASCII".to_string()))
        })
        .transpose()
}

/// GET /stream/{info_hash}/{file_index}
///
/// Honors a single `Range` header; answers 200 with the whole file or 206
/// with the requested span.
pub async fn stream_handler(
    State(state): State<Arc<AppState>>,
    Path((info_hash, file_index)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let (info_hash, file_index) = stream_target(&info_hash, &file_index)?;
    let range = range_header(&headers)?;

    let opened = state.streams.open_stream(&info_hash, file_index, range).await?;
    Ok(opened.into_response())
}

/// HEAD /stream/{info_hash}/{file_index}
///
/// Same headers as GET, without opening an engine stream.
pub async fn stream_head_handler(
    State(state): State<Arc<AppState>>,
    Path((info_hash, file_index)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let (info_hash, file_index) = stream_target(&info_hash, &file_index)?;
    let range = range_header(&headers)?;

    let (_, head) = state.streams.describe(&info_hash, file_index, range).await?;
    Ok(head.into_response())
}
