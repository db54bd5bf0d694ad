use super::body::LeasedStream;
use super::content_type::content_type_for;
use super::range::{resolve_range, ByteRange};
use crate::app::error::SessionError;
use crate::lifecycle::manager::SessionManager;
use crate::metrics::collector::Metrics;
use crate::models::torrent::{FileEntry, InfoHash};
use crate::stores::torrent_session::TorrentSession;
use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, info};

/// Serves byte ranges of torrent files over HTTP
#[derive(Clone)]
pub struct StreamController {
    sessions: SessionManager,
    metrics: Arc<Metrics>,
}

/// What a stream request resolved to, before any engine read
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamHead {
    pub file: FileEntry,
    /// `Some` when the client asked for a range
    pub range: Option<ByteRange>,
}

/// An open stream ready to be returned as a response
pub struct OpenedStream {
    pub head: StreamHead,
    body: Option<LeasedStream>,
}

impl StreamController {
    pub fn new(sessions: SessionManager, metrics: Arc<Metrics>) -> Self {
        Self { sessions, metrics }
    }

    /// Resolve session, file and range without touching the engine.
    ///
    /// Grants an unready session a short wait and answers `NotReady` if it
    /// is still not ready afterwards.
    pub async fn describe(
        &self,
        info_hash: &InfoHash,
        file_index: usize,
        range_header: Option<&str>,
    ) -> Result<(Arc<TorrentSession>, StreamHead), SessionError> {
        let session = self.sessions.get(info_hash).ok_or(SessionError::SessionNotFound)?;

        let wait = self.sessions.settings().stream_ready_wait();
        match self.sessions.await_ready(&session, wait).await {
            Ok(()) => {}
            Err(SessionError::ReadinessTimeout) => return Err(SessionError::NotReady),
            Err(e) => return Err(e),
        }

        let file = session.file(file_index)?;
        let range = match range_header {
            Some(header) => Some(resolve_range(header, file.length)?),
            None => None,
        };

        Ok((session, StreamHead { file, range }))
    }

    /// Open a stream over the requested span of one file.
    ///
    /// The first chunk is read before returning, so engine failures that
    /// happen before any byte is sent still map to an error status.
    pub async fn open_stream(
        &self,
        info_hash: &InfoHash,
        file_index: usize,
        range_header: Option<&str>,
    ) -> Result<OpenedStream, SessionError> {
        let (session, head) = self.describe(info_hash, file_index, range_header).await?;
        let (lease, handle) = session.open_lease()?;

        let span = match head.range.or_else(|| ByteRange::full(head.file.length)) {
            Some(span) => span,
            None => {
                debug!(info_hash = %info_hash, file_index, "Serving empty file");
                self.metrics.increment_streams();
                return Ok(OpenedStream { head, body: None });
            }
        };

        let inner = match handle.read_stream(head.file.index, span).await {
            Ok(inner) => inner,
            Err(e) => {
                self.metrics.increment_stream_errors();
                return Err(SessionError::from(e));
            }
        };

        let mut body = LeasedStream::new(inner, span.len(), lease, Arc::clone(&self.metrics));
        body.prime(self.sessions.settings().first_byte_timeout()).await?;

        self.metrics.increment_streams();
        info!(
            info_hash = %info_hash,
            file_index,
            start = span.start,
            end = span.end,
            partial = head.range.is_some(),
            "Stream opened"
        );

        Ok(OpenedStream {
            head,
            body: Some(body),
        })
    }
}

impl StreamHead {
    pub fn status(&self) -> StatusCode {
        if self.range.is_some() {
            StatusCode::PARTIAL_CONTENT
        } else {
            StatusCode::OK
        }
    }

    pub fn content_length(&self) -> u64 {
        match self.range {
            Some(range) => range.len(),
            None => self.file.length,
        }
    }

    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(content_type_for(&self.file.name)),
        );
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(self.content_length()));
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

        if let Some(range) = self.range {
            if let Ok(value) = HeaderValue::from_str(&range.content_range(self.file.length)) {
                headers.insert(header::CONTENT_RANGE, value);
            }
        }
        headers
    }
}

impl IntoResponse for StreamHead {
    fn into_response(self) -> Response {
        (self.status(), self.headers()).into_response()
    }
}

impl IntoResponse for OpenedStream {
    fn into_response(self) -> Response {
        let body = match self.body {
            Some(stream) => Body::from_stream(stream),
            None => Body::empty(),
        };

        let mut response = Response::new(body);
        *response.status_mut() = self.head.status();
        *response.headers_mut() = self.head.headers();
        response
    }
}
