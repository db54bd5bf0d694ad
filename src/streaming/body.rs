use crate::app::error::SessionError;
use crate::engine::ByteStream;
use crate::metrics::collector::Metrics;
use crate::stores::torrent_session::StreamLease;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{stream, FutureExt, Stream, StreamExt};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Response body over an engine stream.
///
/// Yields exactly `remaining` bytes, counts them against the session and the
/// process metrics, and keeps the session in `Streaming` until dropped. Data
/// is only pulled from the engine when the client reads, so a slow client
/// slows the engine down instead of filling memory.
///
/// Once the session is evicted, removed or failed the body ends with an
/// error and the engine stream is dropped.
pub struct LeasedStream {
    inner: ByteStream,
    remaining: u64,
    primed: Option<Bytes>,
    lease: Option<StreamLease>,
    closed: BoxFuture<'static, ()>,
    metrics: Arc<Metrics>,
}

impl LeasedStream {
    pub fn new(inner: ByteStream, expected: u64, lease: StreamLease, metrics: Arc<Metrics>) -> Self {
        let session = Arc::clone(lease.session());
        let closed = async move { session.closed().await }.boxed();

        Self {
            inner,
            remaining: expected,
            primed: None,
            lease: Some(lease),
            closed,
            metrics,
        }
    }

    /// Pull the first chunk before any header is sent, so an engine that
    /// fails immediately, or stays silent past `limit`, still produces an
    /// error status.
    pub async fn prime(&mut self, limit: Duration) -> Result<(), SessionError> {
        let reason = match timeout(limit, self.inner.next()).await {
            Ok(Some(Ok(chunk))) => {
                self.primed = Some(chunk);
                return Ok(());
            }
            Ok(Some(Err(e))) => format!("read failed: {}", e),
            Ok(None) => "engine stream ended before any data".to_string(),
            Err(_) => format!("engine sent no data within {}s", limit.as_secs()),
        };

        self.metrics.increment_stream_errors();
        self.inner = stream::empty().boxed();
        self.finish();
        Err(SessionError::EngineError(reason))
    }

    fn account(&mut self, mut chunk: Bytes) -> Bytes {
        if chunk.len() as u64 > self.remaining {
            chunk.truncate(self.remaining as usize);
        }

        let count = chunk.len() as u64;
        self.remaining -= count;
        self.metrics.add_bytes(count);
        if let Some(lease) = &self.lease {
            lease.session().record_bytes(count);
        }

        if self.remaining == 0 {
            self.finish();
        }
        chunk
    }

    fn finish(&mut self) {
        if let Some(lease) = self.lease.take() {
            debug!(
                info_hash = %lease.session().info_hash(),
                "Stream finished"
            );
        }
    }

    fn fail(&mut self, err: io::Error) -> io::Error {
        self.metrics.increment_stream_errors();
        if let Some(lease) = &self.lease {
            warn!(
                info_hash = %lease.session().info_hash(),
                remaining = self.remaining,
                error = %err,
                "Stream aborted mid-transfer"
            );
        }
        self.remaining = 0;
        self.primed = None;
        self.inner = stream::empty().boxed();
        self.finish();
        err
    }
}

impl Stream for LeasedStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        if this.lease.is_some() && this.closed.poll_unpin(cx).is_ready() {
            let err = io::Error::new(io::ErrorKind::ConnectionAborted, "session closed while streaming");
            return Poll::Ready(Some(Err(this.fail(err))));
        }

        if let Some(chunk) = this.primed.take() {
            return Poll::Ready(Some(Ok(this.account(chunk))));
        }

        if this.remaining == 0 {
            this.finish();
            return Poll::Ready(None);
        }

        match this.inner.poll_next_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(chunk))) => Poll::Ready(Some(Ok(this.account(chunk)))),
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(this.fail(e)))),
            Poll::Ready(None) => {
                let err = io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("engine stream ended with {} bytes outstanding", this.remaining),
                );
                Poll::Ready(Some(Err(this.fail(err))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::simulated::{SimulatedEngine, SimulatedOptions};
    use crate::engine::TransferEngine;
    use crate::models::session::SessionState;
    use crate::models::torrent::{InfoHash, TorrentMetadata};
    use crate::stores::torrent_session::{Admission, TorrentSession};
    use crate::validation::identifier::TorrentSource;
    use tokio::time::Instant;

    const LIMIT: Duration = Duration::from_secs(30);

    async fn ready_session() -> Arc<TorrentSession> {
        let info_hash = InfoHash::new([4; 20]);
        let session = Arc::new(TorrentSession::new(
            info_hash,
            Admission {
                added: Instant::now(),
                seq: 0,
            },
        ));
        let engine = SimulatedEngine::new(SimulatedOptions::default());
        let submission = engine
            .submit(&TorrentSource::from_info_hash(info_hash))
            .await
            .unwrap();
        session.attach(submission.handle).ok().unwrap();
        session.populate(TorrentMetadata::from_files("t", vec![("t/a.mp4".to_string(), 100)]));
        session
    }

    fn chunks(parts: Vec<io::Result<Bytes>>) -> ByteStream {
        stream::iter(parts).boxed()
    }

    #[tokio::test]
    async fn test_caps_output_and_releases_lease() {
        let session = ready_session().await;
        let metrics = Arc::new(Metrics::new());
        let (lease, _) = session.open_lease().unwrap();
        assert_eq!(session.state(), SessionState::Streaming);

        let inner = chunks(vec![Ok(Bytes::from_static(b"hello")), Ok(Bytes::from_static(b"world"))]);
        let mut body = LeasedStream::new(inner, 7, lease, Arc::clone(&metrics));
        body.prime(LIMIT).await.unwrap();

        let collected: Vec<Bytes> = body.map(|chunk| chunk.unwrap()).collect().await;
        assert_eq!(collected.concat(), b"hellowo".to_vec());
        assert_eq!(session.bytes_streamed(), 7);
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(metrics.get_snapshot(&[]).bytes_streamed, 7);
    }

    #[tokio::test]
    async fn test_prime_surfaces_immediate_failure() {
        let session = ready_session().await;
        let metrics = Arc::new(Metrics::new());
        let (lease, _) = session.open_lease().unwrap();

        let inner = chunks(vec![Err(io::Error::other("disk gone"))]);
        let mut body = LeasedStream::new(inner, 10, lease, Arc::clone(&metrics));

        assert!(matches!(body.prime(LIMIT).await, Err(SessionError::EngineError(_))));
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(metrics.get_snapshot(&[]).stream_errors, 1);
    }

    #[tokio::test]
    async fn test_short_stream_ends_with_error() {
        let session = ready_session().await;
        let metrics = Arc::new(Metrics::new());
        let (lease, _) = session.open_lease().unwrap();

        let inner = chunks(vec![Ok(Bytes::from_static(b"abc"))]);
        let mut body = LeasedStream::new(inner, 10, lease, Arc::clone(&metrics));
        body.prime(LIMIT).await.unwrap();

        assert_eq!(body.next().await.unwrap().unwrap(), Bytes::from_static(b"abc"));
        let err = body.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert!(body.next().await.is_none());
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_dropping_body_ends_streaming() {
        let session = ready_session().await;
        let (lease, _) = session.open_lease().unwrap();

        let inner = chunks(vec![Ok(Bytes::from_static(b"abc"))]);
        let body = LeasedStream::new(inner, 3, lease, Arc::new(Metrics::new()));
        assert_eq!(session.state(), SessionState::Streaming);

        drop(body);
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_closing_session_ends_stream() {
        let session = ready_session().await;
        let metrics = Arc::new(Metrics::new());
        let (lease, _) = session.open_lease().unwrap();

        let inner = chunks(vec![
            Ok(Bytes::from_static(b"abc")),
            Ok(Bytes::from_static(b"def")),
            Ok(Bytes::from_static(b"ghi")),
        ]);
        let mut body = LeasedStream::new(inner, 9, lease, Arc::clone(&metrics));
        body.prime(LIMIT).await.unwrap();
        assert_eq!(body.next().await.unwrap().unwrap(), Bytes::from_static(b"abc"));

        let (closed, _) = session.close(SessionState::Evicted);
        assert!(closed);

        let err = body.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
        assert!(body.next().await.is_none());
        assert_eq!(session.bytes_streamed(), 3);
        assert_eq!(session.state(), SessionState::Evicted);
        assert_eq!(metrics.get_snapshot(&[]).stream_errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prime_gives_up_on_silent_engine() {
        let session = ready_session().await;
        let metrics = Arc::new(Metrics::new());
        let (lease, _) = session.open_lease().unwrap();

        let silent = stream::pending::<io::Result<Bytes>>().boxed();
        let mut body = LeasedStream::new(silent, 10, lease, Arc::clone(&metrics));

        let err = body.prime(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, SessionError::EngineError(_)));
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(metrics.get_snapshot(&[]).stream_errors, 1);
    }
}
