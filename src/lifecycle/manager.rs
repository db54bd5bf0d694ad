use super::driver;
use super::selection;
use crate::app::config::SessionsConfig;
use crate::app::error::SessionError;
use crate::engine::TransferEngine;
use crate::metrics::collector::Metrics;
use crate::models::session::{EvictionReason, SessionSnapshot, SessionState, TorrentStatus};
use crate::models::torrent::{FileEntry, InfoHash};
use crate::stores::session_registry::{SessionRegistry, Upsert};
use crate::stores::torrent_session::TorrentSession;
use crate::validation::identifier::TorrentSource;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

/// Entry point for everything that needs a torrent session.
///
/// Cheap to clone; clones share the engine, the registry and the counters.
#[derive(Clone)]
pub struct SessionManager {
    engine: Arc<dyn TransferEngine>,
    registry: Arc<SessionRegistry>,
    settings: Arc<SessionsConfig>,
    metrics: Arc<Metrics>,
}

impl SessionManager {
    pub fn new(engine: Arc<dyn TransferEngine>, settings: SessionsConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            engine,
            registry: Arc::new(SessionRegistry::new(settings.max_sessions)),
            settings: Arc::new(settings),
            metrics,
        }
    }

    pub fn engine(&self) -> &Arc<dyn TransferEngine> {
        &self.engine
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &SessionsConfig {
        &self.settings
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Track the torrent named by `raw` and wait for its metadata.
    ///
    /// Concurrent calls for the same torrent share one engine submission and
    /// all observe the same outcome. Everything after admission runs on a
    /// spawned task, so dropping the returned future only stops this caller's
    /// wait; the session keeps its own deadline.
    pub async fn add_by_identifier(&self, raw: &str) -> Result<Arc<TorrentSession>, SessionError> {
        let source = TorrentSource::parse(raw)?;
        let deadline = Instant::now() + self.settings.metadata_timeout();

        let admitted = match source.info_hash() {
            Some(info_hash) => self.admit(info_hash, source, deadline),
            None => self.admit_unkeyed(source, deadline).await?,
        };

        match admitted {
            // The driver resolves the session by `deadline`
            Upsert::Created(session) => {
                session.wait_until_resolved().await?;
                Ok(session)
            }
            Upsert::Existing(session) => {
                timeout_at(deadline, session.wait_until_resolved())
                    .await
                    .map_err(|_| SessionError::MetadataTimeout)??;
                Ok(session)
            }
        }
    }

    fn admit(&self, info_hash: InfoHash, source: TorrentSource, deadline: Instant) -> Upsert {
        let admitted = self.registry.upsert_pending(info_hash);
        match &admitted {
            Upsert::Created(session) => {
                let manager = self.clone();
                let session = Arc::clone(session);
                tokio::spawn(async move {
                    manager.on_created(&session).await;
                    driver::submit_and_follow(manager, session, source, deadline).await;
                });
            }
            Upsert::Existing(session) => {
                debug!(info_hash = %info_hash, state = %session.state(), "Joining existing session");
            }
        }
        admitted
    }

    /// Sources without a derivable hash are keyed once the engine resolves
    /// them. Submission and keying run on their own task so an engine handle
    /// is never orphaned by a dropped caller.
    async fn admit_unkeyed(&self, source: TorrentSource, deadline: Instant) -> Result<Upsert, SessionError> {
        let manager = self.clone();
        tokio::spawn(async move { manager.submit_unkeyed(source, deadline).await })
            .await
            .map_err(|e| SessionError::EngineError(format!("admission task failed: {}", e)))?
    }

    async fn submit_unkeyed(self, source: TorrentSource, deadline: Instant) -> Result<Upsert, SessionError> {
        let submission = timeout_at(deadline, self.engine.submit(&source))
            .await
            .map_err(|_| SessionError::MetadataTimeout)??;
        let info_hash = submission.info_hash;

        let admitted = self.registry.upsert_pending(info_hash);
        match &admitted {
            Upsert::Created(session) => {
                let session = Arc::clone(session);
                tokio::spawn(async move {
                    self.on_created(&session).await;
                    driver::attach_and_follow(self, session, submission, deadline).await;
                });
            }
            Upsert::Existing(session) => {
                debug!(info_hash = %info_hash, uri = %source.uri(), "Identifier resolved to a tracked torrent");
                if let Err(e) = submission.handle.release().await {
                    warn!(info_hash = %info_hash, error = %e, "Failed to release duplicate engine handle");
                }
            }
        }
        Ok(admitted)
    }

    async fn on_created(&self, session: &Arc<TorrentSession>) {
        self.metrics.increment_added();
        info!(info_hash = %session.info_hash(), sessions = self.registry.len(), "Session admitted");

        let evicted = self.registry.enforce_capacity().await;
        self.metrics.add_evicted(evicted);
    }

    /// Wait up to `limit` for the engine to report content readiness
    pub async fn await_ready(&self, session: &TorrentSession, limit: Duration) -> Result<(), SessionError> {
        if session.is_content_ready() {
            return Ok(());
        }

        match timeout(limit, session.wait_until_ready()).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::ReadinessTimeout),
        }
    }

    /// Resolve a file: the explicit index, or the largest video file
    pub fn choose_file(&self, session: &TorrentSession, file_index: Option<usize>) -> Result<FileEntry, SessionError> {
        let metadata = session.metadata().ok_or(SessionError::NotReady)?;
        selection::choose_file(metadata, file_index)
    }

    pub fn get(&self, info_hash: &InfoHash) -> Option<Arc<TorrentSession>> {
        self.registry.get(info_hash)
    }

    pub fn status(&self, info_hash: &InfoHash) -> Option<TorrentStatus> {
        let session = self.registry.get(info_hash)?;
        let stats = session.transfer_stats();

        Some(TorrentStatus {
            info_hash: *info_hash,
            progress: stats.progress,
            download_rate: stats.download_rate,
            upload_rate: stats.upload_rate,
            peer_count: stats.peer_count,
            bytes_downloaded: stats.bytes_downloaded,
            bytes_uploaded: stats.bytes_uploaded,
            ready: session.is_content_ready(),
        })
    }

    pub fn list_active(&self) -> Vec<SessionSnapshot> {
        self.registry.list_active()
    }

    /// Explicit removal. Returns false if the torrent was not tracked.
    pub async fn remove(&self, info_hash: &InfoHash) -> bool {
        let removed = self.registry.remove(info_hash).await;
        if removed {
            self.metrics.increment_removed();
        }
        removed
    }

    /// One reaper pass. Sessions past the idle threshold go `Idle`; those
    /// with no stream and no engine throughput are evicted. Returns the
    /// number evicted.
    pub async fn sweep_idle(&self) -> usize {
        let threshold = self.settings.idle_threshold();
        let mut reaped = 0;

        for session in self.registry.sessions() {
            let state = session.state();
            if !matches!(state, SessionState::Ready | SessionState::Streaming | SessionState::Idle) {
                continue;
            }

            let idle_for = session.idle_for();
            if idle_for <= threshold {
                continue;
            }

            let quiet = session.active_streams() == 0 && session.transfer_stats().is_quiet();
            if quiet && state != SessionState::Streaming {
                info!(
                    info_hash = %session.info_hash(),
                    idle_seconds = idle_for.as_secs(),
                    "Reaping idle session"
                );
                if self.registry.release_session(&session, EvictionReason::Idle).await {
                    self.metrics.increment_reaped();
                    reaped += 1;
                }
            } else if session.transition(SessionState::Idle) {
                debug!(
                    info_hash = %session.info_hash(),
                    idle_seconds = idle_for.as_secs(),
                    "Session marked idle"
                );
            }
        }

        reaped
    }

    /// Release every session. Called once at process exit.
    pub async fn shutdown(&self) -> usize {
        self.registry.drain(EvictionReason::Shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::simulated::{Fault, SimulatedEngine, SimulatedOptions};
    use crate::engine::{ByteStream, EngineError, Submission, TorrentHandle, TransferStats};
    use crate::models::torrent::TorrentMetadata;
    use crate::streaming::range::ByteRange;
    use async_trait::async_trait;

    const HASH_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const HASH_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn hash(hex: &str) -> InfoHash {
        InfoHash::from_hex(hex).unwrap()
    }

    fn numbered_hash(n: u8) -> String {
        format!("{:02x}", n).repeat(20)
    }

    fn settings(max_sessions: usize) -> SessionsConfig {
        SessionsConfig {
            max_sessions,
            ..SessionsConfig::default()
        }
    }

    fn setup(max_sessions: usize) -> (Arc<SimulatedEngine>, SessionManager) {
        let engine = Arc::new(SimulatedEngine::new(SimulatedOptions {
            metadata_delay: Duration::from_millis(100),
            ready_delay: Duration::from_millis(200),
            default_file_size: 1000,
        }));
        let manager = SessionManager::new(engine.clone(), settings(max_sessions), Arc::new(Metrics::new()));
        (engine, manager)
    }

    /// Engine whose handles take ten seconds to release
    struct SlowRelease {
        inner: Arc<SimulatedEngine>,
    }

    struct SlowReleaseHandle {
        inner: Arc<dyn TorrentHandle>,
    }

    #[async_trait]
    impl TransferEngine for SlowRelease {
        fn name(&self) -> &'static str {
            "slow-release"
        }

        async fn submit(&self, source: &TorrentSource) -> Result<Submission, EngineError> {
            let submission = self.inner.submit(source).await?;
            Ok(Submission {
                handle: Arc::new(SlowReleaseHandle {
                    inner: submission.handle,
                }),
                ..submission
            })
        }
    }

    #[async_trait]
    impl TorrentHandle for SlowReleaseHandle {
        async fn read_stream(&self, file_index: usize, range: ByteRange) -> Result<ByteStream, EngineError> {
            self.inner.read_stream(file_index, range).await
        }

        fn stats(&self) -> TransferStats {
            self.inner.stats()
        }

        async fn release(&self) -> Result<(), EngineError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            self.inner.release().await
        }
    }

    fn setup_slow_release(max_sessions: usize) -> (Arc<SimulatedEngine>, SessionManager) {
        let (engine, _) = setup(max_sessions);
        let slow = Arc::new(SlowRelease {
            inner: Arc::clone(&engine),
        });
        let manager = SessionManager::new(slow, settings(max_sessions), Arc::new(Metrics::new()));
        (engine, manager)
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_giving_up_during_eviction_does_not_strand_session() {
        let (engine, manager) = setup_slow_release(1);
        manager.add_by_identifier(HASH_A).await.unwrap();

        // Evicting A takes ten seconds; this caller leaves after one
        let gave_up = timeout(Duration::from_secs(1), manager.add_by_identifier(HASH_B)).await;
        assert!(gave_up.is_err());

        let session = manager.add_by_identifier(HASH_B).await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        assert!(manager.get(&hash(HASH_A)).is_none());
        assert_eq!(manager.registry().len(), 1);
        assert_eq!(engine.submissions(), 2);
        assert_eq!(engine.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_giving_up_on_keyless_source_does_not_strand_session() {
        let (engine, manager) = setup_slow_release(1);
        let url = "https://example.org/other.torrent";
        engine.add_alias(url, hash(HASH_B));
        manager.add_by_identifier(HASH_A).await.unwrap();

        let gave_up = timeout(Duration::from_secs(1), manager.add_by_identifier(url)).await;
        assert!(gave_up.is_err());

        let session = manager.add_by_identifier(HASH_B).await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(manager.registry().len(), 1);
        assert_eq!(engine.submissions(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_adds_share_one_submission() {
        let (engine, manager) = setup(10);

        let upper = HASH_A.to_uppercase();
        let (first, second) = tokio::join!(
            manager.add_by_identifier(HASH_A),
            manager.add_by_identifier(&upper),
        );
        let (first, second) = (first.unwrap(), second.unwrap());

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(engine.submissions(), 1);
        assert_eq!(first.state(), SessionState::Ready);
        assert_eq!(first.metadata().unwrap().files.len(), 1);
        assert_eq!(manager.metrics().sessions_added.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_after_resolution_returns_existing_session() {
        let (engine, manager) = setup(10);

        let first = manager.add_by_identifier(HASH_A).await.unwrap();
        let magnet = format!("magnet:?xt=urn:btih:{}&dn=movie", HASH_A);
        let second = manager.add_by_identifier(&magnet).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(engine.submissions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_metadata_timeout_frees_capacity() {
        let (engine, manager) = setup(10);
        engine.inject_fault(hash(HASH_A), Fault::StallMetadata);

        let err = manager.add_by_identifier(HASH_A).await.unwrap_err();

        assert_eq!(err, SessionError::MetadataTimeout);
        assert!(manager.get(&hash(HASH_A)).is_none());
        assert!(manager.registry().is_empty());
        assert_eq!(engine.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_error_fails_and_evicts() {
        let (engine, manager) = setup(10);
        engine.inject_fault(hash(HASH_A), Fault::FailAfterSubmit("no peers".to_string()));

        let err = manager.add_by_identifier(HASH_A).await.unwrap_err();

        assert_eq!(err, SessionError::EngineError("no peers".to_string()));
        assert!(manager.registry().is_empty());
        assert_eq!(engine.releases(), 1);
        assert_eq!(manager.metrics().sessions_failed.load(std::sync::atomic::Ordering::Relaxed), 1);

        // A retry starts clean with a fresh submission
        engine.clear_fault(hash(HASH_A));
        manager.add_by_identifier(HASH_A).await.unwrap();
        assert_eq!(engine.submissions(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_submission_surfaces_engine_error() {
        let (engine, manager) = setup(10);
        engine.inject_fault(hash(HASH_A), Fault::RejectSubmission);

        let err = manager.add_by_identifier(HASH_A).await.unwrap_err();
        assert!(matches!(err, SessionError::EngineError(_)));
        assert!(manager.registry().is_empty());
        assert_eq!(engine.releases(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_identifier() {
        let (engine, manager) = setup(10);
        let err = manager.add_by_identifier("not-a-torrent").await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidIdentifier(_)));
        assert_eq!(engine.submissions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_never_exceeded_and_oldest_evicted() {
        let (engine, manager) = setup(3);

        let mut sessions = Vec::new();
        for n in 1..=5u8 {
            let session = manager.add_by_identifier(&numbered_hash(n)).await.unwrap();
            sessions.push(session);
            assert!(manager.registry().len() <= 3);
        }

        assert!(manager.get(&hash(&numbered_hash(1))).is_none());
        assert!(manager.get(&hash(&numbered_hash(2))).is_none());
        assert!(manager.get(&hash(&numbered_hash(3))).is_some());
        assert_eq!(sessions[0].state(), SessionState::Evicted);
        assert_eq!(engine.releases(), 2);
        assert_eq!(manager.metrics().sessions_evicted.load(std::sync::atomic::Ordering::Relaxed), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_ready() {
        let (engine, manager) = setup(10);

        let session = manager.add_by_identifier(HASH_A).await.unwrap();
        assert!(!session.is_content_ready());
        manager.await_ready(&session, Duration::from_secs(30)).await.unwrap();
        assert!(manager.status(&hash(HASH_A)).unwrap().ready);

        engine.inject_fault(hash(HASH_B), Fault::NeverReady);
        let stuck = manager.add_by_identifier(HASH_B).await.unwrap();
        let err = manager.await_ready(&stuck, Duration::from_secs(30)).await.unwrap_err();
        assert_eq!(err, SessionError::ReadinessTimeout);
        // Readiness timeouts leave the session in place
        assert!(manager.get(&hash(HASH_B)).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_choose_file_prefers_largest_video() {
        let (engine, manager) = setup(10);
        engine.add_torrent(
            hash(HASH_A),
            TorrentMetadata::from_files(
                "Movie",
                vec![
                    ("Movie/movie.nfo".to_string(), 50 * 1024 * 1024),
                    ("Movie/movie.mkv".to_string(), 700 * 1024 * 1024),
                ],
            ),
        );

        let session = manager.add_by_identifier(HASH_A).await.unwrap();
        assert_eq!(manager.choose_file(&session, None).unwrap().name, "movie.mkv");
        assert_eq!(manager.choose_file(&session, Some(0)).unwrap().name, "movie.nfo");
        assert!(matches!(
            manager.choose_file(&session, Some(9)),
            Err(SessionError::FileIndexOutOfRange { index: 9, count: 2 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_torrent_url_is_keyed_after_submission() {
        let (engine, manager) = setup(10);
        let url = "https://example.org/movie.torrent";
        engine.add_alias(url, hash(HASH_A));

        let existing = manager.add_by_identifier(HASH_A).await.unwrap();
        let via_url = manager.add_by_identifier(url).await.unwrap();

        assert!(Arc::ptr_eq(&existing, &via_url));
        assert_eq!(engine.submissions(), 2);
        // The duplicate handle from the URL submission is released
        assert_eq!(engine.releases(), 1);
        assert_eq!(manager.registry().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_session_is_reaped() {
        let (engine, manager) = setup(10);
        let session = manager.add_by_identifier(HASH_A).await.unwrap();
        manager.await_ready(&session, Duration::from_secs(30)).await.unwrap();

        tokio::time::advance(Duration::from_secs(300)).await;
        assert_eq!(manager.sweep_idle().await, 0);
        assert!(manager.get(&hash(HASH_A)).is_some());

        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(manager.sweep_idle().await, 1);
        assert!(manager.get(&hash(HASH_A)).is_none());
        assert_eq!(engine.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_idle_session_is_marked_not_reaped() {
        let (engine, manager) = setup(10);
        let session = manager.add_by_identifier(HASH_A).await.unwrap();
        manager.await_ready(&session, Duration::from_secs(30)).await.unwrap();
        engine.set_stats(
            hash(HASH_A),
            TransferStats {
                download_rate: 4096,
                ..Default::default()
            },
        );

        tokio::time::advance(Duration::from_secs(601)).await;
        assert_eq!(manager.sweep_idle().await, 0);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_and_shutdown() {
        let (engine, manager) = setup(10);
        manager.add_by_identifier(HASH_A).await.unwrap();
        manager.add_by_identifier(HASH_B).await.unwrap();

        assert!(manager.remove(&hash(HASH_A)).await);
        assert!(!manager.remove(&hash(HASH_A)).await);
        assert!(manager.status(&hash(HASH_A)).is_none());

        assert_eq!(manager.shutdown().await, 1);
        assert!(manager.list_active().is_empty());
        assert_eq!(engine.releases(), 2);
    }
}
