use crate::app::error::SessionError;
use crate::engine::{TorrentHandle, TransferStats};
use crate::models::session::{SessionSnapshot, SessionState};
use crate::models::torrent::{FileEntry, InfoHash, TorrentMetadata};
use crate::utils::time::current_timestamp;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Position of a session in admission order. Oldest sorts first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Admission {
    pub added: Instant,
    pub seq: u64,
}

/// One tracked torrent.
///
/// State changes go through a `watch` channel so every transition is applied
/// under one lock and waiters can subscribe without polling. The engine handle
/// lives behind its own mutex; opening a stream and closing the session both
/// take it, so a stream is never opened against a handle being released.
pub struct TorrentSession {
    info_hash: InfoHash,
    admission: Admission,
    added_at: i64,
    state: watch::Sender<SessionState>,
    content_ready: watch::Sender<bool>,
    metadata: OnceLock<TorrentMetadata>,
    failure: OnceLock<SessionError>,
    handle: Mutex<Option<Arc<dyn TorrentHandle>>>,
    last_active: Mutex<Instant>,
    active_streams: AtomicUsize,
    bytes_streamed: AtomicU64,
}

impl fmt::Debug for TorrentSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TorrentSession")
            .field("info_hash", &self.info_hash)
            .field("state", &self.state())
            .field("active_streams", &self.active_streams())
            .finish_non_exhaustive()
    }
}

impl TorrentSession {
    pub fn new(info_hash: InfoHash, admission: Admission) -> Self {
        let (state, _) = watch::channel(SessionState::Pending);
        let (content_ready, _) = watch::channel(false);

        Self {
            info_hash,
            admission,
            added_at: current_timestamp(),
            state,
            content_ready,
            metadata: OnceLock::new(),
            failure: OnceLock::new(),
            handle: Mutex::new(None),
            last_active: Mutex::new(admission.added),
            active_streams: AtomicUsize::new(0),
            bytes_streamed: AtomicU64::new(0),
        }
    }

    pub fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    pub fn admission(&self) -> Admission {
        self.admission
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn metadata(&self) -> Option<&TorrentMetadata> {
        self.metadata.get()
    }

    pub fn failure(&self) -> Option<SessionError> {
        self.failure.get().cloned()
    }

    pub fn is_content_ready(&self) -> bool {
        *self.content_ready.borrow()
    }

    pub fn active_streams(&self) -> usize {
        self.active_streams.load(Ordering::SeqCst)
    }

    pub fn bytes_streamed(&self) -> u64 {
        self.bytes_streamed.load(Ordering::Relaxed)
    }

    /// Apply `next` if the state machine allows it. Returns whether it changed.
    pub fn transition(&self, next: SessionState) -> bool {
        self.state.send_if_modified(|state| {
            if state.can_transition_to(next) {
                *state = next;
                true
            } else {
                false
            }
        })
    }

    /// Take ownership of the engine handle and move to `MetadataWait`.
    ///
    /// Hands the handle back if the session was closed in the meantime so the
    /// caller can release it.
    pub fn attach(&self, handle: Arc<dyn TorrentHandle>) -> Result<(), Arc<dyn TorrentHandle>> {
        let mut slot = self.handle.lock();
        if !self.transition(SessionState::MetadataWait) {
            return Err(handle);
        }
        *slot = Some(handle);
        Ok(())
    }

    /// Record metadata and move to `Ready`. Metadata is set at most once.
    pub fn populate(&self, metadata: TorrentMetadata) -> bool {
        if self.state() != SessionState::MetadataWait {
            return false;
        }
        let _ = self.metadata.set(metadata);
        self.touch();
        self.transition(SessionState::Ready)
    }

    pub fn mark_content_ready(&self) {
        self.content_ready.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        });
        self.touch();
    }

    /// Remember why the session is about to fail. The first cause wins.
    pub fn record_failure(&self, err: SessionError) {
        let _ = self.failure.set(err);
    }

    /// Move to a terminal state and take the engine handle.
    ///
    /// Returns whether this call closed the session, and the handle. Only the
    /// first caller gets the handle, so it is released exactly once.
    pub fn close(&self, terminal: SessionState) -> (bool, Option<Arc<dyn TorrentHandle>>) {
        debug_assert!(terminal.is_terminal());
        let mut slot = self.handle.lock();
        let closed = self.transition(terminal);
        (closed, slot.take())
    }

    /// Start a stream: moves the session to `Streaming` and hands out the handle.
    pub fn open_lease(self: &Arc<Self>) -> Result<(StreamLease, Arc<dyn TorrentHandle>), SessionError> {
        let slot = self.handle.lock();
        let mut outcome = Err(SessionError::SessionNotFound);

        self.state.send_if_modified(|state| match *state {
            SessionState::Ready | SessionState::Idle | SessionState::Streaming => {
                if slot.is_none() {
                    return false;
                }
                self.active_streams.fetch_add(1, Ordering::SeqCst);
                outcome = Ok(());
                let changed = *state != SessionState::Streaming;
                *state = SessionState::Streaming;
                changed
            }
            SessionState::Pending | SessionState::MetadataWait => {
                outcome = Err(SessionError::NotReady);
                false
            }
            SessionState::Failed | SessionState::Evicted => false,
        });
        outcome?;

        let handle = slot.as_ref().map(Arc::clone).ok_or(SessionError::SessionNotFound)?;
        drop(slot);
        self.touch();

        Ok((
            StreamLease {
                session: Arc::clone(self),
            },
            handle,
        ))
    }

    pub fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        Instant::now().saturating_duration_since(*self.last_active.lock())
    }

    /// Count bytes delivered to a client
    pub fn record_bytes(&self, count: u64) {
        self.bytes_streamed.fetch_add(count, Ordering::Relaxed);
        self.touch();
    }

    /// Latest engine counters, or zeroes once the handle is gone
    pub fn transfer_stats(&self) -> TransferStats {
        self.handle
            .lock()
            .as_ref()
            .map(|handle| handle.stats())
            .unwrap_or_default()
    }

    /// Look up a file by index
    pub fn file(&self, index: usize) -> Result<FileEntry, SessionError> {
        let metadata = self.metadata().ok_or(SessionError::NotReady)?;
        metadata
            .files
            .get(index)
            .cloned()
            .ok_or(SessionError::FileIndexOutOfRange {
                index,
                count: metadata.files.len(),
            })
    }

    fn terminal_error(&self) -> SessionError {
        self.failure().unwrap_or(SessionError::SessionNotFound)
    }

    /// Wait until metadata is known or the session ends
    pub async fn wait_until_resolved(&self) -> Result<(), SessionError> {
        let mut rx = self.state.subscribe();
        let state = *rx
            .wait_for(|state| state.is_resolved())
            .await
            .map_err(|_| SessionError::SessionNotFound)?;

        if state.has_metadata() {
            Ok(())
        } else {
            Err(self.terminal_error())
        }
    }

    /// Resolves once the session reaches a terminal state
    pub async fn closed(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| state.is_terminal()).await;
    }

    /// Wait until the engine reports content readiness or the session ends
    pub async fn wait_until_ready(&self) -> Result<(), SessionError> {
        let mut ready = self.content_ready.subscribe();
        let mut state = self.state.subscribe();

        loop {
            if *ready.borrow_and_update() {
                return Ok(());
            }
            if state.borrow_and_update().is_terminal() {
                return Err(self.terminal_error());
            }

            let changed = tokio::select! {
                changed = ready.changed() => changed,
                changed = state.changed() => changed,
            };
            if changed.is_err() {
                return Err(SessionError::SessionNotFound);
            }
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let metadata = self.metadata();

        SessionSnapshot {
            info_hash: self.info_hash,
            name: metadata.map(|m| m.name.clone()),
            state: self.state(),
            total_length: metadata.map(|m| m.total_length),
            file_count: metadata.map(|m| m.files.len()).unwrap_or(0),
            active_streams: self.active_streams(),
            bytes_streamed: self.bytes_streamed(),
            added_at: self.added_at,
            idle_seconds: self.idle_for().as_secs(),
            ready: self.is_content_ready(),
            transfer: self.transfer_stats(),
        }
    }
}

/// Held for as long as a response body is being streamed.
///
/// Dropping the last lease returns the session from `Streaming` to `Ready`.
pub struct StreamLease {
    session: Arc<TorrentSession>,
}

impl StreamLease {
    pub fn session(&self) -> &Arc<TorrentSession> {
        &self.session
    }
}

impl Drop for StreamLease {
    fn drop(&mut self) {
        let session = &self.session;
        session.state.send_if_modified(|state| {
            let remaining = session.active_streams.fetch_sub(1, Ordering::SeqCst) - 1;
            if remaining == 0 && *state == SessionState::Streaming {
                *state = SessionState::Ready;
                true
            } else {
                false
            }
        });
        session.touch();
    }
}
