use crate::models::session::{EvictionReason, SessionSnapshot, SessionState};
use crate::models::torrent::InfoHash;
use crate::stores::torrent_session::{Admission, TorrentSession};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

/// Outcome of a single-flight upsert
pub enum Upsert {
    /// This caller created the session and must drive it
    Created(Arc<TorrentSession>),
    /// Another caller already owns the session
    Existing(Arc<TorrentSession>),
}

impl Upsert {
    pub fn session(&self) -> &Arc<TorrentSession> {
        match self {
            Upsert::Created(session) | Upsert::Existing(session) => session,
        }
    }
}

/// In-memory map of tracked sessions with a bounded size.
///
/// Sessions are sharded by info hash. A separate admission index, ordered by
/// `(added, seq)`, picks the oldest session when capacity is exceeded. The
/// map guard is never held while the index lock is taken.
pub struct SessionRegistry {
    sessions: DashMap<InfoHash, Arc<TorrentSession>>,
    admissions: Mutex<BTreeMap<Admission, Arc<TorrentSession>>>,
    next_seq: AtomicU64,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::with_capacity(max_sessions + 1),
            admissions: Mutex::new(BTreeMap::new()),
            next_seq: AtomicU64::new(0),
            max_sessions,
        }
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Live session for `info_hash`; closed sessions are reported as absent
    pub fn get(&self, info_hash: &InfoHash) -> Option<Arc<TorrentSession>> {
        self.sessions
            .get(info_hash)
            .map(|entry| Arc::clone(entry.value()))
            .filter(|session| !session.state().is_terminal())
    }

    /// Return the live session for `info_hash`, or create a `Pending` one.
    ///
    /// Exactly one concurrent caller per key observes `Created`.
    pub fn upsert_pending(&self, info_hash: InfoHash) -> Upsert {
        let upsert = match self.sessions.entry(info_hash) {
            Entry::Occupied(mut entry) => {
                if entry.get().state().is_terminal() {
                    let session = self.new_session(info_hash);
                    entry.insert(Arc::clone(&session));
                    Upsert::Created(session)
                } else {
                    Upsert::Existing(Arc::clone(entry.get()))
                }
            }
            Entry::Vacant(entry) => {
                let session = self.new_session(info_hash);
                entry.insert(Arc::clone(&session));
                Upsert::Created(session)
            }
        };

        if let Upsert::Created(session) = &upsert {
            self.admissions
                .lock()
                .insert(session.admission(), Arc::clone(session));
        }

        upsert
    }

    fn new_session(&self, info_hash: InfoHash) -> Arc<TorrentSession> {
        let admission = Admission {
            added: Instant::now(),
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
        };
        Arc::new(TorrentSession::new(info_hash, admission))
    }

    fn oldest(&self) -> Option<Arc<TorrentSession>> {
        self.admissions.lock().values().next().map(Arc::clone)
    }

    /// Evict oldest sessions until the registry is back within `max_sessions`.
    /// Returns how many were evicted.
    pub async fn enforce_capacity(&self) -> usize {
        let mut evicted = 0;

        while self.sessions.len() > self.max_sessions {
            let Some(oldest) = self.oldest() else {
                break;
            };

            info!(
                info_hash = %oldest.info_hash(),
                state = %oldest.state(),
                sessions = self.sessions.len(),
                max_sessions = self.max_sessions,
                "Session capacity exceeded, evicting oldest session"
            );

            if self.release_session(&oldest, EvictionReason::Capacity).await {
                evicted += 1;
            }
        }

        evicted
    }

    /// Drop `session` from the registry and release its engine handle.
    ///
    /// Release errors are logged, not propagated. Returns whether this call
    /// closed the session.
    pub async fn release_session(&self, session: &Arc<TorrentSession>, reason: EvictionReason) -> bool {
        let info_hash = session.info_hash();
        self.sessions
            .remove_if(&info_hash, |_, current| Arc::ptr_eq(current, session));
        self.admissions.lock().remove(&session.admission());

        let terminal = match reason {
            EvictionReason::Failed => SessionState::Failed,
            _ => SessionState::Evicted,
        };

        let (was_open, handle) = session.close(terminal);

        if let Some(handle) = handle {
            if let Err(e) = handle.release().await {
                warn!(
                    info_hash = %info_hash,
                    reason = %reason,
                    error = %e,
                    "Failed to release engine handle"
                );
            }
        }

        if was_open {
            info!(
                info_hash = %info_hash,
                reason = %reason,
                bytes_streamed = session.bytes_streamed(),
                "Session released"
            );
        }

        was_open
    }

    /// Explicit removal. Returns false if no live session exists.
    pub async fn remove(&self, info_hash: &InfoHash) -> bool {
        match self.get(info_hash) {
            Some(session) => self.release_session(&session, EvictionReason::Removed).await,
            None => false,
        }
    }

    /// Live sessions in admission order
    pub fn sessions(&self) -> Vec<Arc<TorrentSession>> {
        self.admissions
            .lock()
            .values()
            .filter(|session| !session.state().is_terminal())
            .map(Arc::clone)
            .collect()
    }

    /// Point-in-time copies of every live session, oldest first
    pub fn list_active(&self) -> Vec<SessionSnapshot> {
        self.sessions()
            .iter()
            .map(|session| session.snapshot())
            .collect()
    }

    /// Release every session. Used at shutdown.
    pub async fn drain(&self, reason: EvictionReason) -> usize {
        let sessions: Vec<Arc<TorrentSession>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut released = 0;
        for session in sessions {
            if self.release_session(&session, reason).await {
                released += 1;
            }
        }
        released
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
