//! Per-session task that turns engine events into state transitions.

use super::manager::SessionManager;
use crate::app::error::SessionError;
use crate::engine::{EngineEvent, Submission, TorrentHandle};
use crate::models::session::EvictionReason;
use crate::stores::torrent_session::TorrentSession;
use crate::validation::identifier::TorrentSource;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

/// Submit `source` for an already admitted session and follow it until it closes
pub(crate) async fn submit_and_follow(
    manager: SessionManager,
    session: Arc<TorrentSession>,
    source: TorrentSource,
    deadline: Instant,
) {
    let submission = match timeout_at(deadline, manager.engine().submit(&source)).await {
        Ok(Ok(submission)) => submission,
        Ok(Err(e)) => {
            fail(&manager, &session, SessionError::from(e)).await;
            return;
        }
        Err(_) => {
            fail(&manager, &session, SessionError::MetadataTimeout).await;
            return;
        }
    };

    if submission.info_hash != session.info_hash() {
        warn!(
            info_hash = %session.info_hash(),
            engine_info_hash = %submission.info_hash,
            "Engine resolved identifier to a different info hash"
        );
    }

    attach_and_follow(manager, session, submission, deadline).await;
}

/// Hand a submission to its session and follow engine events
pub(crate) async fn attach_and_follow(
    manager: SessionManager,
    session: Arc<TorrentSession>,
    submission: Submission,
    deadline: Instant,
) {
    let Submission { handle, events, .. } = submission;

    if let Err(handle) = session.attach(handle) {
        debug!(info_hash = %session.info_hash(), "Session closed before engine acknowledged it");
        release_orphan(&session, handle).await;
        return;
    }

    debug!(info_hash = %session.info_hash(), "Engine acknowledged submission, waiting for metadata");
    follow(manager, session, events, deadline).await;
}

async fn release_orphan(session: &TorrentSession, handle: Arc<dyn TorrentHandle>) {
    if let Err(e) = handle.release().await {
        warn!(
            info_hash = %session.info_hash(),
            error = %e,
            "Failed to release orphaned engine handle"
        );
    }
}

async fn follow(
    manager: SessionManager,
    session: Arc<TorrentSession>,
    mut events: mpsc::Receiver<EngineEvent>,
    deadline: Instant,
) {
    // Metadata phase, bounded by the deadline
    loop {
        let event = tokio::select! {
            event = timeout_at(deadline, events.recv()) => event,
            _ = session.closed() => return,
        };

        match event {
            Err(_) => {
                fail(&manager, &session, SessionError::MetadataTimeout).await;
                return;
            }
            Ok(None) => {
                let err = SessionError::EngineError("engine stopped reporting events".to_string());
                fail(&manager, &session, err).await;
                return;
            }
            Ok(Some(EngineEvent::MetadataReady(metadata))) => {
                let files = metadata.files.len();
                let total_length = metadata.total_length;
                if !session.populate(metadata) {
                    return;
                }
                info!(
                    info_hash = %session.info_hash(),
                    files,
                    total_length,
                    "Torrent metadata ready"
                );
                break;
            }
            Ok(Some(EngineEvent::ContentReady)) => session.mark_content_ready(),
            Ok(Some(EngineEvent::Error(message))) => {
                fail(&manager, &session, SessionError::EngineError(message)).await;
                return;
            }
        }
    }

    // Steady state: readiness and late failures
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = session.closed() => break,
        };

        match event {
            Some(EngineEvent::ContentReady) => {
                if !session.is_content_ready() {
                    debug!(info_hash = %session.info_hash(), "Torrent content ready");
                }
                session.mark_content_ready();
            }
            Some(EngineEvent::Error(message)) => {
                fail(&manager, &session, SessionError::EngineError(message)).await;
                break;
            }
            Some(EngineEvent::MetadataReady(_)) => {}
            None => break,
        }
    }
}

/// Fail the session and free its capacity immediately
async fn fail(manager: &SessionManager, session: &Arc<TorrentSession>, err: SessionError) {
    warn!(info_hash = %session.info_hash(), error = %err, "Session failed");
    session.record_failure(err);

    if manager
        .registry()
        .release_session(session, EvictionReason::Failed)
        .await
    {
        manager.metrics().increment_failed();
    }
}
