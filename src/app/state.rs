// Application state (AppState)

use crate::app::config::Config;
use crate::app::error::SessionError;
use crate::engine::TransferEngine;
use crate::lifecycle::manager::SessionManager;
use crate::metrics::collector::Metrics;
use crate::models::torrent::{FileEntry, InfoHash};
use crate::streaming::controller::StreamController;
use std::sync::Arc;
use tracing::info;

/// A playable file of a ready session
#[derive(Debug, Clone)]
pub struct ResolvedStream {
    pub info_hash: InfoHash,
    pub file: FileEntry,
    pub url: String,
    pub ready: bool,
}

/// Shared application state
///
/// Everything a handler needs, constructed once at startup and passed in.
/// All fields are cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Session lifecycle: add, await readiness, status, removal
    pub sessions: SessionManager,

    /// Range streaming over ready sessions
    pub streams: StreamController,

    /// Metrics collector for tracking statistics
    pub metrics: Arc<Metrics>,

    /// Configuration
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config, engine: Arc<dyn TransferEngine>) -> Self {
        let config = Arc::new(config);
        let metrics = Arc::new(Metrics::new());

        let sessions = SessionManager::new(engine, config.sessions.clone(), Arc::clone(&metrics));
        let streams = StreamController::new(sessions.clone(), Arc::clone(&metrics));

        Self {
            sessions,
            streams,
            metrics,
            config,
        }
    }

    pub fn base_url(&self) -> String {
        self.config.server.public_base_url()
    }

    /// Playable URL for one file. Carries the token when auth is enabled,
    /// since players cannot send headers.
    pub fn stream_url(&self, info_hash: &InfoHash, file_index: usize) -> String {
        let mut url = format!("{}/stream/{}/{}", self.base_url(), info_hash, file_index);

        if let Some(token) = &self.config.auth.token {
            let encoded: String = url::form_urlencoded::byte_serialize(token.as_bytes()).collect();
            url.push_str("?token=");
            url.push_str(&encoded);
        }
        url
    }

    /// Add a torrent, wait for it to become playable and pick a file.
    ///
    /// Used by the integration endpoints, which hand the URL to a player.
    pub async fn resolve(&self, identifier: &str, file_index: Option<usize>) -> Result<ResolvedStream, SessionError> {
        let session = self.sessions.add_by_identifier(identifier).await?;
        self.sessions
            .await_ready(&session, self.config.sessions.ready_timeout())
            .await?;

        let file = self.sessions.choose_file(&session, file_index)?;
        let info_hash = session.info_hash();
        let url = self.stream_url(&info_hash, file.index);

        info!(
            info_hash = %info_hash,
            file_index = file.index,
            file = %file.name,
            "Stream resolved"
        );

        Ok(ResolvedStream {
            info_hash,
            file,
            url,
            ready: session.is_content_ready(),
        })
    }
}
