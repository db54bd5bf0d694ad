//! HTTP adapter for an rqbit-compatible transfer daemon.
//!
//! The daemon does the peer work; this adapter turns its REST API into the
//! engine seam. A poll task per handle converts stats responses into
//! lifecycle events and caches the latest counters.

use super::{
    ByteStream, EngineError, EngineEvent, Submission, TorrentHandle, TransferEngine,
    TransferStats, EVENT_CHANNEL_CAPACITY,
};
use crate::models::torrent::{InfoHash, TorrentMetadata};
use crate::streaming::range::ByteRange;
use crate::validation::identifier::TorrentSource;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::{header, StatusCode};
use serde::Deserialize;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// Client for the daemon's torrent API
pub struct RemoteEngine {
    client: reqwest::Client,
    endpoint: String,
    request_timeout: Duration,
    poll_interval: Duration,
}

#[derive(Debug, Deserialize)]
struct AddTorrentResponse {
    #[serde(default)]
    id: Option<usize>,
    details: TorrentDetails,
}

#[derive(Debug, Deserialize)]
struct TorrentDetails {
    info_hash: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    files: Option<Vec<DaemonFile>>,
}

#[derive(Debug, Deserialize)]
struct DaemonFile {
    name: String,
    #[serde(default)]
    components: Vec<String>,
    length: u64,
}

#[derive(Debug, Default, Deserialize)]
struct DaemonStats {
    #[serde(default)]
    state: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    progress_bytes: u64,
    #[serde(default)]
    uploaded_bytes: u64,
    #[serde(default)]
    total_bytes: u64,
    #[serde(default)]
    live: Option<LiveStats>,
}

#[derive(Debug, Default, Deserialize)]
struct LiveStats {
    #[serde(default)]
    download_speed: Speed,
    #[serde(default)]
    upload_speed: Speed,
    #[serde(default)]
    snapshot: Option<LiveSnapshot>,
}

#[derive(Debug, Default, Deserialize)]
struct Speed {
    /// MiB per second
    #[serde(default)]
    mbps: f64,
}

#[derive(Debug, Default, Deserialize)]
struct LiveSnapshot {
    #[serde(default)]
    peer_stats: PeerStats,
}

#[derive(Debug, Default, Deserialize)]
struct PeerStats {
    #[serde(default)]
    live: u32,
}

impl TorrentDetails {
    fn metadata(&self) -> Option<TorrentMetadata> {
        let files = self.files.as_ref().filter(|files| !files.is_empty())?;
        let name = self.name.clone().unwrap_or_else(|| self.info_hash.clone());

        let files = files
            .iter()
            .map(|file| {
                let path = if file.components.is_empty() {
                    file.name.clone()
                } else {
                    file.components.join("/")
                };
                (path, file.length)
            })
            .collect();

        Some(TorrentMetadata::from_files(name, files))
    }
}

impl DaemonStats {
    fn is_live(&self) -> bool {
        self.state == "live"
    }

    fn failure(&self) -> Option<String> {
        if self.state == "error" {
            Some(
                self.error
                    .clone()
                    .unwrap_or_else(|| "daemon reported an error state".to_string()),
            )
        } else {
            None
        }
    }

    fn to_transfer_stats(&self) -> TransferStats {
        let progress = if self.total_bytes > 0 {
            (self.progress_bytes as f64 / self.total_bytes as f64).min(1.0)
        } else {
            0.0
        };

        let (download_rate, upload_rate, peer_count) = match &self.live {
            Some(live) => (
                (live.download_speed.mbps * BYTES_PER_MIB) as u64,
                (live.upload_speed.mbps * BYTES_PER_MIB) as u64,
                live.snapshot
                    .as_ref()
                    .map(|snapshot| snapshot.peer_stats.live)
                    .unwrap_or(0),
            ),
            None => (0, 0, 0),
        };

        TransferStats {
            progress,
            download_rate,
            upload_rate,
            peer_count,
            bytes_downloaded: self.progress_bytes,
            bytes_uploaded: self.uploaded_bytes,
        }
    }
}

fn transport_error(err: reqwest::Error) -> EngineError {
    if err.is_timeout() {
        EngineError::Unavailable(format!("request timed out: {}", err))
    } else if err.is_connect() {
        EngineError::Unavailable(format!("failed to connect: {}", err))
    } else {
        EngineError::Protocol(err.to_string())
    }
}

impl RemoteEngine {
    pub fn new(endpoint: String, request_timeout: Duration, poll_interval: Duration) -> Result<Self> {
        // No client-wide timeout: stream responses stay open for as long as the player reads
        let client = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            request_timeout,
            poll_interval,
        })
    }
}

#[async_trait]
impl TransferEngine for RemoteEngine {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn submit(&self, source: &TorrentSource) -> Result<Submission, EngineError> {
        let response = self
            .client
            .post(format!("{}/torrents", self.endpoint))
            .query(&[("overwrite", "true")])
            .timeout(self.request_timeout)
            .body(source.uri().to_string())
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Rejected(format!("daemon returned {}: {}", status, body)));
        }

        let added = response
            .json::<AddTorrentResponse>()
            .await
            .map_err(|e| EngineError::Protocol(format!("invalid add response: {}", e)))?;

        let info_hash = InfoHash::from_hex(&added.details.info_hash).ok_or_else(|| {
            EngineError::Protocol(format!(
                "daemon returned malformed info hash '{}'",
                added.details.info_hash
            ))
        })?;

        let torrent_id = added
            .id
            .map(|id| id.to_string())
            .unwrap_or_else(|| info_hash.to_hex());

        let shared = Arc::new(RemoteTorrent {
            client: self.client.clone(),
            base: format!("{}/torrents/{}", self.endpoint, torrent_id),
            request_timeout: self.request_timeout,
            stats: Mutex::new(TransferStats::default()),
            released: AtomicBool::new(false),
        });

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(poll_torrent(
            Arc::clone(&shared),
            added.details.metadata(),
            self.poll_interval,
            tx,
        ));

        debug!(info_hash = %info_hash, torrent_id = %torrent_id, "Daemon accepted torrent");

        Ok(Submission {
            info_hash,
            handle: Arc::new(RemoteHandle { shared }),
            events: rx,
        })
    }
}

struct RemoteTorrent {
    client: reqwest::Client,
    base: String,
    request_timeout: Duration,
    stats: Mutex<TransferStats>,
    released: AtomicBool,
}

impl RemoteTorrent {
    async fn fetch_details(&self) -> Result<TorrentDetails, EngineError> {
        let response = self
            .client
            .get(&self.base)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(transport_error)?
            .error_for_status()
            .map_err(transport_error)?;

        response
            .json::<TorrentDetails>()
            .await
            .map_err(|e| EngineError::Protocol(format!("invalid details response: {}", e)))
    }

    async fn fetch_stats(&self) -> Result<DaemonStats, EngineError> {
        let response = self
            .client
            .get(format!("{}/stats/v1", self.base))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(transport_error)?
            .error_for_status()
            .map_err(transport_error)?;

        response
            .json::<DaemonStats>()
            .await
            .map_err(|e| EngineError::Protocol(format!("invalid stats response: {}", e)))
    }
}

/// Turn daemon polling into engine events until the handle is released or
/// nobody listens any more
async fn poll_torrent(
    torrent: Arc<RemoteTorrent>,
    mut metadata: Option<TorrentMetadata>,
    poll_interval: Duration,
    tx: mpsc::Sender<EngineEvent>,
) {
    let mut metadata_sent = false;
    let mut ready_sent = false;
    let mut interval = tokio::time::interval(poll_interval);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tx.closed() => break,
        }

        if torrent.released.load(Ordering::SeqCst) {
            break;
        }

        if !metadata_sent {
            if metadata.is_none() {
                match torrent.fetch_details().await {
                    Ok(details) => metadata = details.metadata(),
                    Err(e) => {
                        debug!(torrent = %torrent.base, error = %e, "Details poll failed");
                        continue;
                    }
                }
            }

            if let Some(found) = metadata.take() {
                if tx.send(EngineEvent::MetadataReady(found)).await.is_err() {
                    break;
                }
                metadata_sent = true;
            }
        }

        let stats = match torrent.fetch_stats().await {
            Ok(stats) => stats,
            Err(e) => {
                debug!(torrent = %torrent.base, error = %e, "Stats poll failed");
                continue;
            }
        };

        *torrent.stats.lock() = stats.to_transfer_stats();

        if let Some(message) = stats.failure() {
            let _ = tx.send(EngineEvent::Error(message)).await;
            break;
        }

        if metadata_sent && !ready_sent && stats.is_live() {
            if tx.send(EngineEvent::ContentReady).await.is_err() {
                break;
            }
            ready_sent = true;
        }
    }

    debug!(torrent = %torrent.base, "Stopped polling daemon");
}

struct RemoteHandle {
    shared: Arc<RemoteTorrent>,
}

#[async_trait]
impl TorrentHandle for RemoteHandle {
    async fn read_stream(
        &self,
        file_index: usize,
        range: ByteRange,
    ) -> Result<ByteStream, EngineError> {
        if self.shared.released.load(Ordering::SeqCst) {
            return Err(EngineError::Released);
        }

        // Only the response head is bounded; the body stays open while the player reads
        let request = self
            .shared
            .client
            .get(format!("{}/stream/{}", self.shared.base, file_index))
            .header(header::RANGE, format!("bytes={}-{}", range.start, range.end))
            .send();
        let response = tokio::time::timeout(self.shared.request_timeout, request)
            .await
            .map_err(|_| {
                EngineError::Unavailable(format!(
                    "daemon did not answer range request within {:?}",
                    self.shared.request_timeout
                ))
            })?
            .map_err(transport_error)?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => {}
            // Daemon ignored the range; only usable when the span starts at zero
            StatusCode::OK if range.start == 0 => {}
            StatusCode::NOT_FOUND => return Err(EngineError::FileNotFound(file_index)),
            status => {
                return Err(EngineError::Read(format!(
                    "daemon answered range request with {}",
                    status
                )))
            }
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(io::Error::other));

        Ok(stream.boxed())
    }

    fn stats(&self) -> TransferStats {
        *self.shared.stats.lock()
    }

    async fn release(&self) -> Result<(), EngineError> {
        if self.shared.released.swap(true, Ordering::SeqCst) {
            return Err(EngineError::Released);
        }

        let response = self
            .shared
            .client
            .post(format!("{}/forget", self.shared.base))
            .timeout(self.shared.request_timeout)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            warn!(
                torrent = %self.shared.base,
                status = %response.status(),
                "Daemon refused to forget torrent"
            );
            return Err(EngineError::Protocol(format!(
                "forget returned {}",
                response.status()
            )));
        }

        Ok(())
    }
}
