//! Transfer engine seam.
//!
//! The peer-to-peer engine is a black box that accepts a torrent identifier,
//! reports lifecycle events on a per-submission channel and serves byte
//! ranges of individual files as pull-based streams.

pub mod remote;
pub mod simulated;

use crate::models::torrent::{InfoHash, TorrentMetadata};
use crate::streaming::range::ByteRange;
use crate::validation::identifier::TorrentSource;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Byte stream over one file span. Nothing is produced until polled.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Capacity of the per-submission event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 8;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine rejected torrent: {0}")]
    Rejected(String),

    #[error("engine unavailable: {0}")]
    Unavailable(String),

    #[error("torrent handle already released")]
    Released,

    #[error("file {0} not found in torrent")]
    FileNotFound(usize),

    #[error("read failed: {0}")]
    Read(String),

    #[error("unexpected engine response: {0}")]
    Protocol(String),
}

/// Lifecycle events emitted by the engine for one submission
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    /// File list and sizes are known
    MetadataReady(TorrentMetadata),
    /// Enough data is buffered to serve continuous reads
    ContentReady,
    /// The transfer failed and will make no further progress
    Error(String),
}

/// Transfer counters sampled from the engine
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferStats {
    /// Fraction of the torrent downloaded, 0.0 to 1.0
    pub progress: f64,
    /// Bytes per second
    pub download_rate: u64,
    /// Bytes per second
    pub upload_rate: u64,
    pub peer_count: u32,
    pub bytes_downloaded: u64,
    pub bytes_uploaded: u64,
}

impl TransferStats {
    /// No data is moving in either direction
    pub fn is_quiet(&self) -> bool {
        self.download_rate == 0 && self.upload_rate == 0
    }
}

/// Result of a successful submission
pub struct Submission {
    /// Hash the engine resolved the identifier to
    pub info_hash: InfoHash,
    pub handle: Arc<dyn TorrentHandle>,
    pub events: mpsc::Receiver<EngineEvent>,
}

#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// Short label used in logs and the service banner
    fn name(&self) -> &'static str;

    /// Start a transfer. Returns once the engine has acknowledged the identifier.
    async fn submit(&self, source: &TorrentSource) -> Result<Submission, EngineError>;
}

/// Engine-side handle for one torrent. Owned by exactly one session.
#[async_trait]
pub trait TorrentHandle: Send + Sync {
    /// Open a stream over `range` (inclusive) of file `file_index`
    async fn read_stream(
        &self,
        file_index: usize,
        range: ByteRange,
    ) -> Result<ByteStream, EngineError>;

    /// Latest transfer counters
    fn stats(&self) -> TransferStats;

    /// Stop the transfer and free engine resources. Later reads fail with `Released`.
    async fn release(&self) -> Result<(), EngineError>;
}
