//! In-process engine that serves deterministic file content.
//!
//! Used by the test suite and by the `simulated` runtime mode. Torrents can be
//! registered up front; any other 40-hex hash gets a synthesized single-file
//! torrent. Faults can be injected per hash.

use super::{
    ByteStream, EngineError, EngineEvent, Submission, TorrentHandle, TransferEngine,
    TransferStats, EVENT_CHANNEL_CAPACITY,
};
use crate::models::torrent::{InfoHash, TorrentMetadata};
use crate::streaming::range::ByteRange;
use crate::validation::identifier::TorrentSource;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

const CHUNK_SIZE: u64 = 64 * 1024;

/// Byte at `offset` of file `file_index` in every simulated torrent
pub fn pattern_byte(file_index: usize, offset: u64) -> u8 {
    ((offset + file_index as u64 * 7) % 251) as u8
}

/// Failure modes that can be attached to a hash
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fault {
    /// Acknowledge the submission but never deliver metadata
    StallMetadata,
    /// Refuse the submission outright
    RejectSubmission,
    /// Acknowledge, then report an engine error instead of metadata
    FailAfterSubmit(String),
    /// Deliver metadata but never signal content readiness
    NeverReady,
    /// Reads error out after this many bytes
    FailReadsAfter(u64),
}

#[derive(Clone, Debug)]
pub struct SimulatedOptions {
    pub metadata_delay: Duration,
    pub ready_delay: Duration,
    pub default_file_size: u64,
}

impl Default for SimulatedOptions {
    fn default() -> Self {
        Self {
            metadata_delay: Duration::from_millis(100),
            ready_delay: Duration::from_millis(200),
            default_file_size: 1024 * 1024,
        }
    }
}

pub struct SimulatedEngine {
    options: SimulatedOptions,
    catalog: DashMap<InfoHash, TorrentMetadata>,
    aliases: DashMap<String, InfoHash>,
    faults: DashMap<InfoHash, Fault>,
    stats: Arc<DashMap<InfoHash, TransferStats>>,
    submissions: AtomicUsize,
    releases: Arc<AtomicUsize>,
}

impl SimulatedEngine {
    pub fn new(options: SimulatedOptions) -> Self {
        Self {
            options,
            catalog: DashMap::new(),
            aliases: DashMap::new(),
            faults: DashMap::new(),
            stats: Arc::new(DashMap::new()),
            submissions: AtomicUsize::new(0),
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Register a torrent with an explicit file list
    pub fn add_torrent(&self, info_hash: InfoHash, metadata: TorrentMetadata) {
        self.catalog.insert(info_hash, metadata);
    }

    /// Resolve an identifier without a derivable hash (torrent URL, base32 magnet)
    pub fn add_alias(&self, uri: impl Into<String>, info_hash: InfoHash) {
        self.aliases.insert(uri.into(), info_hash);
    }

    pub fn inject_fault(&self, info_hash: InfoHash, fault: Fault) {
        self.faults.insert(info_hash, fault);
    }

    pub fn clear_fault(&self, info_hash: InfoHash) {
        self.faults.remove(&info_hash);
    }

    pub fn set_stats(&self, info_hash: InfoHash, stats: TransferStats) {
        self.stats.insert(info_hash, stats);
    }

    /// Number of submissions accepted or rejected so far
    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Number of handles released so far
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    fn resolve(&self, source: &TorrentSource) -> Result<InfoHash, EngineError> {
        if let Some(info_hash) = source.info_hash() {
            return Ok(info_hash);
        }

        self.aliases
            .get(source.uri())
            .map(|entry| *entry.value())
            .ok_or_else(|| {
                EngineError::Rejected(format!("cannot resolve '{}'", source.uri()))
            })
    }

    fn metadata_for(&self, info_hash: InfoHash) -> TorrentMetadata {
        match self.catalog.get(&info_hash) {
            Some(entry) => entry.value().clone(),
            None => {
                let name = info_hash.to_hex();
                TorrentMetadata::from_files(
                    name.clone(),
                    vec![(format!("{}.mp4", name), self.options.default_file_size)],
                )
            }
        }
    }
}

#[async_trait]
impl TransferEngine for SimulatedEngine {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn submit(&self, source: &TorrentSource) -> Result<Submission, EngineError> {
        self.submissions.fetch_add(1, Ordering::SeqCst);

        let info_hash = self.resolve(source)?;
        let fault = self.faults.get(&info_hash).map(|entry| entry.value().clone());

        if fault == Some(Fault::RejectSubmission) {
            return Err(EngineError::Rejected(format!(
                "submission refused for {}",
                info_hash
            )));
        }

        let metadata = self.metadata_for(info_hash);
        let fail_reads_after = match fault {
            Some(Fault::FailReadsAfter(limit)) => Some(limit),
            _ => None,
        };

        let handle = Arc::new(SimulatedHandle {
            info_hash,
            metadata: metadata.clone(),
            fail_reads_after,
            released: AtomicBool::new(false),
            releases: Arc::clone(&self.releases),
            stats: Arc::clone(&self.stats),
        });

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let metadata_delay = self.options.metadata_delay;
        let ready_delay = self.options.ready_delay;

        tokio::spawn(async move {
            tokio::time::sleep(metadata_delay).await;

            match fault {
                Some(Fault::StallMetadata) => {
                    tx.closed().await;
                    return;
                }
                Some(Fault::FailAfterSubmit(message)) => {
                    let _ = tx.send(EngineEvent::Error(message)).await;
                    return;
                }
                _ => {}
            }

            if tx.send(EngineEvent::MetadataReady(metadata)).await.is_err() {
                return;
            }

            if fault == Some(Fault::NeverReady) {
                tx.closed().await;
                return;
            }

            tokio::time::sleep(ready_delay).await;
            let _ = tx.send(EngineEvent::ContentReady).await;
        });

        debug!(info_hash = %info_hash, uri = %source.uri(), "Simulated submission accepted");

        Ok(Submission {
            info_hash,
            handle,
            events: rx,
        })
    }
}

struct SimulatedHandle {
    info_hash: InfoHash,
    metadata: TorrentMetadata,
    fail_reads_after: Option<u64>,
    released: AtomicBool,
    releases: Arc<AtomicUsize>,
    stats: Arc<DashMap<InfoHash, TransferStats>>,
}

struct ReadCursor {
    file_index: usize,
    offset: u64,
    end: u64,
    remaining_before_fault: Option<u64>,
    done: bool,
}

#[async_trait]
impl TorrentHandle for SimulatedHandle {
    async fn read_stream(
        &self,
        file_index: usize,
        range: ByteRange,
    ) -> Result<ByteStream, EngineError> {
        if self.released.load(Ordering::SeqCst) {
            return Err(EngineError::Released);
        }

        let file = self
            .metadata
            .files
            .get(file_index)
            .ok_or(EngineError::FileNotFound(file_index))?;

        if range.end >= file.length {
            return Err(EngineError::Read(format!(
                "range {}-{} beyond end of file ({} bytes)",
                range.start, range.end, file.length
            )));
        }

        let cursor = ReadCursor {
            file_index,
            offset: range.start,
            end: range.end + 1,
            remaining_before_fault: self.fail_reads_after,
            done: false,
        };

        let stream = stream::unfold(cursor, |mut cursor| async move {
            if cursor.done || cursor.offset >= cursor.end {
                return None;
            }

            let mut size = CHUNK_SIZE.min(cursor.end - cursor.offset);
            if let Some(remaining) = cursor.remaining_before_fault {
                if remaining == 0 {
                    cursor.done = true;
                    let err = io::Error::other("simulated read failure");
                    return Some((Err(err), cursor));
                }
                size = size.min(remaining);
                cursor.remaining_before_fault = Some(remaining - size);
            }

            let chunk: Vec<u8> = (cursor.offset..cursor.offset + size)
                .map(|offset| pattern_byte(cursor.file_index, offset))
                .collect();
            cursor.offset += size;

            Some((Ok(Bytes::from(chunk)), cursor))
        });

        Ok(stream.boxed())
    }

    fn stats(&self) -> TransferStats {
        self.stats
            .get(&self.info_hash)
            .map(|entry| *entry.value())
            .unwrap_or_default()
    }

    async fn release(&self) -> Result<(), EngineError> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Err(EngineError::Released);
        }
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
