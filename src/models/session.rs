use crate::engine::TransferStats;
use crate::models::torrent::InfoHash;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a tracked torrent session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Pending,
    MetadataWait,
    Ready,
    Streaming,
    Idle,
    Failed,
    Evicted,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Failed | SessionState::Evicted)
    }

    /// Metadata is known and files can be enumerated
    pub fn has_metadata(self) -> bool {
        matches!(
            self,
            SessionState::Ready | SessionState::Streaming | SessionState::Idle
        )
    }

    /// Either metadata arrived or the session is gone
    pub fn is_resolved(self) -> bool {
        self.has_metadata() || self.is_terminal()
    }

    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        match (self, next) {
            (Pending, MetadataWait) => true,
            (MetadataWait, Ready) => true,
            (Ready, Streaming) | (Ready, Idle) => true,
            (Streaming, Ready) | (Streaming, Idle) => true,
            (Idle, Streaming) => true,
            (Failed, _) | (Evicted, _) => false,
            (_, Failed) | (_, Evicted) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Pending => "pending",
            SessionState::MetadataWait => "metadata_wait",
            SessionState::Ready => "ready",
            SessionState::Streaming => "streaming",
            SessionState::Idle => "idle",
            SessionState::Failed => "failed",
            SessionState::Evicted => "evicted",
        };
        f.write_str(name)
    }
}

/// Why a session left the registry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvictionReason {
    /// Registry grew past `max_sessions`; the oldest admission is dropped
    Capacity,
    /// Idle reaper found no activity and no throughput
    Idle,
    /// Metadata timeout or engine failure
    Failed,
    /// Explicit removal request
    Removed,
    /// Process teardown
    Shutdown,
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EvictionReason::Capacity => "capacity",
            EvictionReason::Idle => "idle",
            EvictionReason::Failed => "failed",
            EvictionReason::Removed => "removed",
            EvictionReason::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// Point-in-time copy of a session, safe to hand out to reporting code
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub info_hash: InfoHash,
    pub name: Option<String>,
    pub state: SessionState,
    pub total_length: Option<u64>,
    pub file_count: usize,
    pub active_streams: usize,
    pub bytes_streamed: u64,
    pub added_at: i64,
    pub idle_seconds: u64,
    pub ready: bool,
    pub transfer: TransferStats,
}

/// Transfer status reported by the status endpoint
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TorrentStatus {
    pub info_hash: InfoHash,
    pub progress: f64,
    pub download_rate: u64,
    pub upload_rate: u64,
    pub peer_count: u32,
    pub bytes_downloaded: u64,
    pub bytes_uploaded: u64,
    pub ready: bool,
}
