use crate::models::session::{SessionSnapshot, SessionState};
use crate::utils::time::current_timestamp;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct Metrics {
    pub sessions_added: AtomicU64,
    pub sessions_failed: AtomicU64,
    pub sessions_evicted: AtomicU64,
    pub sessions_reaped: AtomicU64,
    pub sessions_removed: AtomicU64,
    pub streams_opened: AtomicU64,
    pub stream_errors: AtomicU64,
    pub bytes_streamed: AtomicU64,
    pub start_time: i64,
}

#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    pub sessions_added: u64,
    pub sessions_failed: u64,
    #[serde(rename = "sessions_evicted_capacity")]
    pub sessions_evicted: u64,
    #[serde(rename = "sessions_reaped_idle")]
    pub sessions_reaped: u64,
    pub sessions_removed: u64,
    pub active_sessions: usize,
    pub streaming_sessions: usize,
    pub active_streams: usize,
    pub streams_opened: u64,
    pub stream_errors: u64,
    pub bytes_streamed: u64,
    pub uptime_seconds: i64,
    pub bytes_per_second: f64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            sessions_added: AtomicU64::new(0),
            sessions_failed: AtomicU64::new(0),
            sessions_evicted: AtomicU64::new(0),
            sessions_reaped: AtomicU64::new(0),
            sessions_removed: AtomicU64::new(0),
            streams_opened: AtomicU64::new(0),
            stream_errors: AtomicU64::new(0),
            bytes_streamed: AtomicU64::new(0),
            start_time: current_timestamp(),
        }
    }

    pub fn increment_added(&self) {
        self.sessions_added.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_failed(&self) {
        self.sessions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_evicted(&self, count: usize) {
        self.sessions_evicted.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn increment_reaped(&self) {
        self.sessions_reaped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_removed(&self) {
        self.sessions_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_streams(&self) {
        self.streams_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_stream_errors(&self) {
        self.stream_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes(&self, count: u64) {
        self.bytes_streamed.fetch_add(count, Ordering::Relaxed);
    }

    /// Combines counters with the live session list and derives
    /// uptime_seconds and bytes_per_second.
    pub fn get_snapshot(&self, sessions: &[SessionSnapshot]) -> MetricsSnapshot {
        let uptime_seconds = current_timestamp() - self.start_time;
        let bytes_streamed = self.bytes_streamed.load(Ordering::Relaxed);

        let bytes_per_second = if uptime_seconds > 0 {
            bytes_streamed as f64 / uptime_seconds as f64
        } else {
            0.0
        };

        MetricsSnapshot {
            sessions_added: self.sessions_added.load(Ordering::Relaxed),
            sessions_failed: self.sessions_failed.load(Ordering::Relaxed),
            sessions_evicted: self.sessions_evicted.load(Ordering::Relaxed),
            sessions_reaped: self.sessions_reaped.load(Ordering::Relaxed),
            sessions_removed: self.sessions_removed.load(Ordering::Relaxed),
            active_sessions: sessions.len(),
            streaming_sessions: sessions
                .iter()
                .filter(|session| session.state == SessionState::Streaming)
                .count(),
            active_streams: sessions.iter().map(|session| session.active_streams).sum(),
            streams_opened: self.streams_opened.load(Ordering::Relaxed),
            stream_errors: self.stream_errors.load(Ordering::Relaxed),
            bytes_streamed,
            uptime_seconds,
            bytes_per_second,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
