use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics about a live session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Session identifier
    pub session_id: String,

    /// Current state name
    pub state: String,

    /// When the session started
    pub started_at: DateTime<Utc>,

    /// Total duration in seconds
    pub duration_secs: f64,

    /// Transmit frames sent
    pub frames_sent: u64,

    /// Microphone bytes sent
    pub bytes_sent: u64,

    /// Assistant audio bytes received
    pub audio_bytes_received: u64,

    /// Transcript fragments received
    pub transcript_fragments: u64,

    /// Tool calls dispatched
    pub tool_calls: u64,
}

/// Live counters updated by the session tasks
#[derive(Debug, Default)]
pub(crate) struct SessionCounters {
    pub frames_sent: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub audio_bytes_received: AtomicU64,
    pub transcript_fragments: AtomicU64,
    pub tool_calls: AtomicU64,
}

impl SessionCounters {
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}
