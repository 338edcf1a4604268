use std::time::Duration;

use crate::audio::AudioFormat;
use crate::config::LiveConfig;

/// Configuration for one live session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Unique session identifier (e.g., "talk-6f1c...")
    pub session_id: String,

    /// Remote endpoint, model, voice and credentials
    pub live: LiveConfig,

    /// Background volume at session start (0-100), read from the player
    pub initial_volume: u8,

    /// Minimum transmit frame size in bytes
    /// Default: 4096 (~128 ms of 16 kHz mono 16-bit audio)
    pub frame_bytes: usize,

    /// Format of transmitted microphone audio
    pub capture_format: AudioFormat,

    /// Sender backoff when the capture queue is empty and nothing is pending
    pub idle_poll: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: format!("talk-{}", uuid::Uuid::new_v4()),
            live: LiveConfig::default(),
            initial_volume: 50,
            frame_bytes: 4096,
            capture_format: AudioFormat::CAPTURE,
            idle_poll: Duration::from_millis(10),
        }
    }
}
