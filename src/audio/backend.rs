use anyhow::Result;
use tokio::sync::mpsc;

use crate::config::AudioConfig;

/// PCM layout of an [`AudioFrame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Bits per sample (signed little-endian integer PCM)
    pub bits_per_sample: u16,
}

impl AudioFormat {
    /// Microphone format expected by the remote endpoint
    pub const CAPTURE: AudioFormat = AudioFormat {
        sample_rate: 16000,
        channels: 1,
        bits_per_sample: 16,
    };

    /// Format of assistant speech returned by the remote endpoint
    pub const PLAYBACK: AudioFormat = AudioFormat {
        sample_rate: 24000,
        channels: 1,
        bits_per_sample: 16,
    };

    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.channels as usize * (self.bits_per_sample as usize / 8)
    }

    /// MIME tag sent alongside transmitted frames, e.g. `audio/pcm;rate=16000`
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }
}

/// One chunk of raw PCM bytes.
///
/// Immutable once produced; moved from stage to stage, never shared.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw little-endian PCM bytes
    pub data: Vec<u8>,
    pub format: AudioFormat,
}

impl AudioFrame {
    pub fn new(data: Vec<u8>, format: AudioFormat) -> Self {
        Self { data, format }
    }

    /// Build a frame from i16 samples
    pub fn from_samples(samples: &[i16], format: AudioFormat) -> Self {
        let data = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Self { data, format }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn duration_ms(&self) -> u64 {
        let bps = self.format.bytes_per_second();
        if bps == 0 {
            return 0;
        }
        (self.data.len() as u64 * 1000) / bps as u64
    }
}

/// Audio capture backend trait
///
/// Implementations:
/// - Microphone: cpal input device, converted to 16 kHz mono 16-bit
/// - File: replay a WAV file (for testing/batch processing)
///
/// Only one capture may be active at a time; callers must not call
/// `start` on a backend that is already capturing.
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that yields frames as soon as they are
    /// available. The sequence is not restartable.
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing audio. Stopping an idle backend is a no-op.
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create audio backend based on source and configuration
    pub fn create(source: AudioSource, config: &AudioConfig) -> Result<Box<dyn AudioBackend>> {
        match source {
            AudioSource::Microphone => {
                let backend = super::capture::MicrophoneBackend::new(config.clone());
                Ok(Box::new(backend))
            }

            AudioSource::File(path) => {
                let backend = super::file::WavFileBackend::open(&path)?;
                Ok(Box::new(backend))
            }
        }
    }
}

/// Audio source type
#[derive(Debug, Clone)]
pub enum AudioSource {
    /// Microphone input (all platforms)
    Microphone,
    /// File input (for testing/batch processing)
    File(String),
}
