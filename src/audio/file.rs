use anyhow::{bail, Context, Result};
use hound::WavReader;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use super::backend::{AudioBackend, AudioFormat, AudioFrame};

/// Samples per emitted frame (20 ms at 16 kHz)
const CHUNK_SAMPLES: usize = 320;

pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
            bail!(
                "Expected 16-bit integer PCM, got {}-bit {:?}",
                spec.bits_per_sample,
                spec.sample_format
            );
        }

        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?;

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }
}

/// Replays a 16 kHz mono WAV file as if it were a microphone.
///
/// Frames are paced in real time unless `paced` is turned off.
pub struct WavFileBackend {
    file: Arc<AudioFile>,
    paced: bool,
    capturing: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl WavFileBackend {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = AudioFile::open(path)?;

        if file.sample_rate != AudioFormat::CAPTURE.sample_rate || file.channels != 1 {
            bail!(
                "Expected {}Hz mono, got {}Hz {}ch",
                AudioFormat::CAPTURE.sample_rate,
                file.sample_rate,
                file.channels
            );
        }

        Ok(Self {
            file: Arc::new(file),
            paced: true,
            capturing: Arc::new(AtomicBool::new(false)),
            task: None,
        })
    }

    /// Emit all frames as fast as the consumer accepts them
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }
}

#[async_trait::async_trait]
impl AudioBackend for WavFileBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.capturing.load(Ordering::SeqCst) {
            bail!("Already capturing");
        }
        self.capturing.store(true, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(64);
        let file = Arc::clone(&self.file);
        let capturing = Arc::clone(&self.capturing);
        let paced = self.paced;
        let chunk_duration = Duration::from_millis(
            (CHUNK_SAMPLES as u64 * 1000) / AudioFormat::CAPTURE.sample_rate as u64,
        );

        info!("Replaying {} as capture input", file.path);

        self.task = Some(tokio::spawn(async move {
            for chunk in file.samples.chunks(CHUNK_SAMPLES) {
                if !capturing.load(Ordering::SeqCst) {
                    break;
                }
                let frame = AudioFrame::from_samples(chunk, AudioFormat::CAPTURE);
                if tx.send(frame).await.is_err() {
                    break;
                }
                if paced {
                    tokio::time::sleep(chunk_duration).await;
                }
            }
            info!("File replay finished");
        }));

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.capturing.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "WAV file"
    }
}
