//! Microphone capture via cpal.
//!
//! Opens the preferred (conferencing/USB) or default input device, converts
//! whatever the device delivers to 16 kHz mono 16-bit PCM and hands each
//! callback's worth of audio downstream as one `AudioFrame`. No batching
//! happens here; see `FrameBatcher`.

use anyhow::{anyhow, bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::backend::{AudioBackend, AudioFormat, AudioFrame};
use crate::config::AudioConfig;

/// Frames buffered between the device callback and the session sender.
const CHANNEL_CAPACITY: usize = 256;

/// How often the device thread checks whether capture was stopped.
const STOP_POLL: Duration = Duration::from_millis(50);

/// List available input device names.
pub fn list_input_devices() -> Vec<String> {
    let host = cpal::default_host();
    let mut names = Vec::new();
    if let Ok(devices) = host.input_devices() {
        for dev in devices {
            if let Ok(name) = dev.name() {
                names.push(name);
            }
        }
    }
    names
}

/// Index of the first device whose name contains one of `keywords`
/// (case-insensitive).
pub fn preferred_device_index(names: &[String], keywords: &[String]) -> Option<usize> {
    names.iter().position(|name| {
        let lower = name.to_lowercase();
        keywords
            .iter()
            .any(|k| !k.is_empty() && lower.contains(&k.to_lowercase()))
    })
}

/// Microphone backend
///
/// The cpal stream is not `Send`, so it lives on a dedicated thread that
/// holds it open until `stop` clears the capturing flag.
pub struct MicrophoneBackend {
    config: AudioConfig,
    capturing: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl MicrophoneBackend {
    pub fn new(config: AudioConfig) -> Self {
        Self {
            config,
            capturing: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for MicrophoneBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.capturing.load(Ordering::SeqCst) {
            bail!("Already capturing");
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<String>>();

        self.capturing.store(true, Ordering::SeqCst);
        let capturing = Arc::clone(&self.capturing);
        let config = self.config.clone();

        let worker = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                let stream = match open_stream(&config, tx) {
                    Ok((stream, name)) => {
                        let _ = ready_tx.send(Ok(name));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                while capturing.load(Ordering::SeqCst) {
                    std::thread::sleep(STOP_POLL);
                }

                drop(stream);
                debug!("Microphone stream closed");
            })
            .context("Failed to spawn capture thread")?;

        self.worker = Some(worker);

        match ready_rx.await {
            Ok(Ok(name)) => {
                info!("Microphone capture started on '{}'", name);
                Ok(rx)
            }
            Ok(Err(e)) => {
                self.capturing.store(false, Ordering::SeqCst);
                self.worker = None;
                Err(e)
            }
            Err(_) => {
                self.capturing.store(false, Ordering::SeqCst);
                self.worker = None;
                Err(anyhow!("Capture thread exited before the stream opened"))
            }
        }
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.capturing.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        info!("Stopping microphone capture");

        if let Some(worker) = self.worker.take() {
            tokio::task::spawn_blocking(move || {
                if worker.join().is_err() {
                    error!("Capture thread panicked");
                }
            })
            .await
            .context("Failed to join capture thread")?;
        }

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "cpal microphone"
    }
}

impl Drop for MicrophoneBackend {
    fn drop(&mut self) {
        self.capturing.store(false, Ordering::SeqCst);
    }
}

/// Pick the input device: explicit name, then the keyword heuristic, then
/// the system default.
fn select_device(config: &AudioConfig) -> Result<cpal::Device> {
    let host = cpal::default_host();

    if let Some(wanted) = &config.input_device {
        return host
            .input_devices()
            .context("Failed to enumerate input devices")?
            .find(|d| d.name().map(|n| &n == wanted).unwrap_or(false))
            .ok_or_else(|| anyhow!("Input device not found: {}", wanted));
    }

    let devices: Vec<cpal::Device> = host
        .input_devices()
        .map(|devs| devs.collect())
        .unwrap_or_default();
    let names: Vec<String> = devices
        .iter()
        .map(|d| d.name().unwrap_or_default())
        .collect();

    if let Some(idx) = preferred_device_index(&names, &config.preferred_input_keywords) {
        if let Some(device) = devices.into_iter().nth(idx) {
            return Ok(device);
        }
    }

    host.default_input_device()
        .ok_or_else(|| anyhow!("No input device available"))
}

fn open_stream(config: &AudioConfig, tx: mpsc::Sender<AudioFrame>) -> Result<(Stream, String)> {
    let device = select_device(config)?;
    let name = device.name().unwrap_or_else(|_| "unknown".into());

    let default_config = device
        .default_input_config()
        .context("Failed to get default input config")?;

    let stream_config = StreamConfig {
        channels: default_config.channels(),
        sample_rate: default_config.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };

    let converter = FrameConverter {
        channels: stream_config.channels,
        native_rate: stream_config.sample_rate.0,
        target: AudioFormat {
            sample_rate: config.input_sample_rate,
            ..AudioFormat::CAPTURE
        },
    };

    info!(
        device = %name,
        native_rate = converter.native_rate,
        channels = converter.channels,
        "Input device config (converting to {}Hz mono)",
        config.input_sample_rate
    );

    let err_fn = |err: cpal::StreamError| error!("Audio input stream error: {}", err);

    let stream = match default_config.sample_format() {
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                converter.forward(data, &tx);
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let floats: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                converter.forward(&floats, &tx);
            },
            err_fn,
            None,
        ),
        other => bail!("Unsupported input sample format: {:?}", other),
    }
    .context("Failed to build input stream")?;

    stream.play().context("Failed to start input stream")?;

    Ok((stream, name))
}

/// Converts device callbacks to capture-format frames.
#[derive(Clone, Copy)]
struct FrameConverter {
    channels: u16,
    native_rate: u32,
    target: AudioFormat,
}

impl FrameConverter {
    fn forward(&self, data: &[f32], tx: &mpsc::Sender<AudioFrame>) {
        let mono = to_mono(data, self.channels);
        let resampled = resample_linear(&mono, self.native_rate, self.target.sample_rate);
        if resampled.is_empty() {
            return;
        }
        let frame = AudioFrame::new(to_pcm16_bytes(&resampled), self.target);
        if tx.try_send(frame).is_err() {
            warn!("Capture channel full or closed, dropping chunk");
        }
    }
}

/// Down-mix multi-channel audio to mono by averaging channels.
fn to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let ch = channels as usize;
    samples
        .chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Simple linear resampler from `from_rate` to `to_rate` on mono f32 samples.
fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || input.is_empty() {
        return input.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((input.len() as f64) / ratio).floor() as usize;
    let mut output = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_idx = i as f64 * ratio;
        let idx0 = src_idx.floor() as usize;
        let frac = (src_idx - idx0 as f64) as f32;
        let s0 = input.get(idx0).copied().unwrap_or(0.0);
        let s1 = input.get(idx0 + 1).copied().unwrap_or(s0);
        output.push(s0 + frac * (s1 - s0));
    }
    output
}

/// Clamp f32 samples into signed 16-bit little-endian bytes.
fn to_pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .flat_map(|s| s.to_le_bytes())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_conferencing_device() {
        let names = vec![
            "Built-in Microphone".to_string(),
            "Jabra Speak 510 USB".to_string(),
        ];
        let keywords = vec!["usb".to_string(), "jabra".to_string()];
        assert_eq!(preferred_device_index(&names, &keywords), Some(1));
    }

    #[test]
    fn no_preferred_device_falls_through() {
        let names = vec!["Built-in Microphone".to_string()];
        let keywords = vec!["usb".to_string()];
        assert_eq!(preferred_device_index(&names, &keywords), None);
        assert_eq!(preferred_device_index(&names, &[String::new()]), None);
    }

    #[test]
    fn downmix_and_resample_to_capture_rate() {
        let stereo = vec![0.5f32; 48000 * 2 / 100]; // 10 ms at 48 kHz stereo
        let mono = to_mono(&stereo, 2);
        assert_eq!(mono.len(), 480);
        let resampled = resample_linear(&mono, 48000, 16000);
        assert_eq!(resampled.len(), 160);
        assert_eq!(to_pcm16_bytes(&resampled).len(), 320);
    }

    #[test]
    fn pcm16_conversion_clamps() {
        let bytes = to_pcm16_bytes(&[2.0, -2.0]);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), -i16::MAX);
    }
}
