//! Jitter-buffered playback of assistant speech.
//!
//! Decoded audio arrives in irregular bursts from the session receiver. It
//! is appended to a byte queue and a fixed-period tick drains the queue into
//! the output device in chunks of at least `min_chunk_bytes`, as much as the
//! device can currently take. The queue is capped: on sustained overrun it
//! is trimmed to the most recent `trim_to_bytes`, keeping latency bounded at
//! the cost of continuity.

use anyhow::{anyhow, bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PlaybackConfig;

/// Something the drain tick can write PCM bytes into.
pub trait OutputDevice: Send {
    /// Bytes the device can accept right now without blocking.
    fn bytes_free(&self) -> usize;

    /// Write bytes; returns how many were accepted.
    fn write(&mut self, data: &[u8]) -> usize;
}

struct PlaybackQueue {
    bytes: VecDeque<u8>,
    last_append: Option<Instant>,
    trimmed_bytes: u64,
}

struct SinkInner {
    config: PlaybackConfig,
    queue: Mutex<PlaybackQueue>,
    drain: Mutex<Option<CancellationToken>>,
}

/// Bounded jitter buffer between the session receiver and the speaker.
///
/// Cloning shares the same queue.
#[derive(Clone)]
pub struct JitterPlaybackSink {
    inner: Arc<SinkInner>,
}

impl JitterPlaybackSink {
    pub fn new(config: PlaybackConfig) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                config,
                queue: Mutex::new(PlaybackQueue {
                    bytes: VecDeque::new(),
                    last_append: None,
                    trimmed_bytes: 0,
                }),
                drain: Mutex::new(None),
            }),
        }
    }

    /// Append decoded audio to the tail of the queue. Never blocks on the device.
    pub fn play(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }

        let cfg = &self.inner.config;
        let mut queue = self.queue();
        queue.bytes.extend(data.iter().copied());
        queue.last_append = Some(Instant::now());

        if queue.bytes.len() > cfg.max_queue_bytes {
            let mut excess = queue.bytes.len() - cfg.trim_to_bytes.min(cfg.max_queue_bytes);
            // stay on a 16-bit sample boundary
            if excess % 2 == 1 && excess < queue.bytes.len() {
                excess += 1;
            }
            queue.bytes.drain(..excess);
            queue.trimmed_bytes += excess as u64;
            warn!(
                "Playback queue overrun, dropped {} bytes (kept {})",
                excess,
                queue.bytes.len()
            );
        }
    }

    /// One drain step: move as much queued audio into `device` as it accepts.
    ///
    /// Writes only when both the device's free space and the queue hold at
    /// least `min_chunk_bytes`, then writes the smaller of the two. A final
    /// tail shorter than the minimum is written once no audio has arrived for
    /// `tail_flush_ms`. Returns the number of bytes written.
    pub fn tick(&self, device: &mut dyn OutputDevice) -> usize {
        let cfg = &self.inner.config;
        let mut queue = self.queue();

        let queued = queue.bytes.len();
        if queued == 0 {
            return 0;
        }

        let free = device.bytes_free();
        let min = cfg.min_chunk_bytes;

        let mut n = if free >= min && queued >= min {
            free.min(queued)
        } else if queued < min && free >= queued && tail_is_stale(&queue, cfg) {
            queued
        } else {
            return 0;
        };

        if n < queued {
            n -= n % 2;
        }
        if n == 0 {
            return 0;
        }

        let written = {
            let contiguous = queue.bytes.make_contiguous();
            device.write(&contiguous[..n])
        };
        queue.bytes.drain(..written.min(n));
        written
    }

    /// Spawn the periodic drain task onto the current runtime.
    ///
    /// Returns `false` (and drops `device`) if a drain task is already running.
    pub fn start(&self, mut device: Box<dyn OutputDevice>) -> bool {
        let mut drain = self.drain_slot();
        if drain.as_ref().is_some_and(|t| !t.is_cancelled()) {
            warn!("Playback drain already running");
            return false;
        }

        let token = CancellationToken::new();
        *drain = Some(token.clone());
        drop(drain);

        let sink = self.clone();
        let period = Duration::from_millis(self.inner.config.tick_ms.max(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!("Playback drain started ({:?} tick)", period);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        sink.tick(device.as_mut());
                    }
                }
            }

            debug!("Playback drain stopped");
        });

        true
    }

    /// Stop draining and discard queued audio. Calling it again is a no-op.
    pub fn stop(&self) {
        if let Some(token) = self.drain_slot().take() {
            token.cancel();
        }
        self.clear();
    }

    /// Discard queued audio (e.g. when the assistant is interrupted).
    pub fn clear(&self) {
        let mut queue = self.queue();
        queue.bytes.clear();
        queue.last_append = None;
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .drain
            .lock()
            .map(|d| d.as_ref().is_some_and(|t| !t.is_cancelled()))
            .unwrap_or(false)
    }

    /// Bytes buffered but not yet written to the device
    pub fn queued(&self) -> usize {
        self.queue().bytes.len()
    }

    /// Total bytes discarded by overrun trimming
    pub fn trimmed_bytes(&self) -> u64 {
        self.queue().trimmed_bytes
    }

    fn queue(&self) -> MutexGuard<'_, PlaybackQueue> {
        self.inner
            .queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn drain_slot(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.inner
            .drain
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn tail_is_stale(queue: &PlaybackQueue, cfg: &PlaybackConfig) -> bool {
    queue
        .last_append
        .map(|t| t.elapsed() >= Duration::from_millis(cfg.tail_flush_ms))
        .unwrap_or(true)
}

/// cpal speaker output fed through a lock-free ring buffer.
///
/// The ring buffer's vacant space is what the drain tick sees as
/// `bytes_free`. The cpal stream runs on its own thread (it is not `Send`)
/// and is closed when this value is dropped.
pub struct CpalOutputDevice {
    producer: HeapProd<u8>,
    alive: Arc<AtomicBool>,
}

impl CpalOutputDevice {
    /// Open the default output device for `source_rate` Hz mono 16-bit input,
    /// with `buffer_ms` of device-side buffering.
    pub fn open(source_rate: u32, buffer_ms: u32) -> Result<Self> {
        let capacity = (source_rate as usize * 2 * buffer_ms as usize) / 1000;
        let (producer, consumer) = HeapRb::<u8>::new(capacity.max(2)).split();

        let alive = Arc::new(AtomicBool::new(true));
        let thread_alive = Arc::clone(&alive);
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<String>>();

        std::thread::Builder::new()
            .name("speaker-output".to_string())
            .spawn(move || {
                let stream = match open_output_stream(consumer, source_rate) {
                    Ok((stream, name)) => {
                        let _ = ready_tx.send(Ok(name));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                while thread_alive.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(50));
                }
                drop(stream);
            })
            .context("Failed to spawn output thread")?;

        let name = ready_rx
            .recv()
            .map_err(|_| anyhow!("Output thread exited before the stream opened"))??;
        info!("Speaker output opened on '{}'", name);

        Ok(Self { producer, alive })
    }
}

impl OutputDevice for CpalOutputDevice {
    fn bytes_free(&self) -> usize {
        let free = self.producer.vacant_len();
        free - free % 2
    }

    fn write(&mut self, data: &[u8]) -> usize {
        self.producer.push_slice(data)
    }
}

impl Drop for CpalOutputDevice {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

/// Pulls 16-bit mono samples from the ring buffer at the device rate.
struct RingReader {
    consumer: HeapCons<u8>,
    step: f64,
    phase: f64,
    current: f32,
}

impl RingReader {
    fn next_sample(&mut self) -> f32 {
        self.phase += self.step;
        while self.phase >= 1.0 {
            self.phase -= 1.0;
            self.current = if self.consumer.occupied_len() >= 2 {
                let lo = self.consumer.try_pop().unwrap_or(0);
                let hi = self.consumer.try_pop().unwrap_or(0);
                i16::from_le_bytes([lo, hi]) as f32 / 32768.0
            } else {
                0.0
            };
        }
        self.current
    }
}

fn open_output_stream(consumer: HeapCons<u8>, source_rate: u32) -> Result<(cpal::Stream, String)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow!("No output device available"))?;
    let name = device.name().unwrap_or_else(|_| "unknown".into());

    let default_config = device
        .default_output_config()
        .context("Failed to get default output config")?;
    let channels = default_config.channels() as usize;
    let stream_config = StreamConfig {
        channels: default_config.channels(),
        sample_rate: default_config.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };

    let mut reader = RingReader {
        consumer,
        step: source_rate as f64 / stream_config.sample_rate.0 as f64,
        phase: 0.0,
        current: 0.0,
    };

    let err_fn = |err: cpal::StreamError| error!("Audio output stream error: {}", err);

    let stream = match default_config.sample_format() {
        SampleFormat::F32 => device.build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    let s = reader.next_sample();
                    frame.iter_mut().for_each(|out| *out = s);
                }
            },
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_output_stream(
            &stream_config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    let s = (reader.next_sample() * i16::MAX as f32) as i16;
                    frame.iter_mut().for_each(|out| *out = s);
                }
            },
            err_fn,
            None,
        ),
        other => bail!("Unsupported output sample format: {:?}", other),
    }
    .context("Failed to build output stream")?;

    stream.play().context("Failed to start output stream")?;

    Ok((stream, name))
}
