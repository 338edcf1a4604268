use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::events::SessionEvent;
use super::state::{SessionState, SessionStateMachine};
use super::stats::{SessionCounters, SessionStats};
use super::tools::{build_instructions, function_declarations, ToolDispatcher};
use crate::audio::{AudioBackend, AudioFormat, AudioFrame, FrameBatcher, JitterPlaybackSink};
use crate::live::messages::{GenerationConfig, Tool};
use crate::live::{ClientMessage, Inbound, LiveConnection, LiveConnector, LiveReceiver, LiveSender, Setup};

type SharedSender = Arc<Mutex<Box<dyn LiveSender>>>;

/// Audio endpoints and the event channel a session is wired to
pub struct SessionIo {
    /// Microphone (or file) capture. `None` runs the session without input.
    pub capture: Option<Box<dyn AudioBackend>>,
    /// Where assistant speech goes. `None` discards it.
    pub sink: Option<JitterPlaybackSink>,
    /// Status, transcript, command and lifecycle events
    pub events: mpsc::UnboundedSender<SessionEvent>,
}

/// One live duplex conversation with the remote service.
///
/// `start` returns immediately in `Connecting`; the handshake, the priming
/// instruction and the sender/receiver tasks all run in the background under
/// a task tracker, so teardown can be awaited with `join` without `stop`
/// ever blocking.
pub struct LiveSession {
    config: SessionConfig,
    state: Arc<SessionStateMachine>,
    cancel: CancellationToken,
    volume: Arc<AtomicU8>,
    counters: Arc<SessionCounters>,
    tracker: TaskTracker,
    started_at: chrono::DateTime<chrono::Utc>,
}

/// State shared by the session's tasks
struct TaskContext {
    session_id: String,
    state: Arc<SessionStateMachine>,
    cancel: CancellationToken,
    counters: Arc<SessionCounters>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl TaskContext {
    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn stopping(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Flip to `Stopping` and wake every task waiting on the token.
    fn request_stop(&self) {
        self.state.begin_stop();
        self.cancel.cancel();
    }

    /// Close the session; `Finished` goes out only once.
    fn finish(&self) {
        self.state.begin_stop();
        if self.state.close() {
            info!("Session {} closed", self.session_id);
            self.emit(SessionEvent::Status("disconnected".to_string()));
            self.emit(SessionEvent::Finished);
        }
    }
}

impl LiveSession {
    /// Start a session on the current tokio runtime.
    pub fn start(config: SessionConfig, connector: Arc<dyn LiveConnector>, io: SessionIo) -> Self {
        info!("Starting live session: {}", config.session_id);

        let state = Arc::new(SessionStateMachine::new());
        let cancel = CancellationToken::new();
        let volume = Arc::new(AtomicU8::new(config.initial_volume.min(100)));
        let counters = Arc::new(SessionCounters::default());

        let ctx = Arc::new(TaskContext {
            session_id: config.session_id.clone(),
            state: Arc::clone(&state),
            cancel: cancel.clone(),
            counters: Arc::clone(&counters),
            events: io.events.clone(),
        });

        let tracker = TaskTracker::new();
        tracker.spawn(run_session(
            ctx,
            config.clone(),
            Arc::clone(&volume),
            connector,
            io,
        ));
        tracker.close();

        Self {
            config,
            state,
            cancel,
            volume,
            counters,
            tracker,
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.session_id
    }

    pub fn state(&self) -> SessionState {
        self.state.current()
    }

    /// Connecting, ready or active
    pub fn is_live(&self) -> bool {
        self.state.is_live()
    }

    /// Current background volume as tracked by tool calls
    pub fn volume(&self) -> u8 {
        self.volume.load(Ordering::SeqCst)
    }

    /// Signal the session to stop. Does not wait; calling it again is a no-op.
    pub fn stop(&self) {
        if self.state.begin_stop() {
            info!("Stopping live session: {}", self.config.session_id);
        }
        self.cancel.cancel();
    }

    /// Wait until every session task has exited.
    pub async fn join(&self) {
        self.tracker.wait().await;
    }

    pub fn stats(&self) -> SessionStats {
        let duration = Utc::now().signed_duration_since(self.started_at);
        let c = &self.counters;

        SessionStats {
            session_id: self.config.session_id.clone(),
            state: self.state.current().to_string(),
            started_at: self.started_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            frames_sent: SessionCounters::get(&c.frames_sent),
            bytes_sent: SessionCounters::get(&c.bytes_sent),
            audio_bytes_received: SessionCounters::get(&c.audio_bytes_received),
            transcript_fragments: SessionCounters::get(&c.transcript_fragments),
            tool_calls: SessionCounters::get(&c.tool_calls),
        }
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Connect, prime, run sender and receiver, then close.
async fn run_session(
    ctx: Arc<TaskContext>,
    config: SessionConfig,
    volume: Arc<AtomicU8>,
    connector: Arc<dyn LiveConnector>,
    io: SessionIo,
) {
    let SessionIo { mut capture, sink, .. } = io;

    ctx.emit(SessionEvent::Status("connecting".to_string()));

    let setup = Setup {
        model: config.live.model.clone(),
        generation_config: GenerationConfig::audio(config.live.voice.clone()),
        system_instruction: None,
        tools: vec![Tool {
            function_declarations: function_declarations(),
        }],
    };

    let connection = tokio::select! {
        _ = ctx.cancel.cancelled() => None,
        result = connector.connect(setup) => match result {
            Ok(connection) => Some(connection),
            Err(e) => {
                if !ctx.stopping() {
                    error!("Session {} failed to connect: {:#}", ctx.session_id, e);
                    ctx.emit(SessionEvent::Error(format!("Connection failed: {}", e)));
                }
                None
            }
        }
    };

    let Some(LiveConnection { sender, receiver }) = connection else {
        ctx.finish();
        return;
    };
    let sender: SharedSender = Arc::new(Mutex::new(sender));

    let instructions = build_instructions(volume.load(Ordering::SeqCst));
    if let Err(e) = sender
        .lock()
        .await
        .send(&ClientMessage::text_turn(instructions))
        .await
    {
        if !ctx.stopping() {
            error!("Session {} failed to send instructions: {:#}", ctx.session_id, e);
            ctx.emit(SessionEvent::Error(format!("Failed to prime session: {}", e)));
        }
        let _ = sender.lock().await.close().await;
        ctx.finish();
        return;
    }

    ctx.state.connected();
    info!("Session {} connected", ctx.session_id);
    ctx.emit(SessionEvent::Status("connected".to_string()));
    ctx.emit(SessionEvent::Connected);

    let capture_rx = match capture.as_mut() {
        Some(backend) => match backend.start().await {
            Ok(rx) => {
                info!("Capturing from {}", backend.name());
                Some(rx)
            }
            Err(e) => {
                error!("Audio capture unavailable ({}): {:#}", backend.name(), e);
                ctx.emit(SessionEvent::Status(format!("microphone unavailable: {}", e)));
                None
            }
        },
        None => None,
    };

    if ctx.state.activate() {
        debug!("Session {} active", ctx.session_id);
    }

    let dispatcher = ToolDispatcher::new(volume, ctx.events.clone());

    let send_task = tokio::spawn(sender_loop(
        Arc::clone(&ctx),
        Arc::clone(&sender),
        capture_rx,
        config.frame_bytes,
        config.capture_format,
        config.idle_poll,
    ));
    let recv_task = tokio::spawn(receiver_loop(
        Arc::clone(&ctx),
        Arc::clone(&sender),
        receiver,
        dispatcher,
        sink,
    ));

    let (send_result, recv_result) = tokio::join!(send_task, recv_task);
    if let Err(e) = send_result {
        error!("Sender task panicked: {}", e);
    }
    if let Err(e) = recv_result {
        error!("Receiver task panicked: {}", e);
    }

    if let Some(backend) = capture.as_mut() {
        if let Err(e) = backend.stop().await {
            warn!("Failed to stop audio capture: {:#}", e);
        }
    }

    if let Err(e) = sender.lock().await.close().await {
        debug!("Transport close: {:#}", e);
    }

    ctx.finish();
}

async fn sender_loop(
    ctx: Arc<TaskContext>,
    sender: SharedSender,
    capture: Option<mpsc::Receiver<AudioFrame>>,
    frame_bytes: usize,
    format: AudioFormat,
    idle_poll: Duration,
) {
    info!("Sender task started");

    if let Err(e) = run_sender(&ctx, &sender, capture, frame_bytes, format, idle_poll).await {
        if !ctx.stopping() {
            error!("Sender task stopped: {:#}", e);
            ctx.emit(SessionEvent::Error(format!("Audio send failed: {}", e)));
        }
    }

    info!("Sender task stopped");
}

/// Drain capture into frames of at least `frame_bytes`, flushing whatever is
/// pending as soon as the capture queue runs dry.
async fn run_sender(
    ctx: &TaskContext,
    sender: &SharedSender,
    capture: Option<mpsc::Receiver<AudioFrame>>,
    frame_bytes: usize,
    format: AudioFormat,
    idle_poll: Duration,
) -> Result<()> {
    let Some(mut capture) = capture else {
        ctx.cancel.cancelled().await;
        return Ok(());
    };

    let mime_type = format.mime_type();
    let mut batcher = FrameBatcher::new(frame_bytes);

    while !ctx.stopping() {
        match capture.try_recv() {
            Ok(frame) => {
                if let Some(payload) = batcher.push(&frame.data) {
                    transmit(ctx, sender, &payload, &mime_type).await?;
                }
            }
            Err(e) => {
                if let Some(payload) = batcher.flush() {
                    transmit(ctx, sender, &payload, &mime_type).await?;
                    continue;
                }
                if e == TryRecvError::Disconnected {
                    debug!("Capture ended, sender idle until stop");
                    ctx.cancel.cancelled().await;
                    break;
                }
                tokio::select! {
                    _ = ctx.cancel.cancelled() => break,
                    _ = tokio::time::sleep(idle_poll) => {}
                }
            }
        }
    }

    Ok(())
}

async fn transmit(
    ctx: &TaskContext,
    sender: &SharedSender,
    payload: &[u8],
    mime_type: &str,
) -> Result<()> {
    let msg = ClientMessage::audio(payload, mime_type);
    sender
        .lock()
        .await
        .send(&msg)
        .await
        .context("Failed to transmit audio frame")?;

    SessionCounters::add(&ctx.counters.frames_sent, 1);
    SessionCounters::add(&ctx.counters.bytes_sent, payload.len() as u64);
    Ok(())
}

async fn receiver_loop(
    ctx: Arc<TaskContext>,
    sender: SharedSender,
    receiver: Box<dyn LiveReceiver>,
    dispatcher: ToolDispatcher,
    sink: Option<JitterPlaybackSink>,
) {
    info!("Receiver task started");

    if let Err(e) = run_receiver(&ctx, &sender, receiver, &dispatcher, sink.as_ref()).await {
        if !ctx.stopping() {
            error!("Receiver task stopped: {:#}", e);
            ctx.emit(SessionEvent::Error(format!("Receive failed: {}", e)));
        }
    }

    info!("Receiver task stopped");
}

async fn run_receiver(
    ctx: &TaskContext,
    sender: &SharedSender,
    mut receiver: Box<dyn LiveReceiver>,
    dispatcher: &ToolDispatcher,
    sink: Option<&JitterPlaybackSink>,
) -> Result<()> {
    let mut turn_audio_started = false;

    loop {
        let next = tokio::select! {
            _ = ctx.cancel.cancelled() => return Ok(()),
            msg = receiver.recv() => msg?,
        };

        let Some(message) = next else {
            info!("Remote side closed session {}", ctx.session_id);
            ctx.request_stop();
            return Ok(());
        };

        for inbound in message.into_inbound() {
            match inbound {
                Inbound::SetupComplete => {}
                Inbound::Text(text) => {
                    SessionCounters::add(&ctx.counters.transcript_fragments, 1);
                    ctx.emit(SessionEvent::Transcript(text));
                }
                Inbound::Audio(bytes) => {
                    if !turn_audio_started {
                        turn_audio_started = true;
                        ctx.emit(SessionEvent::AssistantAudioStarted);
                    }
                    SessionCounters::add(&ctx.counters.audio_bytes_received, bytes.len() as u64);
                    if let Some(sink) = sink {
                        sink.play(&bytes);
                    }
                }
                Inbound::Interrupted => {
                    turn_audio_started = false;
                    if let Some(sink) = sink {
                        sink.clear();
                    }
                }
                Inbound::TurnComplete => {
                    turn_audio_started = false;
                    ctx.emit(SessionEvent::TurnComplete);
                }
                Inbound::ToolCalls(calls) => {
                    let outcome = dispatcher.dispatch_batch(&calls);
                    SessionCounters::add(&ctx.counters.tool_calls, calls.len() as u64);

                    sender
                        .lock()
                        .await
                        .send(&ClientMessage::tool_response(outcome.responses))
                        .await
                        .context("Failed to send tool responses")?;

                    if outcome.quit {
                        info!("quit_talk received, ending session {}", ctx.session_id);
                        ctx.request_stop();
                    }
                }
            }
        }
    }
}
