use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use scenic_window::audio::{AudioBackendFactory, AudioSource, CpalOutputDevice, JitterPlaybackSink};
use scenic_window::live::{LiveConnector, WebSocketConnector};
use scenic_window::player::{
    AutoplaySupervisor, CommandListener, ConversationActivity, FavoritesStore, PlayerCommand,
    PlayerControl, SupervisorEvent,
};
use scenic_window::session::{SessionEvent, SessionIo, SessionManager};
use scenic_window::{App, ChatAssistant, Config, GeminiTextClient, YtDlpSearch};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Device-side speaker buffering
const SPEAKER_BUFFER_MS: u32 = 500;

#[derive(Parser)]
#[command(name = "scenic-window")]
#[command(about = "Scenery window with a live voice assistant")]
struct Cli {
    /// Config file (extension optional)
    #[arg(short, long, default_value = "config/scenic-window")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Talk to the assistant until it says goodbye or Ctrl-C
    Talk {
        /// Replay a 16 kHz mono 16-bit WAV instead of the microphone
        #[arg(long)]
        input_file: Option<String>,
    },
    /// Run autoplay and the command listener; press Enter to start or end a conversation
    Daemon,
    /// Ask the text assistant once; it may switch the scenery
    Chat { text: String },
    /// Send one raw player command, e.g. '["set_property","volume",40]'
    Send { command: String },
    /// Manage the favorites list
    Favorites {
        #[command(subcommand)]
        action: FavoritesAction,
    },
}

#[derive(Subcommand)]
enum FavoritesAction {
    List,
    Check { url: String },
    Add { title: String, url: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;
    info!("Loaded config: {}", cfg.service.name);

    match cli.command {
        Command::Talk { input_file } => talk(cfg, input_file).await,
        Command::Daemon => daemon(cfg).await,
        Command::Chat { text } => chat(cfg, &text).await,
        Command::Send { command } => send(cfg, &command).await,
        Command::Favorites { action } => favorites(cfg, action),
    }
}

fn build_app(cfg: &Config) -> Arc<App> {
    let connector: Arc<dyn LiveConnector> = Arc::new(WebSocketConnector::new(cfg.live.clone()));
    let sessions = Arc::new(SessionManager::new(connector));
    Arc::new(App::new(
        cfg.clone(),
        PlayerControl::new(cfg.player.clone()),
        Arc::new(YtDlpSearch::new()),
        sessions,
    ))
}

async fn talk(cfg: Config, input_file: Option<String>) -> Result<()> {
    if cfg.live.api_key.is_none() {
        bail!("No API key: set GEMINI_API_KEY or live.api_key");
    }

    let app = build_app(&cfg);
    let cancel = CancellationToken::new();

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C, ending conversation");
            ctrl_c.cancel();
        }
    });

    converse(Arc::clone(&app), &cfg, input_file, cancel).await?;
    app.sessions().wait_retired().await;
    Ok(())
}

/// Run one conversation until it finishes or `cancel` fires.
async fn converse(
    app: Arc<App>,
    cfg: &Config,
    input_file: Option<String>,
    cancel: CancellationToken,
) -> Result<()> {
    let source = match input_file {
        Some(path) => AudioSource::File(path),
        None => AudioSource::Microphone,
    };
    let capture = AudioBackendFactory::create(source, &cfg.audio)?;

    let sink = JitterPlaybackSink::new(cfg.playback.clone());
    match CpalOutputDevice::open(cfg.audio.output_sample_rate, SPEAKER_BUFFER_MS) {
        Ok(device) => {
            sink.start(Box::new(device));
        }
        Err(e) => warn!("Speaker unavailable, assistant audio muted: {:#}", e),
    }

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let session = app
        .start_talk(SessionIo {
            capture: Some(capture),
            sink: Some(sink.clone()),
            events: events_tx,
        })
        .await;

    loop {
        tokio::select! {
            _ = cancel.cancelled(), if session.is_live() => session.stop(),
            event = events_rx.recv() => {
                let Some(event) = event else { break };
                match &event {
                    SessionEvent::Status(status) => info!("Status: {}", status),
                    SessionEvent::Transcript(text) => print!("{}", text),
                    SessionEvent::TurnComplete => println!(),
                    _ => {}
                }
                if !app.handle_event(&event).await {
                    break;
                }
            }
        }
    }

    sink.stop();
    let stats = session.stats();
    info!(
        "Session {} finished: {} frames sent, {} tool calls",
        stats.session_id, stats.frames_sent, stats.tool_calls
    );
    Ok(())
}

async fn daemon(cfg: Config) -> Result<()> {
    let app = build_app(&cfg);
    let shutdown = CancellationToken::new();

    let (supervisor_tx, mut supervisor_rx) = mpsc::unbounded_channel();
    let activity: Arc<dyn ConversationActivity> = Arc::clone(app.sessions()) as Arc<dyn ConversationActivity>;
    let supervisor = AutoplaySupervisor::new(
        app.player().clone(),
        FavoritesStore::new(&cfg.favorites.path),
        activity,
        supervisor_tx,
        Duration::from_millis(cfg.player.poll_interval_ms),
    );
    tokio::spawn(supervisor.run(shutdown.clone()));

    tokio::spawn(async move {
        while let Some(event) = supervisor_rx.recv().await {
            match event {
                SupervisorEvent::FavoriteState { path, is_favorite } => info!(
                    "Now playing {} ({})",
                    path.as_deref().unwrap_or("nothing"),
                    if is_favorite { "favorite" } else { "not favorite" }
                ),
                SupervisorEvent::Autoplay { url } => info!("Autoplay: {}", url),
            }
        }
    });

    let listener = CommandListener::bind(&cfg.listener, app.player().clone()).await?;
    let listener_cancel = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = listener.run(listener_cancel).await {
            warn!("Command listener failed: {:#}", e);
        }
    });

    info!("Press Enter to start or end a conversation, Ctrl-C to quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut conversation: Option<CancellationToken> = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                if line?.is_none() {
                    break;
                }
                match conversation.take() {
                    Some(cancel) if app.sessions().is_live() => cancel.cancel(),
                    _ => {
                        let cancel = CancellationToken::new();
                        conversation = Some(cancel.clone());
                        let app = Arc::clone(&app);
                        let cfg = cfg.clone();
                        tokio::spawn(async move {
                            if let Err(e) = converse(app, &cfg, None, cancel).await {
                                warn!("Conversation failed: {:#}", e);
                            }
                        });
                    }
                }
            }
        }
    }

    info!("Shutting down");
    if let Some(cancel) = conversation {
        cancel.cancel();
    }
    app.sessions().stop();
    shutdown.cancel();
    app.sessions().wait_retired().await;
    Ok(())
}

async fn chat(cfg: Config, text: &str) -> Result<()> {
    let Some(api_key) = cfg.live.api_key.clone() else {
        bail!("No API key: set GEMINI_API_KEY or live.api_key");
    };

    let model = GeminiTextClient::new(&cfg.chat, api_key)?;
    let assistant = ChatAssistant::new(Arc::new(model), cfg.chat.scenery.clone());
    let reply = assistant.ask(text).await?;

    println!("{}", reply.message);

    if let Some(url) = reply.video_url {
        println!("Switching scenery to {}", url);
        let control = PlayerControl::new(cfg.player);
        if !control.load(&url).await {
            bail!("Player did not accept {}", url);
        }
    }
    Ok(())
}

async fn send(cfg: Config, raw: &str) -> Result<()> {
    let args: Vec<serde_json::Value> =
        serde_json::from_str(raw).context("Command must be a JSON array")?;
    let cmd = PlayerCommand::from_args(args)?;
    let control = PlayerControl::new(cfg.player);

    let sent = match (cmd.verb(), cmd.command.get(1).and_then(|v| v.as_str())) {
        (Some("loadfile"), Some(url)) => control.load(url).await,
        (Some("get_property"), Some(name)) => {
            match control.get_property(name).await.value() {
                Some(value) => println!("{}", value),
                None => println!("unknown"),
            }
            true
        }
        _ => control.send_command(&cmd).await,
    };

    if !sent {
        bail!("Player did not accept the command");
    }
    Ok(())
}

fn favorites(cfg: Config, action: FavoritesAction) -> Result<()> {
    let store = FavoritesStore::new(&cfg.favorites.path);

    match action {
        FavoritesAction::List => {
            for favorite in store.list()? {
                match favorite.title {
                    Some(title) => println!("{}  ({})", favorite.url, title),
                    None => println!("{}", favorite.url),
                }
            }
        }
        FavoritesAction::Check { url } => {
            if store.contains(&url)? {
                println!("is favorite");
            } else {
                println!("not favorite");
            }
        }
        FavoritesAction::Add { title, url } => {
            if store.add(&title, &url)? {
                println!("added");
            } else {
                println!("already a favorite");
            }
        }
    }

    Ok(())
}
