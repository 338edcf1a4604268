// Integration tests for player control, autoplay and the command listener
//
// A fake player listens on a Unix socket in a temp dir, records every
// command line it receives and answers `get_property` from a table the test
// controls.

#![cfg(unix)]

use anyhow::Result;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use scenic_window::config::{Config, ListenerConfig, LiveConfig, PlayerConfig};
use scenic_window::live::{LiveConnector, ToolCall};
use scenic_window::player::{
    AutoplaySupervisor, CommandListener, FavoritesStore, PlayerCommand, PlayerControl,
    SupervisorEvent,
};
use scenic_window::search::VideoSearch;
use scenic_window::session::{SessionEvent, SessionIo, SessionManager, ToolCommand, ToolDispatcher};
use scenic_window::{App, WebSocketConnector};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

struct FakePlayer {
    dir: TempDir,
    socket: PathBuf,
    commands: Arc<Mutex<Vec<Vec<Value>>>>,
    properties: Arc<Mutex<HashMap<String, Value>>>,
}

impl FakePlayer {
    fn spawn() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let socket = dir.path().join("mpv.sock");
        let listener = UnixListener::bind(&socket)?;

        let commands = Arc::new(Mutex::new(Vec::new()));
        let properties = Arc::new(Mutex::new(HashMap::new()));

        let server_commands = Arc::clone(&commands);
        let server_properties = Arc::clone(&properties);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(
                    stream,
                    Arc::clone(&server_commands),
                    Arc::clone(&server_properties),
                ));
            }
        });

        Ok(Self {
            dir,
            socket,
            commands,
            properties,
        })
    }

    fn config(&self) -> PlayerConfig {
        PlayerConfig {
            socket_path: self.socket.display().to_string(),
            query_timeout_ms: 500,
            ready_retries: 3,
            ready_interval_ms: 20,
            ..PlayerConfig::default()
        }
    }

    fn control(&self) -> PlayerControl {
        PlayerControl::new(self.config())
    }

    fn set(&self, name: &str, value: Value) {
        self.properties.lock().unwrap().insert(name.to_string(), value);
    }

    /// Recorded commands with the given verb, excluding property queries
    fn sent(&self, verb: &str) -> Vec<Vec<Value>> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.first().and_then(Value::as_str) == Some(verb))
            .cloned()
            .collect()
    }

    async fn wait_for(&self, verb: &str, count: usize) -> Vec<Vec<Value>> {
        for _ in 0..100 {
            let sent = self.sent(verb);
            if sent.len() >= count {
                return sent;
            }
            sleep(Duration::from_millis(10)).await;
        }
        self.sent(verb)
    }
}

async fn serve(
    stream: UnixStream,
    commands: Arc<Mutex<Vec<Vec<Value>>>>,
    properties: Arc<Mutex<HashMap<String, Value>>>,
) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(cmd) = serde_json::from_str::<PlayerCommand>(&line) else {
            continue;
        };
        commands.lock().unwrap().push(cmd.command.clone());

        if cmd.verb() == Some("get_property") {
            let name = cmd.command.get(1).and_then(Value::as_str).unwrap_or_default();
            let value = properties.lock().unwrap().get(name).cloned();
            let reply = match value {
                Some(data) => json!({ "data": data, "error": "success" }),
                None => json!({ "error": "property unavailable" }),
            };
            // An unrelated event first, like the real player sends
            let _ = writer.write_all(b"{\"event\":\"playback-restart\"}\n").await;
            let _ = writer.write_all(format!("{}\n", reply).as_bytes()).await;
        }
    }
}

fn write_favorites(dir: &TempDir, urls: &[&str]) -> Result<FavoritesStore> {
    let path = dir.path().join("favorites.txt");
    let mut text = String::from("# scenery favorites\n\n");
    for (i, url) in urls.iter().enumerate() {
        text.push_str(&format!("#Scene {}\n{}\n\n", i + 1, url));
    }
    std::fs::write(&path, text)?;
    Ok(FavoritesStore::new(path))
}

const URLS: [&str; 3] = [
    "https://www.youtube.com/watch?v=kyoto",
    "https://www.youtube.com/watch?v=alps",
    "https://www.youtube.com/watch?v=reef",
];

// ----------------------------------------------------------------------------
// PlayerControl
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_get_property_returns_data() -> Result<()> {
    let player = FakePlayer::spawn()?;
    player.set("volume", json!(42.0));
    let control = player.control();

    assert_eq!(control.get_property("volume").await.f64_or(0.0), 42.0);
    assert_eq!(control.volume().await, 42);
    assert!(control.get_property("nonexistent").await.is_unknown());
    Ok(())
}

#[tokio::test]
async fn test_missing_socket_is_unknown_not_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let control = PlayerControl::new(PlayerConfig {
        socket_path: dir.path().join("nobody-home").display().to_string(),
        ready_retries: 2,
        ready_interval_ms: 10,
        fallback_volume: 50,
        ..PlayerConfig::default()
    });

    assert!(control.get_property("idle-active").await.is_unknown());
    assert!(!control.send_command(&PlayerCommand::stop()).await);
    assert!(!control.load("https://example.com").await);
    assert_eq!(control.volume().await, 50);
    Ok(())
}

#[tokio::test]
async fn test_send_command_wire_format() -> Result<()> {
    let player = FakePlayer::spawn()?;
    let control = player.control();

    assert!(control.set_volume(40).await);
    assert!(control.stop().await);

    let sent = player.wait_for("set_property", 1).await;
    assert_eq!(sent, vec![vec![json!("set_property"), json!("volume"), json!(40)]]);
    assert_eq!(player.wait_for("stop", 1).await.len(), 1);
    Ok(())
}

// ----------------------------------------------------------------------------
// Tool calls through the app
// ----------------------------------------------------------------------------

struct FixedSearch(&'static str);

#[async_trait]
impl VideoSearch for FixedSearch {
    async fn search(&self, _query: &str) -> Option<String> {
        Some(self.0.to_string())
    }
}

fn test_app(player: &FakePlayer) -> App {
    app_with_config(player, Config::default())
}

fn app_with_config(player: &FakePlayer, mut config: Config) -> App {
    let connector: Arc<dyn LiveConnector> =
        Arc::new(WebSocketConnector::new(LiveConfig::default()));
    config.player = player.config();

    App::new(
        config,
        player.control(),
        Arc::new(FixedSearch("https://www.youtube.com/watch?v=found")),
        Arc::new(SessionManager::new(connector)),
    )
}

#[tokio::test]
async fn test_volume_150_becomes_set_property_100() -> Result<()> {
    let player = FakePlayer::spawn()?;
    let app = test_app(&player);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let dispatcher = ToolDispatcher::new(Arc::new(AtomicU8::new(50)), tx);
    let call: ToolCall = serde_json::from_value(json!({
        "id": "v1", "name": "set_volume", "args": { "volume": 150 }
    }))?;

    let (response, quit) = dispatcher.dispatch(&call);
    assert!(response.is_success());
    assert!(!quit);
    assert_eq!(dispatcher.current_volume(), 100);

    let event = rx.recv().await.expect("command event");
    assert_eq!(event, SessionEvent::Command(ToolCommand::SetVolume(100)));
    assert!(app.handle_event(&event).await);

    let sent = player.wait_for("set_property", 1).await;
    assert_eq!(sent, vec![vec![json!("set_property"), json!("volume"), json!(100)]]);
    Ok(())
}

#[tokio::test]
async fn test_change_scene_loads_search_result() -> Result<()> {
    let player = FakePlayer::spawn()?;
    let app = test_app(&player);

    app.handle_command(&ToolCommand::ChangeScene("Kyoto rain".into()))
        .await?;

    let loads = player.wait_for("loadfile", 1).await;
    assert_eq!(
        loads,
        vec![vec![
            json!("loadfile"),
            json!("https://www.youtube.com/watch?v=found"),
            json!("replace")
        ]]
    );
    Ok(())
}

#[tokio::test]
async fn test_session_capture_follows_input_rate() -> Result<()> {
    let player = FakePlayer::spawn()?;
    let mut config = Config::default();
    config.audio.input_sample_rate = 48_000;
    config.audio.frame_bytes = 8192;
    let app = app_with_config(&player, config);

    let session = app.session_config(35);
    assert_eq!(session.capture_format.sample_rate, 48_000);
    assert_eq!(session.capture_format.channels, 1);
    assert_eq!(session.capture_format.bits_per_sample, 16);
    assert_eq!(session.capture_format.mime_type(), "audio/pcm;rate=48000");
    assert_eq!(session.frame_bytes, 8192);
    assert_eq!(session.initial_volume, 35);
    Ok(())
}

#[tokio::test]
async fn test_session_error_ends_conversation() -> Result<()> {
    let player = FakePlayer::spawn()?;
    let app = test_app(&player);

    let (tx, _events) = mpsc::unbounded_channel();
    let session = app.sessions().start(
        app.session_config(50),
        SessionIo {
            capture: None,
            sink: None,
            events: tx,
        },
    );

    let keep_going = app
        .handle_event(&SessionEvent::Error("Audio send failed: socket reset".into()))
        .await;
    assert!(!keep_going);
    assert!(!session.is_live());
    assert!(!app.sessions().is_live());

    app.sessions().wait_retired().await;
    Ok(())
}

// ----------------------------------------------------------------------------
// Autoplay supervisor
// ----------------------------------------------------------------------------

fn supervisor(
    player: &FakePlayer,
    favorites: FavoritesStore,
    in_conversation: Arc<AtomicBool>,
) -> (AutoplaySupervisor, mpsc::UnboundedReceiver<SupervisorEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let supervisor = AutoplaySupervisor::new(
        player.control(),
        favorites,
        in_conversation,
        tx,
        Duration::from_millis(50),
    )
    .with_rng(StdRng::seed_from_u64(7));
    (supervisor, rx)
}

#[tokio::test]
async fn test_idle_player_autoplays_one_favorite() -> Result<()> {
    let player = FakePlayer::spawn()?;
    let favorites = write_favorites(&player.dir, &URLS)?;
    player.set("idle-active", json!(true));

    let (mut supervisor, mut events) =
        supervisor(&player, favorites, Arc::new(AtomicBool::new(false)));

    supervisor.tick().await;
    supervisor.tick().await;
    supervisor.tick().await;
    assert!(supervisor.is_autoplaying());

    let loads = player.wait_for("loadfile", 1).await;
    sleep(Duration::from_millis(50)).await;
    let loads_after = player.sent("loadfile");
    assert_eq!(loads.len(), 1);
    assert_eq!(loads_after.len(), 1, "sustained idle must not re-trigger");

    let url = loads[0][1].as_str().unwrap_or_default().to_string();
    assert!(URLS.contains(&url.as_str()), "{} is not a favorite", url);

    assert_eq!(
        events.recv().await,
        Some(SupervisorEvent::FavoriteState {
            path: None,
            is_favorite: false
        })
    );
    assert_eq!(events.recv().await, Some(SupervisorEvent::Autoplay { url }));

    // Busy then idle again re-arms the latch
    player.set("idle-active", json!(false));
    supervisor.tick().await;
    assert!(!supervisor.is_autoplaying());
    player.set("idle-active", json!(true));
    supervisor.tick().await;
    assert_eq!(player.wait_for("loadfile", 2).await.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_no_autoplay_during_conversation() -> Result<()> {
    let player = FakePlayer::spawn()?;
    let favorites = write_favorites(&player.dir, &URLS)?;
    player.set("idle-active", json!(true));

    let talking = Arc::new(AtomicBool::new(true));
    let (mut supervisor, _events) = supervisor(&player, favorites, Arc::clone(&talking));

    supervisor.tick().await;
    supervisor.tick().await;
    sleep(Duration::from_millis(50)).await;
    assert!(player.sent("loadfile").is_empty());

    talking.store(false, Ordering::SeqCst);
    supervisor.tick().await;
    assert_eq!(player.wait_for("loadfile", 1).await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_favorite_state_published_on_path_change() -> Result<()> {
    let player = FakePlayer::spawn()?;
    let favorites = write_favorites(&player.dir, &URLS)?;
    player.set("idle-active", json!(false));
    player.set("path", json!(URLS[1]));

    let (mut supervisor, mut events) =
        supervisor(&player, favorites, Arc::new(AtomicBool::new(false)));

    supervisor.tick().await;
    supervisor.tick().await;
    player.set("path", json!("https://www.youtube.com/watch?v=other"));
    supervisor.tick().await;

    assert_eq!(
        events.recv().await,
        Some(SupervisorEvent::FavoriteState {
            path: Some(URLS[1].to_string()),
            is_favorite: true
        })
    );
    assert_eq!(
        events.recv().await,
        Some(SupervisorEvent::FavoriteState {
            path: Some("https://www.youtube.com/watch?v=other".to_string()),
            is_favorite: false
        })
    );
    assert!(events.try_recv().is_err());
    Ok(())
}

// ----------------------------------------------------------------------------
// Command listener
// ----------------------------------------------------------------------------

async fn request(stream: &mut BufReader<TcpStream>, line: &str) -> Result<Value> {
    stream.get_mut().write_all(line.as_bytes()).await?;
    stream.get_mut().write_all(b"\n").await?;
    let mut reply = String::new();
    timeout(Duration::from_secs(2), stream.read_line(&mut reply)).await??;
    Ok(serde_json::from_str(&reply)?)
}

#[tokio::test]
async fn test_listener_routes_commands() -> Result<()> {
    let player = FakePlayer::spawn()?;
    let listener = CommandListener::bind(
        &ListenerConfig {
            bind: "127.0.0.1".to_string(),
            port: 0,
        },
        player.control(),
    )
    .await?;
    let addr = listener.local_addr()?;

    let cancel = tokio_util::sync::CancellationToken::new();
    let server = tokio::spawn(listener.run(cancel.clone()));

    let mut stream = BufReader::new(TcpStream::connect(addr).await?);

    let reply = request(&mut stream, r#"{"command":["loadfile","https://example.com/a"]}"#).await?;
    assert_eq!(reply, json!({ "status": "ok" }));

    let reply = request(&mut stream, r#"{"command":["set_property","pause",true]}"#).await?;
    assert_eq!(reply, json!({ "status": "ok" }));

    let reply = request(&mut stream, "not json").await?;
    assert_eq!(reply["status"], json!("error"));

    let loads = player.wait_for("loadfile", 1).await;
    assert_eq!(
        loads,
        vec![vec![json!("loadfile"), json!("https://example.com/a"), json!("replace")]]
    );
    let sets = player.wait_for("set_property", 1).await;
    assert_eq!(sets, vec![vec![json!("set_property"), json!("pause"), json!(true)]]);

    cancel.cancel();
    server.await??;
    Ok(())
}
