pub mod app;
pub mod audio;
pub mod chat;
pub mod config;
pub mod live;
pub mod player;
pub mod search;
pub mod session;

pub use app::App;
pub use audio::{
    AudioBackend, AudioBackendFactory, AudioFile, AudioFormat, AudioFrame, AudioSource,
    FrameBatcher, JitterPlaybackSink,
};
pub use chat::{ChatAssistant, ChatReply, GeminiTextClient, TextModel};
pub use config::Config;
pub use live::{LiveConnector, WebSocketConnector};
pub use player::{
    AutoplaySupervisor, CommandListener, FavoritesStore, PlayerCommand, PlayerControl,
};
pub use search::{VideoSearch, YtDlpSearch};
pub use session::{
    LiveSession, SessionConfig, SessionEvent, SessionIo, SessionManager, SessionStats, ToolCommand,
};
