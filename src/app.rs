//! Orchestration: turns session commands into player actions.

use anyhow::{bail, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::audio::AudioFormat;
use crate::config::Config;
use crate::player::PlayerControl;
use crate::search::VideoSearch;
use crate::session::{LiveSession, SessionConfig, SessionEvent, SessionIo, SessionManager, ToolCommand};

pub struct App {
    config: Config,
    player: PlayerControl,
    search: Arc<dyn VideoSearch>,
    sessions: Arc<SessionManager>,
}

impl App {
    pub fn new(
        config: Config,
        player: PlayerControl,
        search: Arc<dyn VideoSearch>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        Self {
            config,
            player,
            search,
            sessions,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn player(&self) -> &PlayerControl {
        &self.player
    }

    /// Start a conversation, carrying the player's current volume into it.
    pub async fn start_talk(&self, io: SessionIo) -> Arc<LiveSession> {
        let initial_volume = self.player.volume().await;
        info!("Starting talk (background volume {})", initial_volume);
        self.sessions.start(self.session_config(initial_volume), io)
    }

    /// Session settings derived from the loaded config.
    ///
    /// Capture is resampled to `audio.input_sample_rate`, so the transmitted
    /// format follows it.
    pub fn session_config(&self, initial_volume: u8) -> SessionConfig {
        SessionConfig {
            live: self.config.live.clone(),
            initial_volume,
            frame_bytes: self.config.audio.frame_bytes,
            capture_format: AudioFormat {
                sample_rate: self.config.audio.input_sample_rate,
                channels: 1,
                bits_per_sample: 16,
            },
            ..SessionConfig::default()
        }
    }

    /// Route one event. Returns `false` once the conversation is over: the
    /// session finished, or failed and was stopped.
    pub async fn handle_event(&self, event: &SessionEvent) -> bool {
        match event {
            SessionEvent::Command(cmd) => {
                if let Err(e) = self.handle_command(cmd).await {
                    warn!("{}", e);
                }
                true
            }
            SessionEvent::Error(message) => {
                warn!("Session error, ending conversation: {}", message);
                self.sessions.stop();
                false
            }
            SessionEvent::Finished => false,
            _ => true,
        }
    }

    pub async fn handle_command(&self, cmd: &ToolCommand) -> Result<()> {
        info!("Command: {}", cmd);
        match cmd {
            ToolCommand::ChangeScene(keyword) => {
                let query = format!("{}{}", keyword, self.config.player.scene_suffix);
                self.search_and_load(&query).await
            }
            ToolCommand::DirectSearch(keyword) => self.search_and_load(keyword).await,
            ToolCommand::SetVolume(volume) => {
                if !self.player.set_volume(*volume).await {
                    bail!("Could not set volume to {}", volume);
                }
                Ok(())
            }
            ToolCommand::QuitTalk => {
                self.sessions.stop();
                Ok(())
            }
        }
    }

    async fn search_and_load(&self, query: &str) -> Result<()> {
        let Some(url) = self.search.search(query).await else {
            bail!("No video found for {:?}", query);
        };
        if !self.player.load(&url).await {
            bail!("Player did not accept {}", url);
        }
        Ok(())
    }
}
