use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub live: LiveConfig,
    pub audio: AudioConfig,
    pub playback: PlaybackConfig,
    pub player: PlayerConfig,
    pub listener: ListenerConfig,
    pub favorites: FavoritesConfig,
    pub chat: ChatConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "scenic-window".to_string(),
        }
    }
}

/// Remote duplex endpoint settings, handed to each session explicitly.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub endpoint: String,
    pub model: String,
    pub voice: String,
    pub api_key: Option<String>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string(),
            model: "models/gemini-2.5-flash-native-audio-preview-09-2025".to_string(),
            voice: "Zephyr".to_string(),
            api_key: None,
        }
    }
}

// Keep the key out of debug logs.
impl std::fmt::Debug for LiveConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveConfig")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("voice", &self.voice)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    /// Minimum transmit frame size in bytes (~128 ms at 16 kHz mono 16-bit)
    pub frame_bytes: usize,
    /// Name fragments that mark a conferencing/USB microphone as preferred
    pub preferred_input_keywords: Vec<String>,
    /// Explicit input device name, bypasses the heuristic
    pub input_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16000,
            output_sample_rate: 24000,
            frame_bytes: 4096,
            preferred_input_keywords: vec![
                "usb".to_string(),
                "conference".to_string(),
                "speakerphone".to_string(),
                "jabra".to_string(),
                "anker".to_string(),
                "poly".to_string(),
            ],
            input_device: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub tick_ms: u64,
    pub min_chunk_bytes: usize,
    pub max_queue_bytes: usize,
    pub trim_to_bytes: usize,
    /// A tail shorter than `min_chunk_bytes` is written once no audio arrived for this long
    pub tail_flush_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            tick_ms: 20,
            min_chunk_bytes: 4096,
            max_queue_bytes: 240_000,
            trim_to_bytes: 48_000,
            tail_flush_ms: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub socket_path: String,
    pub poll_interval_ms: u64,
    pub query_timeout_ms: u64,
    pub ready_retries: u32,
    pub ready_interval_ms: u64,
    /// Quality hint appended to scene keywords before searching
    pub scene_suffix: String,
    /// Volume assumed when the player cannot be queried
    pub fallback_volume: u8,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            socket_path: "/tmp/mpvsocket".to_string(),
            poll_interval_ms: 1000,
            query_timeout_ms: 500,
            ready_retries: 25,
            ready_interval_ms: 200,
            scene_suffix: " 4K".to_string(),
            fallback_volume: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 65432,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FavoritesConfig {
    pub path: String,
}

impl Default for FavoritesConfig {
    fn default() -> Self {
        Self {
            path: "favorites.txt".to_string(),
        }
    }
}

/// One-shot text assistant. Shares `live.api_key`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// REST base, `models/{model}:generateContent` is appended
    pub endpoint: String,
    pub model: String,
    pub request_timeout_ms: u64,
    /// Scenery the assistant may switch to
    pub scenery: Vec<SceneryEntry>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SceneryEntry {
    pub keyword: String,
    pub url: String,
}

impl SceneryEntry {
    fn new(keyword: &str, url: &str) -> Self {
        Self {
            keyword: keyword.to_string(),
            url: url.to_string(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.5-flash-lite-preview-09-2025".to_string(),
            request_timeout_ms: 30_000,
            scenery: vec![
                SceneryEntry::new("Kyoto rain", "https://www.youtube.com/watch?v=8ELexeiaAwc"),
                SceneryEntry::new("Swiss Alps snow", "https://www.youtube.com/watch?v=B9VRvOKKwfs"),
                SceneryEntry::new("Hawaii beach", "https://www.youtube.com/watch?v=4AtJV7U3DlU"),
                SceneryEntry::new("Forest stream", "https://www.youtube.com/watch?v=weOJaCMPvuw"),
                SceneryEntry::new("Finnish aurora", "https://www.youtube.com/watch?v=WL9EOfzoSsA"),
            ],
        }
    }
}

impl Config {
    /// Load from `path` (extension optional, missing file allowed) with
    /// `SCENIC__SECTION__KEY` environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("SCENIC").separator("__"))
            .build()?;

        let mut cfg: Config = settings.try_deserialize()?;

        if cfg.live.api_key.is_none() {
            cfg.live.api_key = std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty());
        }

        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_wire_constants() {
        let cfg = Config::default();
        assert_eq!(cfg.audio.input_sample_rate, 16000);
        assert_eq!(cfg.audio.frame_bytes, 4096);
        assert_eq!(cfg.playback.max_queue_bytes, 240_000);
        assert_eq!(cfg.playback.trim_to_bytes, 48_000);
        assert_eq!(cfg.player.ready_retries, 25);
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let live = LiveConfig {
            api_key: Some("secret-key".to_string()),
            ..LiveConfig::default()
        };
        let dbg = format!("{:?}", live);
        assert!(!dbg.contains("secret-key"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn load_reads_toml_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("scenic.toml");
        std::fs::write(
            &path,
            "[player]\nsocket_path = \"/tmp/test-mpv\"\n[listener]\nport = 7777\n",
        )?;

        let cfg = Config::load(path.to_str().unwrap())?;
        assert_eq!(cfg.player.socket_path, "/tmp/test-mpv");
        assert_eq!(cfg.listener.port, 7777);
        assert_eq!(cfg.player.poll_interval_ms, 1000);
        assert_eq!(cfg.chat.scenery.len(), 5);
        Ok(())
    }

    #[test]
    fn scenery_catalogue_can_be_replaced() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("scenic.toml");
        std::fs::write(
            &path,
            "[chat]\nmodel = \"text-model\"\n\n[[chat.scenery]]\nkeyword = \"Lofoten\"\nurl = \"https://example.com/lofoten\"\n",
        )?;

        let cfg = Config::load(path.to_str().unwrap())?;
        assert_eq!(cfg.chat.model, "text-model");
        assert_eq!(
            cfg.chat.scenery,
            vec![SceneryEntry::new("Lofoten", "https://example.com/lofoten")]
        );
        assert_eq!(cfg.chat.request_timeout_ms, 30_000);
        Ok(())
    }
}
