use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::PlayerConfig;

/// One player command, serialized as `{"command": [verb, ...args]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerCommand {
    pub command: Vec<Value>,
}

impl PlayerCommand {
    pub fn new(verb: &str) -> Self {
        Self {
            command: vec![Value::from(verb)],
        }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.command.push(value.into());
        self
    }

    pub fn set_property(name: &str, value: impl Into<Value>) -> Self {
        Self::new("set_property").arg(name).arg(value)
    }

    pub fn get_property(name: &str) -> Self {
        Self::new("get_property").arg(name)
    }

    /// Replace whatever is playing with `url`
    pub fn loadfile(url: &str) -> Self {
        Self::new("loadfile").arg(url).arg("replace")
    }

    pub fn stop() -> Self {
        Self::new("stop")
    }

    /// Build from a raw JSON array such as `["set_property","volume",40]`
    pub fn from_args(args: Vec<Value>) -> Result<Self> {
        match args.first() {
            Some(Value::String(_)) => Ok(Self { command: args }),
            _ => bail!("Player command must start with a verb string"),
        }
    }

    pub fn verb(&self) -> Option<&str> {
        self.command.first().and_then(Value::as_str)
    }

    /// Newline-terminated wire form
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self).context("Failed to serialize player command")?;
        line.push('\n');
        Ok(line)
    }
}

/// Result of a property query. Unknown covers every failure mode, so
/// callers always pick a fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct Property(Option<Value>);

impl Property {
    pub fn unknown() -> Self {
        Self(None)
    }

    pub fn known(value: Value) -> Self {
        Self(Some(value))
    }

    pub fn is_unknown(&self) -> bool {
        self.0.is_none()
    }

    pub fn value(&self) -> Option<&Value> {
        self.0.as_ref()
    }

    pub fn bool_or(&self, default: bool) -> bool {
        self.0.as_ref().and_then(Value::as_bool).unwrap_or(default)
    }

    pub fn f64_or(&self, default: f64) -> f64 {
        self.0.as_ref().and_then(Value::as_f64).unwrap_or(default)
    }

    pub fn string(&self) -> Option<String> {
        self.0.as_ref().and_then(Value::as_str).map(str::to_string)
    }
}

trait ControlStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ControlStream for T {}

#[cfg(unix)]
async fn connect(path: &str) -> std::io::Result<Box<dyn ControlStream>> {
    let stream = tokio::net::UnixStream::connect(path).await?;
    Ok(Box::new(stream))
}

#[cfg(windows)]
async fn connect(path: &str) -> std::io::Result<Box<dyn ControlStream>> {
    let pipe = tokio::net::windows::named_pipe::ClientOptions::new().open(path)?;
    Ok(Box::new(pipe))
}

/// Client for the media player's local control socket.
///
/// Every operation opens its own short-lived connection, so clones can be
/// used from any task at once.
#[derive(Debug, Clone)]
pub struct PlayerControl {
    config: PlayerConfig,
}

impl PlayerControl {
    pub fn new(config: PlayerConfig) -> Self {
        Self { config }
    }

    pub fn socket_path(&self) -> &str {
        &self.config.socket_path
    }

    fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.config.query_timeout_ms)
    }

    fn ready_interval(&self) -> Duration {
        Duration::from_millis(self.config.ready_interval_ms)
    }

    /// Fire-and-forget. Failures are logged and reported as `false`.
    pub async fn send_command(&self, cmd: &PlayerCommand) -> bool {
        match self.try_send(cmd).await {
            Ok(()) => {
                debug!("Sent player command {:?}", cmd.command);
                true
            }
            Err(e) => {
                warn!("Player command {:?} failed: {:#}", cmd.command, e);
                false
            }
        }
    }

    async fn try_send(&self, cmd: &PlayerCommand) -> Result<()> {
        let line = cmd.to_line()?;
        let mut stream = timeout(self.query_timeout(), connect(&self.config.socket_path))
            .await
            .context("Timed out connecting to player")?
            .with_context(|| format!("Failed to connect to {}", self.config.socket_path))?;

        stream.write_all(line.as_bytes()).await?;
        stream.flush().await?;
        let _ = stream.shutdown().await;
        Ok(())
    }

    /// Query one property. Timeouts, refused connections, player errors and
    /// unparseable replies all come back as `Property::unknown()`.
    pub async fn get_property(&self, name: &str) -> Property {
        match timeout(self.query_timeout(), self.query(name)).await {
            Ok(Ok(Some(value))) => Property::known(value),
            Ok(Ok(None)) => Property::unknown(),
            Ok(Err(e)) => {
                debug!("get_property {} failed: {:#}", name, e);
                Property::unknown()
            }
            Err(_) => {
                debug!("get_property {} timed out", name);
                Property::unknown()
            }
        }
    }

    async fn query(&self, name: &str) -> Result<Option<Value>> {
        let line = PlayerCommand::get_property(name).to_line()?;
        let mut stream = connect(&self.config.socket_path).await?;
        stream.write_all(line.as_bytes()).await?;
        stream.flush().await?;

        let mut reader = BufReader::new(stream);
        let mut reply = String::new();
        loop {
            reply.clear();
            if reader.read_line(&mut reply).await? == 0 {
                bail!("Player closed the connection without replying");
            }

            let parsed: Value = serde_json::from_str(reply.trim())
                .with_context(|| format!("Unparseable player reply: {}", reply.trim()))?;

            // Asynchronous player events can arrive before the reply
            if parsed.get("event").is_some() {
                continue;
            }

            if let Some(status) = parsed.get("error").and_then(Value::as_str) {
                if status != "success" {
                    bail!("Player error: {}", status);
                }
            }

            return Ok(parsed.get("data").filter(|v| !v.is_null()).cloned());
        }
    }

    /// Poll for the control socket to appear.
    pub async fn wait_ready(&self) -> bool {
        for attempt in 0..self.config.ready_retries {
            if Path::new(&self.config.socket_path).exists() {
                return true;
            }
            debug!("Waiting for player socket (attempt {})", attempt + 1);
            sleep(self.ready_interval()).await;
        }

        warn!("Player socket {} never appeared", self.config.socket_path);
        false
    }

    /// Load a URL, replacing the current media. Tolerates the player
    /// refusing connections right after a `stop` by retrying.
    pub async fn load(&self, url: &str) -> bool {
        if !self.wait_ready().await {
            return false;
        }

        let cmd = PlayerCommand::loadfile(url);
        for attempt in 1..=self.config.ready_retries.max(1) {
            match self.try_send(&cmd).await {
                Ok(()) => {
                    info!("Loaded {}", url);
                    return true;
                }
                Err(e) => {
                    debug!("loadfile attempt {} rejected: {:#}", attempt, e);
                    sleep(self.ready_interval()).await;
                }
            }
        }

        warn!("Giving up loading {}", url);
        false
    }

    /// Set volume, clamped to 0-100
    pub async fn set_volume(&self, volume: u8) -> bool {
        self.send_command(&PlayerCommand::set_property("volume", volume.min(100)))
            .await
    }

    pub async fn stop(&self) -> bool {
        self.send_command(&PlayerCommand::stop()).await
    }

    /// Current volume, or the configured fallback when the player can't say.
    pub async fn volume(&self) -> u8 {
        let fallback = f64::from(self.config.fallback_volume);
        self.get_property("volume")
            .await
            .f64_or(fallback)
            .round()
            .clamp(0.0, 100.0) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_format() {
        let line = PlayerCommand::set_property("volume", 40).to_line().unwrap();
        assert_eq!(line, "{\"command\":[\"set_property\",\"volume\",40]}\n");

        let load = PlayerCommand::loadfile("https://example.com/v");
        assert_eq!(load.verb(), Some("loadfile"));
        assert_eq!(load.command[2], json!("replace"));
    }

    #[test]
    fn raw_args_need_a_verb() {
        assert!(PlayerCommand::from_args(vec![json!("stop")]).is_ok());
        assert!(PlayerCommand::from_args(vec![json!(1)]).is_err());
        assert!(PlayerCommand::from_args(vec![]).is_err());
    }

    #[test]
    fn property_fallbacks() {
        assert!(Property::unknown().bool_or(true));
        assert_eq!(Property::known(json!(35.0)).f64_or(50.0), 35.0);
        assert_eq!(Property::known(json!("x")).f64_or(50.0), 50.0);
        assert_eq!(Property::known(json!("/a.mp4")).string().as_deref(), Some("/a.mp4"));
    }
}
