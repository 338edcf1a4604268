use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::control::{PlayerCommand, PlayerControl};
use crate::config::ListenerConfig;

#[derive(Debug, Serialize)]
struct Reply {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl Reply {
    fn ok() -> Self {
        Self {
            status: "ok",
            message: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error",
            message: Some(message.into()),
        }
    }
}

/// TCP service accepting newline-delimited `{"command": [...]}` requests
/// from other processes and forwarding them to the player.
pub struct CommandListener {
    listener: TcpListener,
    control: PlayerControl,
}

impl CommandListener {
    pub async fn bind(config: &ListenerConfig, control: PlayerControl) -> Result<Self> {
        let addr = format!("{}:{}", config.bind, config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind command listener on {}", addr))?;

        info!("Command listener on {}", listener.local_addr()?);
        Ok(Self { listener, control })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted.context("Accept failed")?;
                    debug!("Command connection from {}", peer);
                    let control = self.control.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, control).await {
                            warn!("Command connection from {} failed: {:#}", peer, e);
                        }
                    });
                }
            }
        }

        info!("Command listener stopped");
        Ok(())
    }
}

async fn handle_connection(stream: TcpStream, control: PlayerControl) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<PlayerCommand>(line) {
            Ok(cmd) if cmd.verb().is_some() => {
                if forward(&control, &cmd).await {
                    Reply::ok()
                } else {
                    Reply::error("player unavailable")
                }
            }
            Ok(_) => Reply::error("command must start with a verb"),
            Err(e) => Reply::error(format!("invalid command: {}", e)),
        };

        let mut out = serde_json::to_string(&reply)?;
        out.push('\n');
        writer.write_all(out.as_bytes()).await?;
    }

    Ok(())
}

/// `loadfile` goes through the readiness-retry path; everything else is
/// forwarded as-is.
async fn forward(control: &PlayerControl, cmd: &PlayerCommand) -> bool {
    if cmd.verb() == Some("loadfile") {
        match cmd.command.get(1).and_then(Value::as_str) {
            Some(url) => control.load(url).await,
            None => false,
        }
    } else {
        control.send_command(cmd).await
    }
}
