use anyhow::{bail, Context, Result};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::messages::{ClientMessage, ServerMessage, Setup};
use crate::config::LiveConfig;

/// How long to wait for `setupComplete` after sending the setup message.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound half of a duplex connection
#[async_trait::async_trait]
pub trait LiveSender: Send {
    async fn send(&mut self, msg: &ClientMessage) -> Result<()>;

    /// Close the connection. Closing twice is not an error.
    async fn close(&mut self) -> Result<()>;
}

/// Inbound half of a duplex connection
#[async_trait::async_trait]
pub trait LiveReceiver: Send {
    /// Next message, `None` once the remote side closed the stream.
    async fn recv(&mut self) -> Result<Option<ServerMessage>>;
}

/// An established connection, split so sender and receiver can run concurrently
pub struct LiveConnection {
    pub sender: Box<dyn LiveSender>,
    pub receiver: Box<dyn LiveReceiver>,
}

/// Opens duplex connections and performs the setup handshake
#[async_trait::async_trait]
pub trait LiveConnector: Send + Sync {
    async fn connect(&self, setup: Setup) -> Result<LiveConnection>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Websocket transport to the remote live endpoint
pub struct WebSocketConnector {
    config: LiveConfig,
}

impl WebSocketConnector {
    pub fn new(config: LiveConfig) -> Self {
        Self { config }
    }

    fn url(&self) -> Result<String> {
        let Some(key) = self.config.api_key.as_deref() else {
            bail!("No API key configured for the live endpoint");
        };
        if !key.is_ascii() {
            bail!("API key must be ASCII");
        }
        Ok(format!("{}?key={}", self.config.endpoint, key))
    }
}

#[async_trait::async_trait]
impl LiveConnector for WebSocketConnector {
    async fn connect(&self, setup: Setup) -> Result<LiveConnection> {
        info!("Connecting to live endpoint {}", self.config.endpoint);

        let (ws, _response) = tokio_tungstenite::connect_async(self.url()?)
            .await
            .context("Failed to open websocket")?;
        let (sink, stream) = ws.split();

        let mut sender = WsSender { sink, closed: false };
        let mut receiver = WsReceiver { stream };

        sender
            .send(&ClientMessage::Setup(setup))
            .await
            .context("Failed to send setup")?;

        tokio::time::timeout(HANDSHAKE_TIMEOUT, await_setup_complete(&mut receiver))
            .await
            .context("Timed out waiting for setup to complete")??;

        info!("Live endpoint setup complete");

        Ok(LiveConnection {
            sender: Box::new(sender),
            receiver: Box::new(receiver),
        })
    }
}

async fn await_setup_complete(receiver: &mut WsReceiver) -> Result<()> {
    loop {
        match receiver.recv().await? {
            Some(msg) if msg.is_setup_complete() => return Ok(()),
            Some(_) => continue,
            None => bail!("Connection closed during setup"),
        }
    }
}

struct WsSender {
    sink: SplitSink<WsStream, Message>,
    closed: bool,
}

#[async_trait::async_trait]
impl LiveSender for WsSender {
    async fn send(&mut self, msg: &ClientMessage) -> Result<()> {
        let json = serde_json::to_string(msg)?;
        self.sink
            .send(Message::Text(json))
            .await
            .context("Websocket send failed")
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.sink.close().await.context("Websocket close failed")
    }
}

struct WsReceiver {
    stream: SplitStream<WsStream>,
}

impl WsReceiver {
    fn parse(payload: &[u8]) -> Option<ServerMessage> {
        match serde_json::from_slice::<ServerMessage>(payload) {
            Ok(msg) => Some(msg),
            Err(e) => {
                warn!("Ignoring malformed server message: {}", e);
                None
            }
        }
    }
}

#[async_trait::async_trait]
impl LiveReceiver for WsReceiver {
    async fn recv(&mut self) -> Result<Option<ServerMessage>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    if let Some(msg) = Self::parse(text.as_bytes()) {
                        return Ok(Some(msg));
                    }
                }
                Some(Ok(Message::Binary(bin))) => {
                    if let Some(msg) = Self::parse(&bin) {
                        return Ok(Some(msg));
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("Websocket closed by peer: {:?}", frame);
                    return Ok(None);
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e).context("Websocket receive failed"),
                None => return Ok(None),
            }
        }
    }
}
