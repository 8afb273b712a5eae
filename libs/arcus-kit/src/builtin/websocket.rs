//! WebSocket client connector.
//!
//! Talks JSON text frames to a message hub. Inbound frames are
//! `{"text", "user"?, "room"?, "service_type"?}`; replies go out as `{"text", "user", "room"?}`
//! with `user` set to the bot name.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::ModuleEntry;
use crate::connector::EventSink;
use crate::contracts::Connector;
use crate::events::{Event, OutboundMessage};
use crate::registry::BuildContext;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;
type WsSource = SplitStream<WsStream>;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct WebSocketConfig {
    /// Hub endpoint; derived from the transport settings when unset.
    pub url: Option<String>,
    pub bot_name: String,
    #[serde(with = "crate::humantime_serde")]
    pub reconnect_initial: Duration,
    #[serde(with = "crate::humantime_serde")]
    pub reconnect_max: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: None,
            bot_name: "arcus".to_owned(),
            reconnect_initial: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize)]
struct InboundFrame {
    text: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    room: Option<String>,
    #[serde(default)]
    service_type: Option<String>,
}

#[derive(Debug, Serialize)]
struct OutboundFrame<'a> {
    text: &'a str,
    user: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    room: Option<&'a str>,
}

fn parse_frame(raw: &str) -> anyhow::Result<Event> {
    let frame: InboundFrame = serde_json::from_str(raw)?;
    let mut event = Event::message(frame.text);
    if let Some(user) = frame.user {
        event = event.from_user(user);
    }
    if let Some(room) = frame.room {
        event = event.in_room(room);
    }
    if let Some(service_type) = frame.service_type.filter(|s| !s.is_empty()) {
        event = event.for_service(service_type);
    }
    Ok(event)
}

pub struct WebSocketConnector {
    url: Url,
    cfg: WebSocketConfig,
    writer: Arc<Mutex<Option<WsSink>>>,
    reader: Mutex<Option<WsSource>>,
}

impl std::fmt::Debug for WebSocketConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnector")
            .field("url", &self.url.as_str())
            .field("bot_name", &self.cfg.bot_name)
            .finish_non_exhaustive()
    }
}

/// # Errors
/// Fails on invalid settings or an unparseable hub URL.
pub fn build(entry: &ModuleEntry, ctx: &BuildContext<'_>) -> anyhow::Result<Arc<dyn Connector>> {
    let cfg: WebSocketConfig = entry.settings()?;
    let url = hub_url(&cfg, ctx)?;
    Ok(Arc::new(WebSocketConnector::new(url, cfg)))
}

fn hub_url(cfg: &WebSocketConfig, ctx: &BuildContext<'_>) -> anyhow::Result<Url> {
    let raw = match &cfg.url {
        Some(url) => url.clone(),
        None => format!(
            "ws://{}:{}/ws/{}",
            ctx.app.transport.host, ctx.app.transport.port, ctx.unit
        ),
    };
    let url = Url::parse(&raw)?;
    if !matches!(url.scheme(), "ws" | "wss") {
        anyhow::bail!("websocket hub URL must use ws:// or wss://, got '{raw}'");
    }
    Ok(url)
}

impl WebSocketConnector {
    #[must_use]
    pub fn new(url: Url, cfg: WebSocketConfig) -> Self {
        Self {
            url,
            cfg,
            writer: Arc::new(Mutex::new(None)),
            reader: Mutex::new(None),
        }
    }

    async fn open(&self) -> anyhow::Result<()> {
        let (stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| anyhow::anyhow!("websocket connection to {} failed: {e}", self.url))?;
        let (write, read) = stream.split();
        *self.writer.lock().await = Some(write);
        *self.reader.lock().await = Some(read);
        tracing::info!(url = %self.url, "Connected to websocket hub");
        Ok(())
    }

    /// Pump frames until the connection drops or `cancel` fires. Returns `true` when cancelled.
    async fn pump(&self, mut read: WsSource, sink: &EventSink, cancel: &CancellationToken) -> anyhow::Result<bool> {
        loop {
            let frame = tokio::select! {
                () = cancel.cancelled() => return Ok(true),
                frame = read.next() => frame,
            };
            match frame {
                Some(Ok(WsMessage::Text(text))) => match parse_frame(&text) {
                    Ok(event) => sink.emit(event).await?,
                    Err(e) => tracing::warn!(error = %e, "Ignoring malformed websocket frame"),
                },
                Some(Ok(WsMessage::Ping(data))) => {
                    if let Some(write) = self.writer.lock().await.as_mut() {
                        write.send(WsMessage::Pong(data)).await?;
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => return Ok(false),
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Websocket read failed");
                    return Ok(false);
                }
            }
        }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> anyhow::Result<()> {
        self.open().await
    }

    async fn listen(&self, sink: EventSink, cancel: CancellationToken) -> anyhow::Result<()> {
        let mut backoff = self.cfg.reconnect_initial;
        loop {
            let read = self.reader.lock().await.take();
            if let Some(read) = read {
                backoff = self.cfg.reconnect_initial;
                if self.pump(read, &sink, &cancel).await? {
                    return Ok(());
                }
                *self.writer.lock().await = None;
                tracing::warn!(url = %self.url, "Websocket hub connection lost");
            }

            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                () = tokio::time::sleep(backoff) => {}
            }
            if let Err(e) = self.open().await {
                tracing::warn!(error = %e, retry_in = ?backoff, "Websocket reconnect failed");
                backoff = (backoff * 2).min(self.cfg.reconnect_max);
            }
        }
    }

    async fn send(&self, message: &OutboundMessage) -> anyhow::Result<()> {
        let frame = serde_json::to_string(&OutboundFrame {
            text: &message.text,
            user: &self.cfg.bot_name,
            room: message.target.as_deref(),
        })?;
        let mut guard = self.writer.lock().await;
        let Some(write) = guard.as_mut() else {
            anyhow::bail!("websocket connector is not connected");
        };
        write.send(WsMessage::Text(frame)).await?;
        Ok(())
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        self.reader.lock().await.take();
        if let Some(mut write) = self.writer.lock().await.take() {
            write.close().await?;
        }
        Ok(())
    }
}
