//! Everrest websocket message bus client.
//!
//! Channel (un)subscriptions are POST frames tagged with the
//! `x-everrest-websocket-message-type` header; published messages arrive with
//! the channel name in `x-everrest-websocket-channel` and a string body.

use std::collections::HashMap;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use wsboot_core::{Bus, ChannelHandler, LinkError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type HandlerMap = Arc<RwLock<HashMap<String, ChannelHandler>>>;

pub const MESSAGE_TYPE_HEADER: &str = "x-everrest-websocket-message-type";
pub const CHANNEL_HEADER: &str = "x-everrest-websocket-channel";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Serialize)]
struct OutgoingFrame {
    uuid: String,
    method: &'static str,
    headers: Vec<FrameHeader>,
    body: String,
}

#[derive(Debug, Deserialize)]
struct IncomingFrame {
    #[serde(default)]
    headers: Vec<FrameHeader>,
    #[serde(default)]
    body: Option<String>,
}

fn channel_frame(message_type: &str, channel: &str) -> String {
    let frame = OutgoingFrame {
        uuid: uuid::Uuid::new_v4().to_string(),
        method: "POST",
        headers: vec![FrameHeader {
            name: MESSAGE_TYPE_HEADER.into(),
            value: message_type.into(),
        }],
        body: serde_json::json!({ "channel": channel }).to_string(),
    };
    serde_json::to_string(&frame).unwrap_or_default()
}

pub fn subscribe_frame(channel: &str) -> String {
    channel_frame("subscribe-channel", channel)
}

pub fn unsubscribe_frame(channel: &str) -> String {
    channel_frame("unsubscribe-channel", channel)
}

/// Split an incoming frame into its channel and body. Frames without a
/// channel header (acknowledgments, pings) yield `None`.
pub fn parse_frame(text: &str) -> Option<(String, String)> {
    let frame: IncomingFrame = serde_json::from_str(text).ok()?;
    let channel = frame
        .headers
        .into_iter()
        .find(|h| h.name.eq_ignore_ascii_case(CHANNEL_HEADER))?
        .value;
    Some((channel, frame.body.unwrap_or_default()))
}

/// Connected message bus. Dropping it closes the socket.
pub struct MessageBusClient {
    handlers: HandlerMap,
    frame_tx: mpsc::UnboundedSender<String>,
    handler: JoinHandle<()>,
}

impl MessageBusClient {
    pub async fn connect(url: &str) -> Result<Self, LinkError> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| LinkError::Refused(format!("{url}: {e}")))?;
        tracing::info!(%url, "message bus connected");
        Ok(Self::from_stream(ws))
    }

    fn from_stream(ws: WsStream) -> Self {
        let handlers: HandlerMap = Arc::new(RwLock::new(HashMap::new()));
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let handler = tokio::spawn(bus_handler_loop(ws, frame_rx, Arc::clone(&handlers)));
        Self {
            handlers,
            frame_tx,
            handler,
        }
    }

    pub fn channels(&self) -> Vec<String> {
        self.handlers.read().keys().cloned().collect()
    }

    pub fn is_connected(&self) -> bool {
        !self.handler.is_finished()
    }

    fn send(&self, frame: String) {
        if self.frame_tx.send(frame).is_err() {
            tracing::warn!("message bus closed, dropping frame");
        }
    }
}

impl Bus for MessageBusClient {
    fn subscribe(&self, channel: &str, handler: ChannelHandler) {
        self.handlers.write().insert(channel.to_owned(), handler);
        tracing::debug!(%channel, "subscribing");
        self.send(subscribe_frame(channel));
    }

    fn unsubscribe(&self, channel: &str) {
        if self.handlers.write().remove(channel).is_some() {
            tracing::debug!(%channel, "unsubscribing");
            self.send(unsubscribe_frame(channel));
        }
    }
}

impl Drop for MessageBusClient {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

async fn bus_handler_loop(
    ws: WsStream,
    mut frame_rx: mpsc::UnboundedReceiver<String>,
    handlers: HandlerMap,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            frame = frame_rx.recv() => {
                let Some(frame) = frame else {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                };
                if let Err(e) = ws_tx.send(Message::Text(frame.into())).await {
                    tracing::warn!(error = %e, "message bus send failed");
                    break;
                }
            }
            msg = ws_rx.next() => {
                let Some(Ok(msg)) = msg else { break };
                let text = match msg {
                    Message::Text(text) => text.as_str().to_owned(),
                    Message::Close(_) => break,
                    _ => continue,
                };
                let Some((channel, body)) = parse_frame(&text) else {
                    continue;
                };
                let handler = handlers.read().get(&channel).cloned();
                match handler {
                    Some(handler) => handler(body),
                    None => tracing::trace!(%channel, "frame for unsubscribed channel"),
                }
            }
        }
    }
    tracing::info!("message bus disconnected");
}
