use std::time::Duration;

use async_trait::async_trait;
use futures::SinkExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::error::Error as WsError;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use wsboot_core::{AgentConnection, AgentLink, LinkError};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens websocket connections to the in-workspace agent.
#[derive(Clone, Debug)]
pub struct WebSocketAgentLink {
    connect_timeout: Duration,
}

impl Default for WebSocketAgentLink {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl WebSocketAgentLink {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

fn link_error(e: WsError) -> LinkError {
    match e {
        WsError::Io(io) => LinkError::Refused(io.to_string()),
        other => LinkError::Protocol(other.to_string()),
    }
}

#[async_trait]
impl AgentLink for WebSocketAgentLink {
    async fn open(&self, url: &str) -> Result<Box<dyn AgentConnection>, LinkError> {
        let (ws, _) = tokio::time::timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| LinkError::Timeout(self.connect_timeout))?
            .map_err(link_error)?;
        Ok(Box::new(WebSocketAgentConnection {
            url: url.to_owned(),
            ws: Some(ws),
        }))
    }
}

pub struct WebSocketAgentConnection {
    url: String,
    ws: Option<WsStream>,
}

impl AgentConnection for WebSocketAgentConnection {
    fn url(&self) -> &str {
        &self.url
    }

    /// Send a close frame in the background. Idempotent.
    fn close(&mut self) {
        let Some(mut ws) = self.ws.take() else {
            return;
        };
        let url = self.url.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = ws.send(Message::Close(None)).await {
                        tracing::debug!(%url, error = %e, "agent close frame not sent");
                    }
                });
            }
            Err(_) => tracing::debug!(%url, "no runtime, dropping agent socket"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[tokio::test]
    async fn opens_and_closes_with_close_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            matches!(ws.next().await, Some(Ok(Message::Close(_))))
        });

        let url = format!("ws://{addr}/ws");
        let mut conn = WebSocketAgentLink::default().open(&url).await.unwrap();
        assert_eq!(conn.url(), url);
        conn.close();
        conn.close();

        let got_close = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert!(got_close);
    }

    #[tokio::test]
    async fn closed_port_is_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = WebSocketAgentLink::default()
            .open(&format!("ws://{addr}/ws"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, LinkError::Refused(_)));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let link = WebSocketAgentLink::new(Duration::from_millis(100));
        let err = link.open(&format!("ws://{addr}/ws")).await.err().unwrap();
        assert_eq!(err, LinkError::Timeout(Duration::from_millis(100)));
    }
}
