use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::CoreError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outbound half of the exchange.
#[async_trait]
pub trait TransportSink: Send {
    async fn send(&mut self, text: String) -> Result<(), CoreError>;
    async fn close(&mut self) -> Result<(), CoreError>;
}

/// Inbound half. `None` means the remote closed the exchange.
#[async_trait]
pub trait TransportSource: Send {
    async fn next(&mut self) -> Option<Result<String, CoreError>>;
}

/// Establishes one bidirectional exchange. The client reconnects through
/// the same connector, so tests can hand it a loopback.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
    ) -> Result<(Box<dyn TransportSink>, Box<dyn TransportSource>), CoreError>;
}

/// WebSocket transport to the conversational endpoint. Authentication is
/// a bearer token in the URL query; regional endpoint selection happens
/// in configuration, not here.
pub struct WsConnector {
    url: String,
    token: Option<String>,
}

impl WsConnector {
    pub fn new(url: String, token: Option<String>) -> Self {
        Self { url, token }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(
        &self,
    ) -> Result<(Box<dyn TransportSink>, Box<dyn TransportSource>), CoreError> {
        let url = match &self.token {
            Some(token) => format!("{}?token={token}", self.url),
            None => self.url.clone(),
        };
        info!(url = %self.url, "connecting to voice endpoint");

        let (ws, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| match &e {
                WsError::Http(resp)
                    if resp.status().as_u16() == 401 || resp.status().as_u16() == 403 =>
                {
                    CoreError::AuthFailed(format!("endpoint returned {}", resp.status()))
                }
                _ => CoreError::ConnectionFailed(e.to_string()),
            })?;

        let (write, read) = ws.split();
        Ok((Box::new(WsSink { write }), Box::new(WsSource { read })))
    }
}

struct WsSink {
    write: SplitSink<WsStream, Message>,
}

#[async_trait]
impl TransportSink for WsSink {
    async fn send(&mut self, text: String) -> Result<(), CoreError> {
        self.write
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| CoreError::ConnectionFailed(format!("send: {e}")))
    }

    async fn close(&mut self) -> Result<(), CoreError> {
        self.write
            .send(Message::Close(None))
            .await
            .map_err(|e| CoreError::ConnectionFailed(format!("close: {e}")))
    }
}

struct WsSource {
    read: SplitStream<WsStream>,
}

#[async_trait]
impl TransportSource for WsSource {
    async fn next(&mut self) -> Option<Result<String, CoreError>> {
        loop {
            match self.read.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Close(_)) => {
                    debug!("endpoint closed the exchange");
                    return None;
                }
                // Ping/Pong handled by the stack; binary is not part of
                // this protocol.
                Ok(Message::Binary(_)) => {
                    warn!("ignoring binary frame from endpoint");
                }
                Ok(_) => {}
                Err(e) => return Some(Err(CoreError::ConnectionFailed(e.to_string()))),
            }
        }
    }
}
