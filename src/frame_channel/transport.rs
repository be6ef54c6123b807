//! Feed transports
//!
//! The channel only needs "connect" and "next message"; the WebSocket
//! transport is the production implementation.

use super::codec::RawMessage;
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Opens connections to a feed endpoint
#[async_trait]
pub trait FeedTransport: Send + Sync {
    /// Connect and complete the handshake
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn FeedConnection>>;
}

/// One established feed connection
#[async_trait]
pub trait FeedConnection: Send {
    /// Next data message. `None` when the peer closed the connection.
    async fn next_message(&mut self) -> Option<Result<RawMessage>>;
}

/// WebSocket transport
#[derive(Debug, Clone, Default)]
pub struct WsTransport;

impl WsTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FeedTransport for WsTransport {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn FeedConnection>> {
        let (stream, response) = tokio_tungstenite::connect_async(endpoint)
            .await
            .map_err(|e| Error::TransientConnection(format!("{}: {}", endpoint, e)))?;
        tracing::debug!(
            endpoint = %endpoint,
            status = %response.status(),
            "WebSocket handshake complete"
        );
        Ok(Box::new(WsConnection { stream }))
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FeedConnection for WsConnection {
    async fn next_message(&mut self) -> Option<Result<RawMessage>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(RawMessage::Text(text))),
                Ok(Message::Binary(bytes)) => return Some(Ok(RawMessage::Binary(bytes))),
                Ok(Message::Close(frame)) => {
                    tracing::debug!(close_frame = ?frame, "Feed closed by peer");
                    return None;
                }
                // tungstenite answers pings itself
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
                Err(e) => return Some(Err(Error::from(e))),
            }
        }
    }
}
