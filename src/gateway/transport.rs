//! Gateway socket collaborator
//!
//! The shard runner owns the protocol decisions; a transport only dials the
//! gateway and moves text frames and close codes. [`WsTransport`] is the
//! tokio-tungstenite implementation.

use crate::error::BoxError;
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};
use twilight_model::gateway::ShardId;

/// What a socket yields
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketMessage {
    Text(String),
    /// Close frame, with its code if one was sent
    Close(Option<u16>),
}

/// One live gateway connection
pub trait GatewaySocket: Send + 'static {
    fn send(&mut self, text: String) -> impl Future<Output = Result<(), BoxError>> + Send;

    /// `None` once the stream ended without a close frame
    fn next_message(
        &mut self,
    ) -> impl Future<Output = Option<Result<SocketMessage, BoxError>>> + Send;

    fn close(&mut self, code: u16) -> impl Future<Output = Result<(), BoxError>> + Send;
}

/// Dials gateway connections
pub trait GatewayTransport: Send + Sync + 'static {
    type Socket: GatewaySocket;

    fn connect(
        &self,
        shard: ShardId,
        url: &str,
    ) -> impl Future<Output = Result<Self::Socket, BoxError>> + Send;
}

/// tokio-tungstenite transport
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

impl GatewayTransport for WsTransport {
    type Socket = WsSocket;

    async fn connect(&self, shard: ShardId, url: &str) -> Result<WsSocket, BoxError> {
        debug!(shard_id = shard.number(), url, "Dialing gateway");
        let (stream, _response) = connect_async(url).await?;
        Ok(WsSocket { stream })
    }
}

pub struct WsSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl GatewaySocket for WsSocket {
    async fn send(&mut self, text: String) -> Result<(), BoxError> {
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn next_message(&mut self) -> Option<Result<SocketMessage, BoxError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(e.into())),
            };

            match message {
                Message::Text(text) => return Some(Ok(SocketMessage::Text(text))),
                Message::Binary(data) => match String::from_utf8(data) {
                    Ok(text) => return Some(Ok(SocketMessage::Text(text))),
                    Err(e) => return Some(Err(e.into())),
                },
                Message::Close(frame) => {
                    return Some(Ok(SocketMessage::Close(
                        frame.map(|frame| u16::from(frame.code)),
                    )))
                }
                // Pings are answered by tungstenite on the next read
                other => trace!(kind = ?other, "Skipping control frame"),
            }
        }
    }

    async fn close(&mut self, code: u16) -> Result<(), BoxError> {
        self.stream
            .close(Some(CloseFrame {
                code: CloseCode::from(code),
                reason: "".into(),
            }))
            .await?;
        Ok(())
    }
}
