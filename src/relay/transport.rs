use super::protocol::{EngineMessage, OutboundFrame};
use super::RelayError;
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

/// Write half of an engine connection.
#[async_trait]
pub trait EngineSink: Send {
    async fn send(&mut self, frame: OutboundFrame) -> Result<(), RelayError>;
    async fn close(&mut self) -> Result<(), RelayError>;
}

/// Read half of an engine connection. `None` means the channel closed.
#[async_trait]
pub trait EngineStream: Send {
    async fn next_message(&mut self) -> Option<Result<EngineMessage, RelayError>>;
}

/// Factory for duplex channels to the recognition engine.
#[async_trait]
pub trait EngineTransport: Send + Sync {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Box<dyn EngineSink>, Box<dyn EngineStream>), RelayError>;
}

type WsSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Production transport: one WebSocket per session. Control frames are sent
/// as JSON text, audio chunks as binary frames.
pub struct WsTransport;

#[async_trait]
impl EngineTransport for WsTransport {
    async fn connect(
        &self,
        url: &str,
    ) -> Result<(Box<dyn EngineSink>, Box<dyn EngineStream>), RelayError> {
        debug!("Connecting to recognition engine at {}", url);
        let (socket, _response) = connect_async(url)
            .await
            .map_err(|e| RelayError::Connect(e.to_string()))?;
        let (sink, stream) = socket.split();
        Ok((Box::new(WsSink { sink }), Box::new(WsStream { stream })))
    }
}

struct WsSink {
    sink: SplitSink<WsSocket, Message>,
}

#[async_trait]
impl EngineSink for WsSink {
    async fn send(&mut self, frame: OutboundFrame) -> Result<(), RelayError> {
        let message = match frame {
            OutboundFrame::Control(control) => {
                let json = serde_json::to_string(&control)
                    .map_err(|e| RelayError::Protocol(e.to_string()))?;
                Message::Text(json)
            }
            OutboundFrame::Audio(bytes) => Message::Binary(bytes),
        };
        self.sink
            .send(message)
            .await
            .map_err(|_| RelayError::ChannelClosed)
    }

    async fn close(&mut self) -> Result<(), RelayError> {
        self.sink.close().await.map_err(|_| RelayError::ChannelClosed)
    }
}

struct WsStream {
    stream: SplitStream<WsSocket>,
}

#[async_trait]
impl EngineStream for WsStream {
    async fn next_message(&mut self) -> Option<Result<EngineMessage, RelayError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => {
                    return Some(serde_json::from_str(&text).map_err(|e| {
                        RelayError::Protocol(format!("malformed engine frame: {}", e))
                    }));
                }
                Ok(Message::Close(_)) => return None,
                // Pings are answered by tungstenite itself; the engine does
                // not send binary frames.
                Ok(_) => continue,
                Err(e) => {
                    warn!("Engine channel error, treating as closed: {}", e);
                    return None;
                }
            }
        }
    }
}
