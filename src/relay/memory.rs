//! In-memory engine transport.
//!
//! Pairs a client-side transport with an engine-side handle so the relay
//! client can be exercised without a network. Each `connect` yields one
//! link; dropping either half of a link closes the channel, which is how
//! tests simulate abnormal closure and reconnection.

use super::protocol::{EngineMessage, OutboundFrame};
use super::transport::{EngineSink, EngineStream, EngineTransport};
use super::RelayError;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Engine side of one accepted connection.
pub struct EngineLink {
    /// Frames the client sent
    pub from_client: mpsc::UnboundedReceiver<OutboundFrame>,
    /// Messages to deliver to the client
    pub to_client: mpsc::UnboundedSender<EngineMessage>,
}

/// Engine-side handle: yields one [`EngineLink`] per client connect.
pub struct MemoryEngine {
    links: mpsc::UnboundedReceiver<EngineLink>,
}

impl MemoryEngine {
    /// Wait for the next client connection.
    pub async fn accept(&mut self) -> Option<EngineLink> {
        self.links.recv().await
    }
}

/// Client-side transport half of [`memory_pair`].
pub struct MemoryTransport {
    links: mpsc::UnboundedSender<EngineLink>,
}

/// Create a connected transport/engine pair.
pub fn memory_pair() -> (MemoryTransport, MemoryEngine) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MemoryTransport { links: tx }, MemoryEngine { links: rx })
}

#[async_trait]
impl EngineTransport for MemoryTransport {
    async fn connect(
        &self,
        _url: &str,
    ) -> Result<(Box<dyn EngineSink>, Box<dyn EngineStream>), RelayError> {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        self.links
            .send(EngineLink {
                from_client: out_rx,
                to_client: in_tx,
            })
            .map_err(|_| RelayError::Connect("engine offline".to_string()))?;

        Ok((
            Box::new(MemorySink { tx: Some(out_tx) }),
            Box::new(MemoryStream { rx: in_rx }),
        ))
    }
}

struct MemorySink {
    tx: Option<mpsc::UnboundedSender<OutboundFrame>>,
}

#[async_trait]
impl EngineSink for MemorySink {
    async fn send(&mut self, frame: OutboundFrame) -> Result<(), RelayError> {
        match &self.tx {
            Some(tx) => tx.send(frame).map_err(|_| RelayError::ChannelClosed),
            None => Err(RelayError::ChannelClosed),
        }
    }

    async fn close(&mut self) -> Result<(), RelayError> {
        self.tx.take();
        Ok(())
    }
}

struct MemoryStream {
    rx: mpsc::UnboundedReceiver<EngineMessage>,
}

#[async_trait]
impl EngineStream for MemoryStream {
    async fn next_message(&mut self) -> Option<Result<EngineMessage, RelayError>> {
        self.rx.recv().await.map(Ok)
    }
}
