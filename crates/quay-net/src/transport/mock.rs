use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{Connection, Transport, TransportEvent};
use crate::config::Endpoint;
use crate::error::ChannelError;

/// In-memory transport for tests. Every successful `open` hands a
/// [`MockPeer`] to whoever is holding the peer receiver.
#[derive(Clone)]
pub struct MockTransport {
    peers: mpsc::UnboundedSender<MockPeer>,
    refuse: Arc<Mutex<Option<String>>>,
}

impl MockTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (
            Self {
                peers,
                refuse: Arc::new(Mutex::new(None)),
            },
            rx,
        )
    }

    /// Make subsequent `open` calls fail with `reason`.
    pub fn refuse_connections(&self, reason: impl Into<String>) {
        *self.refuse.lock() = Some(reason.into());
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, endpoint: &Endpoint) -> Result<Connection, ChannelError> {
        let refused = self.refuse.lock().clone();
        if let Some(reason) = refused {
            return Err(ChannelError::Transport(reason));
        }

        let (tx_out, rx_out) = mpsc::unbounded_channel();
        let (tx_in, rx_in) = mpsc::unbounded_channel();
        let peer = MockPeer {
            endpoint: endpoint.clone(),
            sent: rx_out,
            inbound: tx_in,
        };
        self.peers
            .send(peer)
            .map_err(|_| ChannelError::Transport("mock listener dropped".into()))?;

        Ok(Connection {
            outbound: tx_out,
            inbound: rx_in,
        })
    }
}

/// Remote side of a mock connection.
pub struct MockPeer {
    pub endpoint: Endpoint,
    sent: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<TransportEvent>,
}

impl MockPeer {
    /// Next frame the channel sent, or `None` once the channel released the connection.
    pub async fn recv(&mut self) -> Option<String> {
        self.sent.recv().await
    }

    /// A frame already sent, without waiting.
    pub fn try_recv(&mut self) -> Option<String> {
        self.sent.try_recv().ok()
    }

    pub fn push(&self, text: impl Into<String>) -> bool {
        self.inbound
            .send(TransportEvent::Message(text.into()))
            .is_ok()
    }

    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.inbound
            .send(TransportEvent::Error(ChannelError::Transport(reason.into())))
            .is_ok()
    }

    pub fn hang_up(&self) -> bool {
        self.inbound.send(TransportEvent::Closed).is_ok()
    }
}
