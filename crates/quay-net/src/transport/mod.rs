use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::Endpoint;
use crate::error::ChannelError;

pub mod mock;
pub mod websocket;

pub use mock::{MockPeer, MockTransport};
pub use websocket::WebSocketTransport;

/// Something the connection delivered to its owning channel.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Message(String),
    Error(ChannelError),
    Closed,
}

/// An open connection produced by a [`Transport`].
///
/// Dropping `outbound` asks the transport to close the connection.
pub struct Connection {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Transport trait for abstracting the underlying socket
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open one connection to `endpoint`.
    async fn open(&self, endpoint: &Endpoint) -> Result<Connection, ChannelError>;
}
