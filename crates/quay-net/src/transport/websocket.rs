use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use super::{Connection, Transport, TransportEvent};
use crate::config::Endpoint;
use crate::error::ChannelError;

/// WebSocket implementation of the Transport trait
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, endpoint: &Endpoint) -> Result<Connection, ChannelError> {
        let url = endpoint.url();
        debug!(%url, "opening websocket");

        let (ws_stream, _) = connect_async(&url).await?;

        let (tx_out, rx_out) = mpsc::unbounded_channel::<String>();
        let (tx_in, rx_in) = mpsc::unbounded_channel::<TransportEvent>();

        tokio::spawn(async move {
            handle_websocket(ws_stream, rx_out, tx_in).await;
        });

        Ok(Connection {
            outbound: tx_out,
            inbound: rx_in,
        })
    }
}

/// Pump frames between the socket and the owning channel until either side
/// goes away.
async fn handle_websocket(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut rx_out: mpsc::UnboundedReceiver<String>,
    tx_in: mpsc::UnboundedSender<TransportEvent>,
) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    loop {
        tokio::select! {
            outgoing = rx_out.recv() => match outgoing {
                Some(text) => {
                    if let Err(err) = ws_sender.send(Message::Text(text)).await {
                        warn!(error = %err, "websocket send failed");
                        let _ = tx_in.send(TransportEvent::Error(err.into()));
                        break;
                    }
                }
                None => {
                    // Channel released the connection
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if tx_in.send(TransportEvent::Message(text)).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => {
                        if tx_in.send(TransportEvent::Message(text)).is_err() {
                            break;
                        }
                    }
                    Err(_) => debug!("dropping non-UTF8 binary frame"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    let _ = tx_in.send(TransportEvent::Closed);
                    break;
                }
                Some(Err(err)) => {
                    let _ = tx_in.send(TransportEvent::Error(err.into()));
                    break;
                }
                // Ping, Pong and raw frames are handled by tungstenite
                Some(Ok(_)) => {}
            },
        }
    }

    let _ = ws_sender.close().await;
}
