use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::{CloseCallback, Endpoint, ErrorCallback};
use crate::error::{ChannelError, ChannelResult};
use crate::transport::{Connection, Transport, TransportEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
        })
    }
}

pub type OpenCallback = Arc<dyn Fn() + Send + Sync>;
pub type MessageCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type HandshakeCallback = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Raw lifecycle callbacks of a [`Channel`].
#[derive(Clone, Default)]
pub struct ChannelCallbacks {
    pub handshake: Option<HandshakeCallback>,
    pub on_open: Option<OpenCallback>,
    pub on_message: Option<MessageCallback>,
    pub on_error: Option<ErrorCallback>,
    pub on_close: Option<CloseCallback>,
}

impl ChannelCallbacks {
    /// Frame queued as part of the open transition, ahead of anything a
    /// caller can send. Runs under the channel lock, so it must not call
    /// back into the channel.
    pub fn handshake(
        mut self,
        callback: impl Fn() -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.handshake = Some(Arc::new(callback));
        self
    }

    pub fn on_open(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_open = Some(Arc::new(callback));
        self
    }

    pub fn on_message(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl Fn(&ChannelError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn on_close(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(callback));
        self
    }

    fn greeting(&self) -> Option<String> {
        self.handshake.as_ref().and_then(|callback| callback())
    }

    fn open(&self) {
        if let Some(callback) = &self.on_open {
            callback();
        }
    }

    fn message(&self, text: &str) {
        if let Some(callback) = &self.on_message {
            callback(text);
        }
    }

    fn error(&self, err: &ChannelError) {
        if let Some(callback) = &self.on_error {
            callback(err);
        }
    }

    fn close(&self) {
        if let Some(callback) = &self.on_close {
            callback();
        }
    }
}

/// Owns at most one live connection and surfaces its lifecycle through
/// [`ChannelCallbacks`].
///
/// All callbacks of one channel run sequentially on the channel's driver
/// task, in the order the transport delivered the underlying events.
pub struct Channel {
    shared: Arc<Shared>,
}

struct Shared {
    endpoint: Endpoint,
    transport: Arc<dyn Transport>,
    callbacks: ChannelCallbacks,
    inner: Mutex<Inner>,
}

struct Inner {
    state: ConnectionState,
    generation: u64,
    link: Option<Link>,
    /// Dropping it stops the current driver, whether still connecting or open.
    shutdown: Option<oneshot::Sender<()>>,
}

/// Exclusive handle on an open connection. Dropping it releases the
/// connection.
struct Link {
    outbound: mpsc::UnboundedSender<String>,
}

impl Channel {
    pub fn new(
        endpoint: Endpoint,
        transport: Arc<dyn Transport>,
        callbacks: ChannelCallbacks,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                endpoint,
                transport,
                callbacks,
                inner: Mutex::new(Inner {
                    state: ConnectionState::Disconnected,
                    generation: 0,
                    link: None,
                    shutdown: None,
                }),
            }),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.shared.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state
    }

    /// Start connecting. Returns immediately; `on_open` or `on_error` reports
    /// the outcome. Rejected while a connection is pending or open.
    pub fn connect(&self) -> ChannelResult<()> {
        let runtime = Handle::try_current().map_err(|_| ChannelError::NoRuntime)?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let generation = {
            let mut inner = self.shared.inner.lock();
            if matches!(
                inner.state,
                ConnectionState::Connecting | ConnectionState::Open
            ) {
                return Err(ChannelError::AlreadyActive(inner.state));
            }
            inner.state = ConnectionState::Connecting;
            inner.generation += 1;
            inner.shutdown = Some(shutdown_tx);
            inner.generation
        };

        info!(endpoint = %self.shared.endpoint, "connecting");
        runtime.spawn(drive(self.shared.clone(), generation, shutdown_rx));
        Ok(())
    }

    /// Transmit one raw text frame.
    pub fn send(&self, payload: &str) -> ChannelResult<()> {
        let inner = self.shared.inner.lock();
        let link = inner.link.as_ref().ok_or(ChannelError::NotConnected)?;
        link.outbound
            .send(payload.to_owned())
            .map_err(|_| ChannelError::NotConnected)?;
        debug!(endpoint = %self.shared.endpoint, bytes = payload.len(), "frame sent");
        Ok(())
    }

    /// Release the connection, or cancel a pending connection attempt.
    /// Either way `on_close` fires once from the driver. Returns `false` when
    /// there was nothing to close or cancel.
    pub fn close(&self) -> bool {
        let (link, shutdown) = {
            let mut inner = self.shared.inner.lock();
            match inner.state {
                ConnectionState::Open | ConnectionState::Connecting => {
                    inner.state = ConnectionState::Closed;
                    (inner.link.take(), inner.shutdown.take())
                }
                ConnectionState::Disconnected | ConnectionState::Closed => return false,
            }
        };
        drop(link);
        drop(shutdown);
        info!(endpoint = %self.shared.endpoint, "channel closed by caller");
        true
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

impl Shared {
    /// Connection attempt failed; true if this attempt is still the current one.
    fn abandon(&self, generation: u64) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation == generation && inner.state == ConnectionState::Connecting {
            inner.state = ConnectionState::Closed;
            inner.shutdown = None;
            true
        } else {
            false
        }
    }

    fn is_open(&self, generation: u64) -> bool {
        let inner = self.inner.lock();
        inner.generation == generation && inner.state == ConnectionState::Open
    }

    /// Underlying connection went away; true if it was still owned.
    fn release(&self, generation: u64) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation == generation && inner.state == ConnectionState::Open {
            inner.state = ConnectionState::Closed;
            inner.link = None;
            inner.shutdown = None;
            true
        } else {
            false
        }
    }
}

async fn drive(shared: Arc<Shared>, generation: u64, mut shutdown: oneshot::Receiver<()>) {
    let opened = tokio::select! {
        biased;
        _ = &mut shutdown => {
            debug!(endpoint = %shared.endpoint, "connection attempt cancelled");
            shared.callbacks.close();
            return;
        }
        opened = shared.transport.open(&shared.endpoint) => opened,
    };

    let connection = match opened {
        Ok(connection) => connection,
        Err(err) => {
            if shared.abandon(generation) {
                warn!(endpoint = %shared.endpoint, error = %err, "connection failed");
                shared.callbacks.error(&err);
            } else {
                // Cancelled while the attempt was failing
                shared.callbacks.close();
            }
            return;
        }
    };

    let Connection {
        outbound,
        mut inbound,
    } = connection;

    {
        let mut inner = shared.inner.lock();
        if inner.generation != generation || inner.state != ConnectionState::Connecting {
            drop(inner);
            debug!(endpoint = %shared.endpoint, "closed before open; discarding connection");
            shared.callbacks.close();
            return;
        }
        if let Some(frame) = shared.callbacks.greeting() {
            if outbound.send(frame).is_err() {
                debug!(endpoint = %shared.endpoint, "connection gone before handshake");
            }
        }
        inner.state = ConnectionState::Open;
        inner.link = Some(Link { outbound });
    }

    info!(endpoint = %shared.endpoint, "channel open");
    shared.callbacks.open();

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            event = inbound.recv() => match event {
                Some(TransportEvent::Message(text)) => {
                    if !shared.is_open(generation) {
                        break;
                    }
                    debug!(endpoint = %shared.endpoint, bytes = text.len(), "frame received");
                    shared.callbacks.message(&text);
                }
                Some(TransportEvent::Error(err)) => {
                    if shared.release(generation) {
                        warn!(endpoint = %shared.endpoint, error = %err, "connection error");
                        shared.callbacks.error(&err);
                    }
                    break;
                }
                Some(TransportEvent::Closed) | None => {
                    shared.release(generation);
                    break;
                }
            },
        }
    }

    info!(endpoint = %shared.endpoint, "channel closed");
    shared.callbacks.close();
}
