//! Two-phase connection discovery: ask a controller for a worker endpoint,
//! then build a [`crate::ServiceClient`] against the answer.

use parking_lot::Mutex;
use quay_proto::{EndpointDescriptor, CMD_ENDPOINT};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{Endpoint, ServiceConfig, TerminalConfig, DEFAULT_SERVICE_PORT};
use crate::error::{ChannelError, ChannelResult, ResolveError};
use crate::terminal::ControlTerminal;
use crate::transport::{Transport, WebSocketTransport};

/// Connect to the controller in `config`, request an endpoint and report the
/// reply: `on_available` for a truthy descriptor, `on_unavailable` otherwise.
/// At most one of the two fires, once. There is no timeout at this layer.
///
/// The terminal keeps itself alive until the controller replies or the
/// connection ends, so the returned handle may be dropped. Hold on to it to
/// cancel early with [`ControlTerminal::close`] or to keep the controller
/// connection after the reply.
pub fn resolve<A, U>(
    config: TerminalConfig,
    on_available: A,
    on_unavailable: U,
) -> ChannelResult<ControlTerminal>
where
    A: FnOnce(EndpointDescriptor) + Send + 'static,
    U: FnOnce() + Send + 'static,
{
    resolve_with_transport(
        config,
        Arc::new(WebSocketTransport::new()),
        on_available,
        on_unavailable,
    )
}

pub fn resolve_with_transport<A, U>(
    mut config: TerminalConfig,
    transport: Arc<dyn Transport>,
    on_available: A,
    on_unavailable: U,
) -> ChannelResult<ControlTerminal>
where
    A: FnOnce(EndpointDescriptor) + Send + 'static,
    U: FnOnce() + Send + 'static,
{
    let user_open = config.hooks.on_open.take();
    config.hooks.on_open = Some(Arc::new(move |terminal: &ControlTerminal| {
        match terminal.send_command(CMD_ENDPOINT, json!({})) {
            Ok(()) => debug!(controller = %terminal.endpoint(), "endpoint requested"),
            Err(err) => {
                warn!(controller = %terminal.endpoint(), error = %err, "endpoint request failed")
            }
        }
        if let Some(hook) = &user_open {
            hook(terminal);
        }
    }));

    // Strong handle held until the request settles
    let keepalive: Arc<Mutex<Option<ControlTerminal>>> = Arc::default();

    let user_error = config.hooks.on_error.take();
    let error_keepalive = keepalive.clone();
    config.hooks.on_error = Some(Arc::new(move |err: &ChannelError| {
        if let Some(callback) = &user_error {
            callback(err);
        }
        if !err.is_frame() {
            let released = error_keepalive.lock().take();
            drop(released);
        }
    }));

    let user_close = config.hooks.on_close.take();
    let close_keepalive = keepalive.clone();
    config.hooks.on_close = Some(Arc::new(move || {
        if let Some(callback) = &user_close {
            callback();
        }
        let released = close_keepalive.lock().take();
        drop(released);
    }));

    let controller = config.endpoint.clone();
    let terminal = ControlTerminal::with_transport(config, transport);

    let pending = Mutex::new(Some((on_available, on_unavailable)));
    let reply_keepalive = keepalive.clone();
    terminal.command(CMD_ENDPOINT, move |_, data: &Value| {
        let Some((available, unavailable)) = pending.lock().take() else {
            debug!("ignoring repeated endpoint reply");
            return;
        };
        let released = reply_keepalive.lock().take();
        match EndpointDescriptor::from_reply(data.clone()) {
            Some(descriptor) => {
                info!(%controller, endpoint = %descriptor, "endpoint available");
                available(descriptor);
            }
            None => {
                info!(%controller, "no endpoint available");
                unavailable();
            }
        }
        drop(released);
    });

    *keepalive.lock() = Some(terminal.clone());
    if let Err(err) = terminal.connect() {
        let released = keepalive.lock().take();
        drop(released);
        return Err(err);
    }
    Ok(terminal)
}

/// Await the controller's answer, optionally bounded by `deadline`. The
/// controller connection is closed before returning.
pub async fn discover(
    config: TerminalConfig,
    deadline: Option<Duration>,
) -> Result<EndpointDescriptor, ResolveError> {
    discover_with_transport(config, Arc::new(WebSocketTransport::new()), deadline).await
}

pub async fn discover_with_transport(
    mut config: TerminalConfig,
    transport: Arc<dyn Transport>,
    deadline: Option<Duration>,
) -> Result<EndpointDescriptor, ResolveError> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Result<EndpointDescriptor, ResolveError>>();

    let user_error = config.hooks.on_error.take();
    let error_tx = tx.clone();
    config.hooks.on_error = Some(Arc::new(move |err: &ChannelError| {
        if !err.is_frame() {
            let _ = error_tx.send(Err(ResolveError::Transport(err.clone())));
        }
        if let Some(callback) = &user_error {
            callback(err);
        }
    }));

    let user_close = config.hooks.on_close.take();
    let close_tx = tx.clone();
    config.hooks.on_close = Some(Arc::new(move || {
        let _ = close_tx.send(Err(ResolveError::Closed));
        if let Some(callback) = &user_close {
            callback();
        }
    }));

    let available_tx = tx.clone();
    let terminal = resolve_with_transport(
        config,
        transport,
        move |descriptor| {
            let _ = available_tx.send(Ok(descriptor));
        },
        move || {
            let _ = tx.send(Err(ResolveError::Unavailable));
        },
    )?;

    let outcome = match deadline {
        Some(limit) => match tokio::time::timeout(limit, rx.recv()).await {
            Ok(outcome) => outcome,
            Err(_) => Some(Err(ResolveError::TimedOut)),
        },
        None => rx.recv().await,
    };
    terminal.close();
    outcome.unwrap_or(Err(ResolveError::Closed))
}

impl ServiceConfig {
    /// Service configuration for a discovered worker, or `None` when the
    /// descriptor is not a recognizable address.
    pub fn from_descriptor(descriptor: &EndpointDescriptor) -> Option<Self> {
        let (host, port) = descriptor.socket_address()?;
        Some(ServiceConfig::default().with_endpoint(Endpoint::new(host, port)))
    }
}

/// Shorthand for the default service port when a descriptor names only a host.
pub fn service_endpoint(host: &str) -> Endpoint {
    Endpoint::parse(host, DEFAULT_SERVICE_PORT)
        .unwrap_or_else(|| Endpoint::new(host, DEFAULT_SERVICE_PORT))
}
