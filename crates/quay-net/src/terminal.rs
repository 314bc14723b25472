//! Control channel to a cluster controller.
//!
//! A terminal authorizes itself every time its connection opens. The
//! `{cmd: "authorize", data: {}, signature}` frame is queued as part of the
//! open transition, before the channel accepts any other frame, so it is
//! always the first frame on the wire. The terminal does not wait for the
//! controller to acknowledge it.

use parking_lot::Mutex;
use quay_proto::{CommandFrame, CommandInbound, CMD_INFRASTRUCTURE};
use serde_json::Value;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelCallbacks, ConnectionState};
use crate::config::{Endpoint, Hooks, TerminalConfig};
use crate::error::{ChannelError, ChannelResult};
use crate::registry::{fold, ListenerId, Registry};
use crate::transport::{Transport, WebSocketTransport};

/// Called with `(cmd, data)`; `cmd` is already lowercased.
pub type CommandListener = dyn Fn(&str, &Value) + Send + Sync;
/// Receives the data of every `infrastructure` push.
pub type InfrastructureHandler = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Clone)]
pub struct ControlTerminal {
    inner: Arc<TerminalInner>,
}

struct TerminalInner {
    channel: Channel,
    commands: Registry<CommandListener>,
    signature: Arc<Mutex<String>>,
    infrastructure: Mutex<Option<InfrastructureHandler>>,
    hooks: Hooks<ControlTerminal>,
}

impl ControlTerminal {
    pub fn new(config: TerminalConfig) -> Self {
        Self::with_transport(config, Arc::new(WebSocketTransport::new()))
    }

    pub fn with_transport(config: TerminalConfig, transport: Arc<dyn Transport>) -> Self {
        let TerminalConfig {
            endpoint,
            signature,
            hooks,
        } = config;
        let signature = Arc::new(Mutex::new(signature));
        let handshake = signature.clone();
        let inner = Arc::new_cyclic(|weak: &Weak<TerminalInner>| {
            let (open, message, error, close) =
                (weak.clone(), weak.clone(), weak.clone(), weak.clone());
            let callbacks = ChannelCallbacks::default()
                .handshake(move || authorize_frame(&handshake.lock()))
                .on_open(move || {
                    if let Some(inner) = open.upgrade() {
                        ControlTerminal { inner }.opened();
                    }
                })
                .on_message(move |text| {
                    if let Some(inner) = message.upgrade() {
                        inner.dispatch(text);
                    }
                })
                .on_error(move |err| {
                    if let Some(inner) = error.upgrade() {
                        inner.report(err);
                    }
                })
                .on_close(move || {
                    let hook = close.upgrade().and_then(|inner| inner.hooks.on_close.clone());
                    if let Some(callback) = hook {
                        callback();
                    }
                });

            TerminalInner {
                channel: Channel::new(endpoint, transport, callbacks),
                commands: Registry::new(),
                signature,
                infrastructure: Mutex::new(None),
                hooks,
            }
        });
        Self { inner }
    }

    pub fn connect(&self) -> ChannelResult<()> {
        self.inner.channel.connect()
    }

    pub fn close(&self) -> bool {
        self.inner.channel.close()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.channel.state()
    }

    pub fn endpoint(&self) -> &Endpoint {
        self.inner.channel.endpoint()
    }

    pub fn send(&self, payload: &str) -> ChannelResult<()> {
        self.inner.channel.send(payload)
    }

    pub fn signature(&self) -> String {
        self.inner.signature.lock().clone()
    }

    /// Replace the credential used from now on. An already sent authorize
    /// frame is not repeated.
    pub fn set_signature(&self, signature: impl Into<String>) -> String {
        let mut current = self.inner.signature.lock();
        *current = signature.into();
        current.clone()
    }

    /// Replace the infrastructure handler and return it. Only the latest handler fires.
    pub fn infrastructure(
        &self,
        handler: impl Fn(&Value) + Send + Sync + 'static,
    ) -> InfrastructureHandler {
        let handler: InfrastructureHandler = Arc::new(handler);
        *self.inner.infrastructure.lock() = Some(handler.clone());
        handler
    }

    pub fn infrastructure_handler(&self) -> Option<InfrastructureHandler> {
        self.inner.infrastructure.lock().clone()
    }

    /// Listen for inbound `name` commands (case-insensitive).
    pub fn command(
        &self,
        name: &str,
        listener: impl Fn(&str, &Value) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.commands.register(name, Arc::new(listener))
    }

    pub fn unsubscribe(&self, id: &ListenerId) -> bool {
        self.inner.commands.remove(id)
    }

    /// Send `{cmd, data, signature}` signed with the current signature.
    pub fn send_command(&self, cmd: &str, data: Value) -> ChannelResult<()> {
        let frame = CommandFrame::new(cmd, data, self.signature());
        let encoded = frame.encode()?;
        debug!(%cmd, "command sent");
        self.inner.channel.send(&encoded)
    }

    fn opened(&self) {
        info!(endpoint = %self.endpoint(), "authorize sent");
        if let Some(hook) = &self.inner.hooks.on_open {
            hook(self);
        }
    }
}

fn authorize_frame(signature: &str) -> Option<String> {
    match CommandFrame::authorize(signature).encode() {
        Ok(encoded) => Some(encoded),
        Err(err) => {
            warn!(error = %err, "authorize frame not encoded");
            None
        }
    }
}

impl TerminalInner {
    fn dispatch(&self, text: &str) {
        let frame = match CommandInbound::decode(text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(
                    endpoint = %self.channel.endpoint(),
                    error = %err,
                    "dropping malformed command frame"
                );
                self.report(&err.into());
                return;
            }
        };

        let Some(cmd) = frame.cmd else {
            debug!("frame without cmd");
            return;
        };
        let cmd = fold(&cmd);

        if cmd == CMD_INFRASTRUCTURE {
            let handler = self.infrastructure.lock().clone();
            if let Some(handler) = handler {
                handler(&frame.data);
            }
        }

        let listeners = self.commands.snapshot(&cmd);
        if listeners.is_empty() {
            debug!(%cmd, "command without listeners");
        }
        for listener in listeners {
            listener(&cmd, &frame.data);
        }
    }

    fn report(&self, err: &ChannelError) {
        if let Some(callback) = &self.hooks.on_error {
            callback(err);
        }
    }
}
