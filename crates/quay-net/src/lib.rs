//! Client side of the quay messaging protocol.
//!
//! A [`Channel`] owns one WebSocket connection. [`ServiceClient`] and
//! [`ControlTerminal`] each wrap a channel and speak their own JSON envelope
//! over it; [`resolver`] uses a terminal to ask a controller which worker a
//! service client should connect to.

pub mod channel;
pub mod config;
pub mod error;
pub mod registry;
pub mod resolver;
pub mod service;
pub mod terminal;
pub mod transport;

pub use channel::{Channel, ChannelCallbacks, ConnectionState};
pub use config::{Endpoint, Hooks, ServiceConfig, TerminalConfig};
pub use error::{ChannelError, ChannelResult, ResolveError};
pub use registry::ListenerId;
pub use resolver::{discover, resolve};
pub use service::ServiceClient;
pub use terminal::ControlTerminal;
pub use transport::{MockTransport, Transport, WebSocketTransport};

pub use quay_proto::EndpointDescriptor;
