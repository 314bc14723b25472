//! Frame shapes shared by quay clients, terminals and the tools built on them.
//!
//! Every frame is a single JSON text message. Service frames carry
//! request/response/event traffic for a worker node; command frames carry the
//! control channel traffic to a controller (authorization, endpoint discovery,
//! infrastructure pushes).

use thiserror::Error;

pub mod command;
pub mod endpoint;
pub mod service;

pub use command::{CommandFrame, CommandInbound, CMD_AUTHORIZE, CMD_ENDPOINT, CMD_INFRASTRUCTURE};
pub use endpoint::{is_truthy, EndpointDescriptor};
pub use service::{ServiceInbound, ServiceRequest};

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
}

pub type FrameResult<T> = Result<T, FrameError>;
