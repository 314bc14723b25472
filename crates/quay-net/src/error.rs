use quay_proto::FrameError;
use thiserror::Error;

use crate::channel::ConnectionState;

#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("{0}")]
    Frame(String),
    #[error("channel is not connected")]
    NotConnected,
    #[error("channel is already {0}")]
    AlreadyActive(ConnectionState),
    #[error("no tokio runtime available to drive the channel")]
    NoRuntime,
}

impl From<FrameError> for ChannelError {
    fn from(value: FrameError) -> Self {
        ChannelError::Frame(value.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ChannelError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        ChannelError::Transport(value.to_string())
    }
}

impl ChannelError {
    /// Malformed inbound text; the connection stays open.
    pub fn is_frame(&self) -> bool {
        matches!(self, ChannelError::Frame(_))
    }
}

/// Outcome of endpoint discovery when awaited through [`crate::resolver::discover`].
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("controller has no suitable endpoint")]
    Unavailable,
    #[error("controller connection failed: {0}")]
    Transport(#[from] ChannelError),
    #[error("controller closed the connection before replying")]
    Closed,
    #[error("controller did not reply within the deadline")]
    TimedOut,
}

pub type ChannelResult<T> = Result<T, ChannelError>;
