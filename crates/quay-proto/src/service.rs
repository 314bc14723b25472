use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::FrameResult;

/// Outbound service invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Value>,
}

impl ServiceRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            data: None,
            session: None,
        }
    }

    pub fn encode(&self) -> FrameResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Inbound frame from a worker node.
///
/// A well-formed frame carries either `response` or `event`, but both are
/// kept independently so the dispatcher can act on each one it finds.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ServiceInbound {
    #[serde(default)]
    pub response: Option<Value>,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub session: Option<Value>,
}

impl ServiceInbound {
    /// Parses one text frame. JSON that is valid but not an object decodes to
    /// an empty frame, which dispatches nothing.
    pub fn decode(text: &str) -> FrameResult<Self> {
        let value: Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn is_empty(&self) -> bool {
        self.response.is_none() && self.event.is_none()
    }
}
