use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::FrameResult;

/// Sent automatically by a terminal every time its connection opens.
pub const CMD_AUTHORIZE: &str = "authorize";
/// Endpoint discovery request and reply.
pub const CMD_ENDPOINT: &str = "endpoint";
/// Cluster topology pushes from a controller.
pub const CMD_INFRASTRUCTURE: &str = "infrastructure";

/// Outbound command to a controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandFrame {
    pub cmd: String,
    pub data: Value,
    pub signature: String,
}

impl CommandFrame {
    pub fn new(cmd: impl Into<String>, data: Value, signature: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            data,
            signature: signature.into(),
        }
    }

    /// `{cmd: "authorize", data: {}, signature}`
    pub fn authorize(signature: impl Into<String>) -> Self {
        Self::new(CMD_AUTHORIZE, Value::Object(Default::default()), signature)
    }

    pub fn encode(&self) -> FrameResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Inbound command reply or push.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CommandInbound {
    #[serde(default)]
    pub cmd: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl CommandInbound {
    pub fn decode(text: &str) -> FrameResult<Self> {
        let value: Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn authorize_frame_shape() {
        let encoded: Value =
            serde_json::from_str(&CommandFrame::authorize("sig-1").encode().unwrap()).unwrap();
        assert_eq!(
            encoded,
            json!({"cmd": "authorize", "data": {}, "signature": "sig-1"})
        );
    }

    #[test]
    fn decodes_endpoint_reply() {
        let frame = CommandInbound::decode(r#"{"cmd":"endpoint","data":"10.0.0.5:9000"}"#).unwrap();
        assert_eq!(frame.cmd.as_deref(), Some("endpoint"));
        assert_eq!(frame.data, json!("10.0.0.5:9000"));
    }

    #[test]
    fn missing_cmd_decodes_to_none() {
        let frame = CommandInbound::decode(r#"{"data":{}}"#).unwrap();
        assert!(frame.cmd.is_none());
    }

    #[test]
    fn non_string_cmd_is_an_error() {
        assert!(CommandInbound::decode(r#"{"cmd":{"nested":true}}"#).is_err());
    }
}
