use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Address of a worker node as handed out by a controller.
///
/// The protocol treats the value as opaque; [`EndpointDescriptor::socket_address`]
/// understands the two shapes controllers commonly send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointDescriptor(Value);

impl EndpointDescriptor {
    /// Returns `None` when the controller answered with a falsy value, which
    /// signals that no suitable node is available.
    pub fn from_reply(value: Value) -> Option<Self> {
        if is_truthy(&value) {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Interprets `"host:port"` strings and `{"host": .., "port": ..}` objects.
    pub fn socket_address(&self) -> Option<(String, u16)> {
        match &self.0 {
            Value::String(text) => {
                let trimmed = text
                    .trim()
                    .trim_start_matches("ws://")
                    .trim_end_matches('/');
                let (host, port) = trimmed.rsplit_once(':')?;
                let host = host.trim_start_matches('[').trim_end_matches(']');
                if host.is_empty() {
                    return None;
                }
                Some((host.to_string(), port.parse().ok()?))
            }
            Value::Object(map) => {
                let host = map.get("host")?.as_str()?;
                let port = match map.get("port")? {
                    Value::Number(n) => u16::try_from(n.as_u64()?).ok()?,
                    Value::String(s) => s.parse().ok()?,
                    _ => return None,
                };
                Some((host.to_string(), port))
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for EndpointDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Value::String(text) => f.write_str(text),
            other => write!(f, "{other}"),
        }
    }
}

/// JSON truthiness: `null`, `false`, zero, NaN and `""` are falsy; every
/// object and array (even empty) is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn falsy_replies_are_rejected() {
        for value in [json!(null), json!(false), json!(0), json!(""), json!(0.0)] {
            assert!(EndpointDescriptor::from_reply(value).is_none());
        }
    }

    #[test]
    fn empty_containers_are_truthy() {
        assert!(is_truthy(&json!({})));
        assert!(is_truthy(&json!([])));
        assert!(is_truthy(&json!("0")));
    }

    #[test]
    fn parses_host_port_string() {
        let descriptor = EndpointDescriptor::from_reply(json!("10.0.0.5:9000")).unwrap();
        assert_eq!(
            descriptor.socket_address(),
            Some(("10.0.0.5".to_string(), 9000))
        );
        assert_eq!(descriptor.to_string(), "10.0.0.5:9000");
    }

    #[test]
    fn parses_bracketed_ipv6() {
        let descriptor = EndpointDescriptor::from_reply(json!("[::1]:25000")).unwrap();
        assert_eq!(descriptor.socket_address(), Some(("::1".to_string(), 25000)));
    }

    #[test]
    fn parses_host_port_object() {
        let descriptor =
            EndpointDescriptor::from_reply(json!({"host": "worker-3", "port": "25000"})).unwrap();
        assert_eq!(
            descriptor.socket_address(),
            Some(("worker-3".to_string(), 25000))
        );
    }

    #[test]
    fn opaque_shapes_have_no_address() {
        let descriptor = EndpointDescriptor::from_reply(json!(["a", "b"])).unwrap();
        assert_eq!(descriptor.socket_address(), None);
        let descriptor = EndpointDescriptor::from_reply(json!("no-port")).unwrap();
        assert_eq!(descriptor.socket_address(), None);
    }
}
