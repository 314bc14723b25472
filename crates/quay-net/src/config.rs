use std::env;
use std::fmt;
use std::sync::Arc;

use crate::error::ChannelError;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_SERVICE_PORT: u16 = 25000;
pub const DEFAULT_CONTROL_PORT: u16 = 25900;

/// Remote address of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// Optional path suffix (e.g. "/ws")
    pub path: Option<String>,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Parses `host:port`, falling back to `default_port` when no port is given.
    pub fn parse(text: &str, default_port: u16) -> Option<Self> {
        let text = text.trim().trim_start_matches("ws://").trim_end_matches('/');
        if text.is_empty() {
            return None;
        }
        match text.rsplit_once(':') {
            Some((host, port)) if !host.ends_with(':') => {
                let host = host.trim_start_matches('[').trim_end_matches(']');
                Some(Self::new(host, port.parse().ok()?))
            }
            _ => Some(Self::new(text, default_port)),
        }
    }

    /// Build the full WebSocket URL
    pub fn url(&self) -> String {
        // Normalize localhost to avoid IPv6 issues
        let host = if self.host == "localhost" {
            "127.0.0.1"
        } else {
            self.host.as_str()
        };
        let mut url = if host.contains(':') {
            format!("ws://[{}]:{}", host, self.port)
        } else {
            format!("ws://{}:{}", host, self.port)
        };

        if let Some(ref path) = self.path {
            if !path.starts_with('/') {
                url.push('/');
            }
            url.push_str(path);
        }

        url
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

pub type OpenHook<T> = Arc<dyn Fn(&T) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&ChannelError) + Send + Sync>;
pub type CloseCallback = Arc<dyn Fn() + Send + Sync>;

/// Lifecycle callbacks a caller attaches to a client or terminal.
pub struct Hooks<T> {
    pub on_open: Option<OpenHook<T>>,
    pub on_error: Option<ErrorCallback>,
    pub on_close: Option<CloseCallback>,
}

impl<T> Default for Hooks<T> {
    fn default() -> Self {
        Self {
            on_open: None,
            on_error: None,
            on_close: None,
        }
    }
}

impl<T> Clone for Hooks<T> {
    fn clone(&self) -> Self {
        Self {
            on_open: self.on_open.clone(),
            on_error: self.on_error.clone(),
            on_close: self.on_close.clone(),
        }
    }
}

impl<T> fmt::Debug for Hooks<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_open", &self.on_open.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_close", &self.on_close.is_some())
            .finish()
    }
}

/// Configuration for a [`crate::ServiceClient`].
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub endpoint: Endpoint,
    pub hooks: Hooks<crate::ServiceClient>,
}

impl ServiceConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            endpoint: Endpoint::new(host, port),
            hooks: Hooks::default(),
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::new(env_host(), env_port("QUAY_SERVICE_PORT", DEFAULT_SERVICE_PORT))
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn on_open(mut self, hook: impl Fn(&crate::ServiceClient) + Send + Sync + 'static) -> Self {
        self.hooks.on_open = Some(Arc::new(hook));
        self
    }

    pub fn on_error(mut self, callback: impl Fn(&ChannelError) + Send + Sync + 'static) -> Self {
        self.hooks.on_error = Some(Arc::new(callback));
        self
    }

    pub fn on_close(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.hooks.on_close = Some(Arc::new(callback));
        self
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_SERVICE_PORT)
    }
}

/// Configuration for a [`crate::ControlTerminal`].
#[derive(Debug, Clone)]
pub struct TerminalConfig {
    pub endpoint: Endpoint,
    /// Credential sent in every command frame, including the authorize frame.
    pub signature: String,
    pub hooks: Hooks<crate::ControlTerminal>,
}

impl TerminalConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            endpoint: Endpoint::new(host, port),
            signature: String::new(),
            hooks: Hooks::default(),
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::new(env_host(), env_port("QUAY_CONTROL_PORT", DEFAULT_CONTROL_PORT))
            .with_signature(env::var("QUAY_SIGNATURE").unwrap_or_default())
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = signature.into();
        self
    }

    pub fn on_open(
        mut self,
        hook: impl Fn(&crate::ControlTerminal) + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_open = Some(Arc::new(hook));
        self
    }

    pub fn on_error(mut self, callback: impl Fn(&ChannelError) + Send + Sync + 'static) -> Self {
        self.hooks.on_error = Some(Arc::new(callback));
        self
    }

    pub fn on_close(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.hooks.on_close = Some(Arc::new(callback));
        self
    }
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_CONTROL_PORT)
    }
}

fn env_host() -> String {
    env::var("QUAY_HOST")
        .ok()
        .filter(|host| !host.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_HOST.to_string())
}

fn env_port(var: &str, default: u16) -> u16 {
    env::var(var)
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(default)
}
