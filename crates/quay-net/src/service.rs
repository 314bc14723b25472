//! Request/response and event client for worker nodes.

use parking_lot::Mutex;
use quay_proto::{ServiceInbound, ServiceRequest};
use serde_json::Value;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use crate::channel::{Channel, ChannelCallbacks, ConnectionState};
use crate::config::{Endpoint, Hooks, ServiceConfig};
use crate::error::{ChannelError, ChannelResult};
use crate::registry::{fold, ListenerId, Registry};
use crate::transport::{Transport, WebSocketTransport};

/// Called with `(code, data, session)` for every response frame.
pub type ResponseHandler = Arc<dyn Fn(&Value, &Value, Option<&Value>) + Send + Sync>;
/// Called with `(event, data, session)`; `event` is already lowercased.
pub type EventListener = dyn Fn(&str, &Value, Option<&Value>) + Send + Sync;

/// Client for a worker node's service endpoint.
///
/// Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct ServiceClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    channel: Channel,
    events: Registry<EventListener>,
    response: Mutex<Option<ResponseHandler>>,
    hooks: Hooks<ServiceClient>,
}

impl ServiceClient {
    pub fn new(config: ServiceConfig) -> Self {
        Self::with_transport(config, Arc::new(WebSocketTransport::new()))
    }

    pub fn with_transport(config: ServiceConfig, transport: Arc<dyn Transport>) -> Self {
        let ServiceConfig { endpoint, hooks } = config;
        let inner = Arc::new_cyclic(|weak: &Weak<ClientInner>| {
            let (open, message, error, close) =
                (weak.clone(), weak.clone(), weak.clone(), weak.clone());
            let callbacks = ChannelCallbacks::default()
                .on_open(move || {
                    if let Some(inner) = open.upgrade() {
                        let client = ServiceClient { inner };
                        if let Some(hook) = &client.inner.hooks.on_open {
                            hook(&client);
                        }
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

            ClientInner {
                channel: Channel::new(endpoint, transport, callbacks),
                events: Registry::new(),
                response: Mutex::new(None),
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

    /// Send a raw text frame.
    pub fn send(&self, payload: &str) -> ChannelResult<()> {
        self.inner.channel.send(payload)
    }

    /// Invoke `url` on the worker. Fire-and-forget: replies arrive through
    /// the response handler.
    pub fn service(
        &self,
        url: &str,
        data: Option<Value>,
        session: Option<Value>,
    ) -> ChannelResult<()> {
        let request = ServiceRequest {
            data,
            session,
            ..ServiceRequest::new(url)
        };
        let encoded = request.encode()?;
        debug!(%url, "service request");
        self.inner.channel.send(&encoded)
    }

    /// Listen for `name` events (case-insensitive).
    pub fn event(
        &self,
        name: &str,
        listener: impl Fn(&str, &Value, Option<&Value>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.events.register(name, Arc::new(listener))
    }

    pub fn unsubscribe(&self, id: &ListenerId) -> bool {
        self.inner.events.remove(id)
    }

    /// Replace the response handler and return it. Only the latest handler fires.
    pub fn response(
        &self,
        handler: impl Fn(&Value, &Value, Option<&Value>) + Send + Sync + 'static,
    ) -> ResponseHandler {
        let handler: ResponseHandler = Arc::new(handler);
        *self.inner.response.lock() = Some(handler.clone());
        handler
    }

    pub fn response_handler(&self) -> Option<ResponseHandler> {
        self.inner.response.lock().clone()
    }
}

impl ClientInner {
    fn dispatch(&self, text: &str) {
        let frame = match ServiceInbound::decode(text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(
                    endpoint = %self.channel.endpoint(),
                    error = %err,
                    "dropping malformed service frame"
                );
                self.report(&err.into());
                return;
            }
        };
        if frame.is_empty() {
            debug!("frame without response or event");
            return;
        }

        if let Some(code) = &frame.response {
            let handler = self.response.lock().clone();
            match handler {
                Some(handler) => handler(code, &frame.data, frame.session.as_ref()),
                None => debug!("response without handler"),
            }
        }

        if let Some(event) = &frame.event {
            let name = fold(event);
            let listeners = self.events.snapshot(&name);
            if listeners.is_empty() {
                debug!(event = %name, "event without listeners");
            }
            for listener in listeners {
                listener(&name, &frame.data, frame.session.as_ref());
            }
        }
    }

    fn report(&self, err: &ChannelError) {
        if let Some(callback) = &self.hooks.on_error {
            callback(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockPeer, MockTransport};
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    type Log = Arc<Mutex<Vec<String>>>;

    async fn connected(config: ServiceConfig) -> (ServiceClient, MockPeer) {
        let (transport, mut peers) = MockTransport::new();
        let client = ServiceClient::with_transport(config, Arc::new(transport));
        client.connect().unwrap();
        let peer = timeout(Duration::from_secs(1), peers.recv())
            .await
            .unwrap()
            .unwrap();
        settle().await;
        (client, peer)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn service_request_round_trip() {
        let (client, mut peer) = connected(ServiceConfig::default()).await;
        let seen: Log = Arc::default();
        let sink = seen.clone();
        client.response(move |code, data, session| {
            sink.lock().push(format!("{code}|{data}|{}", session.unwrap()));
        });

        client
            .service("echo", Some(json!({"x": 1})), Some(json!("s1")))
            .unwrap();
        let sent: Value = serde_json::from_str(&peer.recv().await.unwrap()).unwrap();
        assert_eq!(sent, json!({"url": "echo", "data": {"x": 1}, "session": "s1"}));

        peer.push(r#"{"response":"ok","data":{"x":1},"session":"s1"}"#);
        settle().await;
        assert_eq!(*seen.lock(), vec![r#""ok"|{"x":1}|"s1""#.to_string()]);
    }

    #[tokio::test]
    async fn service_without_optional_fields() {
        let (client, mut peer) = connected(ServiceConfig::default()).await;
        client.service("status", None, None).unwrap();
        assert_eq!(peer.recv().await.as_deref(), Some(r#"{"url":"status"}"#));
    }

    #[tokio::test]
    async fn events_are_case_insensitive_and_ordered() {
        let (client, peer) = connected(ServiceConfig::default()).await;
        let seen: Log = Arc::default();
        let (first, second) = (seen.clone(), seen.clone());
        client.event("Foo", move |name, data, _| first.lock().push(format!("L1:{name}:{data}")));
        client.event("foo", move |name, _, session| {
            second.lock().push(format!("L2:{name}:{}", session.is_none()))
        });

        peer.push(r#"{"event":"FOO","data":3}"#);
        peer.push(r#"{"event":"bar","data":4}"#);
        settle().await;
        assert_eq!(
            *seen.lock(),
            vec!["L1:foo:3".to_string(), "L2:foo:true".into()]
        );
    }

    #[tokio::test]
    async fn response_handler_is_last_wins() {
        let (client, peer) = connected(ServiceConfig::default()).await;
        let seen: Log = Arc::default();
        let (a, b) = (seen.clone(), seen.clone());
        client.response(move |_, _, _| a.lock().push("A".into()));
        let current = client.response(move |_, _, _| b.lock().push("B".into()));
        assert!(Arc::ptr_eq(&current, &client.response_handler().unwrap()));

        peer.push(r#"{"response":200}"#);
        settle().await;
        assert_eq!(*seen.lock(), vec!["B".to_string()]);
    }

    #[tokio::test]
    async fn frame_with_response_and_event_fires_both() {
        let (client, peer) = connected(ServiceConfig::default()).await;
        let seen: Log = Arc::default();
        let (a, b) = (seen.clone(), seen.clone());
        client.response(move |_, _, _| a.lock().push("response".into()));
        client.event("done", move |_, _, _| b.lock().push("event".into()));

        peer.push(r#"{"response":1,"event":"Done"}"#);
        settle().await;
        assert_eq!(*seen.lock(), vec!["response".to_string(), "event".into()]);
    }

    #[tokio::test]
    async fn malformed_frame_reports_once_and_stays_open() {
        let errors: Log = Arc::default();
        let sink = errors.clone();
        let config = ServiceConfig::default().on_error(move |err| {
            assert!(err.is_frame());
            sink.lock().push(err.to_string());
        });
        let (client, peer) = connected(config).await;
        let fired: Log = Arc::default();
        let (a, b) = (fired.clone(), fired.clone());
        client.response(move |_, _, _| a.lock().push("response".into()));
        client.event("tick", move |_, _, _| b.lock().push("event".into()));

        peer.push(r#"{"event":"tick","data":"#);
        settle().await;
        assert_eq!(errors.lock().len(), 1);
        assert!(fired.lock().is_empty());
        assert_eq!(client.state(), ConnectionState::Open);

        peer.push(r#"{"event":"tick"}"#);
        settle().await;
        assert_eq!(*fired.lock(), vec!["event".to_string()]);
    }

    #[tokio::test]
    async fn unsubscribed_listener_stops_firing() {
        let (client, peer) = connected(ServiceConfig::default()).await;
        let seen: Log = Arc::default();
        let sink = seen.clone();
        let id = client.event("tick", move |_, _, _| sink.lock().push("tick".into()));
        assert!(client.unsubscribe(&id));

        peer.push(r#"{"event":"tick"}"#);
        settle().await;
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn open_hook_can_issue_requests() {
        let (transport, mut peers) = MockTransport::new();
        let config = ServiceConfig::default().on_open(|client| {
            client.service("hello", None, None).unwrap();
        });
        let client = ServiceClient::with_transport(config, Arc::new(transport));
        client.connect().unwrap();
        let mut peer = peers.recv().await.unwrap();
        assert_eq!(peer.recv().await.as_deref(), Some(r#"{"url":"hello"}"#));
    }

    #[tokio::test]
    async fn service_before_connect_fails() {
        let (transport, _peers) = MockTransport::new();
        let client = ServiceClient::with_transport(ServiceConfig::default(), Arc::new(transport));
        assert!(matches!(
            client.service("x", None, None),
            Err(ChannelError::NotConnected)
        ));
    }
}
