//! Client library for the A2A hub
//!
//! [`HubClient`] is the contract presented to an in-process agent: stream
//! connect/disconnect with supervised reconnection, publish with receipt
//! await and HTTP fallback, subscription management with a local cache, and
//! a handler registry dispatching inbound messages by type.

use crate::domain_types::MessageId;
use crate::events::{ClientEvent, EventBus};
use crate::messages::{
    AgentRegistration, DeliveryReceipt, Message, MessageMetadata, Subscription,
};
use crate::serialization::{self, DeserializeOptions, SerializeOptions};
use crate::validation::MessageValidator;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Errors surfaced by client operations
#[derive(Debug, Error)]
pub enum ClientError {
    /// The WebSocket connection could not be established
    #[error("connection failed: {source}")]
    Connect {
        /// Underlying transport error
        #[from]
        source: tokio_tungstenite::tungstenite::Error,
    },

    /// An HTTP request to the hub failed
    #[error("http request failed: {source}")]
    Http {
        /// Underlying HTTP error
        #[from]
        source: reqwest::Error,
    },

    /// The hub answered with an error envelope
    #[error("hub rejected the request: {message}")]
    Rejected {
        /// The hub's error message
        message: String,
    },

    /// The client configuration is unusable
    #[error("invalid client configuration: {message}")]
    Configuration {
        /// What is wrong
        message: String,
    },
}

/// What a handler asks the client to do after processing a message
#[derive(Debug, Clone, Default)]
pub struct HandlerOutcome {
    /// When set and the message carried `replyTo`, a `_response` message
    /// is published back to the sender
    pub response_payload: Option<Value>,
    /// Agents the message should be re-published to with fresh ids
    pub forward_to: Vec<String>,
}

impl HandlerOutcome {
    /// No response, no forwarding
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }
}

/// A typed message handler bound to one message type
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Processes an inbound message
    async fn handle(&self, message: Message) -> anyhow::Result<HandlerOutcome>;
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct HubClientConfig {
    /// Hub base URL, e.g. `http://127.0.0.1:8080`
    pub base_url: String,
    /// This agent's identity, sent as `X-Agent-ID`
    pub agent_id: String,
    /// HTTP request timeout
    pub request_timeout: Duration,
    /// How long a stream publish waits for its receipt frame
    pub receipt_timeout: Duration,
    /// Reconnect attempts before giving up
    pub max_reconnect_attempts: u32,
    /// Base backoff; attempt `n` waits `n * backoff`
    pub reconnect_backoff: Duration,
    /// Ping cadence keeping the hub's liveness tracking fed
    pub heartbeat_interval: Duration,
    /// Disables reconnection; stream errors surface directly
    pub test_mode: bool,
}

impl HubClientConfig {
    /// Defaults for the given hub and agent identity
    #[must_use]
    pub fn new(base_url: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            agent_id: agent_id.into(),
            request_timeout: Duration::from_secs(30),
            receipt_timeout: Duration::from_secs(30),
            max_reconnect_attempts: 5,
            reconnect_backoff: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            test_mode: false,
        }
    }
}

struct ClientInner {
    config: HubClientConfig,
    http: reqwest::Client,
    validator: MessageValidator,
    subscriptions: Mutex<Vec<Subscription>>,
    handlers: DashMap<String, Arc<dyn MessageHandler>>,
    pending_receipts: DashMap<String, oneshot::Sender<DeliveryReceipt>>,
    writer: Mutex<Option<mpsc::UnboundedSender<WsMessage>>>,
    connected: AtomicBool,
    events: EventBus<ClientEvent>,
    cancel: Mutex<Option<CancellationToken>>,
}

/// The hub client
pub struct HubClient {
    inner: Arc<ClientInner>,
}

#[derive(Debug, Deserialize)]
struct PublishResponse {
    #[serde(default)]
    receipts: Vec<DeliveryReceipt>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl HubClient {
    /// Creates a client; no connection is opened yet
    ///
    /// # Errors
    /// Fails when the HTTP client cannot be constructed.
    pub fn new(config: HubClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                http,
                validator: MessageValidator::new(),
                subscriptions: Mutex::new(Vec::new()),
                handlers: DashMap::new(),
                pending_receipts: DashMap::new(),
                writer: Mutex::new(None),
                connected: AtomicBool::new(false),
                events: EventBus::new(),
                cancel: Mutex::new(None),
            }),
        })
    }

    /// Subscribes to client observation events
    #[must_use]
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// Whether a stream is currently attached
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Opens the stream and starts the reconnection supervisor
    ///
    /// # Errors
    /// Fails when the initial connection cannot be established.
    pub async fn connect(&self) -> Result<(), ClientError> {
        if self.is_connected() {
            return Ok(());
        }
        let cancel = CancellationToken::new();
        {
            let mut guard = self.inner.cancel.lock().expect("cancel lock poisoned");
            if let Some(previous) = guard.take() {
                previous.cancel();
            }
            *guard = Some(cancel.clone());
        }

        let socket = open_socket(&self.inner).await?;
        let closed_rx = install_socket(Arc::clone(&self.inner), socket);
        tokio::spawn(supervise(Arc::clone(&self.inner), cancel, closed_rx));
        Ok(())
    }

    /// Closes the stream normally and stops the supervisor
    pub fn disconnect(&self) {
        if let Some(cancel) = self
            .inner
            .cancel
            .lock()
            .expect("cancel lock poisoned")
            .take()
        {
            cancel.cancel();
        }
        let writer = self
            .inner
            .writer
            .lock()
            .expect("writer lock poisoned")
            .take();
        if let Some(writer) = writer {
            let _ = writer.send(WsMessage::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "client disconnect".into(),
            })));
        }
        self.inner.connected.store(false, Ordering::SeqCst);
    }

    /// Registers this agent with the hub and caches its subscriptions
    ///
    /// # Errors
    /// Fails when the hub rejects the registration or HTTP fails.
    pub async fn register_agent(
        &self,
        registration: &AgentRegistration,
    ) -> Result<(), ClientError> {
        let url = format!("{}/agents/register", self.inner.config.base_url);
        let response = self.inner.http.post(url).json(registration).send().await?;
        check_response(response).await?;

        let mut cache = self
            .inner
            .subscriptions
            .lock()
            .expect("subscriptions lock poisoned");
        *cache = registration.subscriptions.clone();
        Ok(())
    }

    /// Subscribes to a topic, caching locally and rolling back on failure
    ///
    /// # Errors
    /// Fails when the hub rejects the subscription or HTTP fails.
    pub async fn subscribe(&self, subscription: Subscription) -> Result<(), ClientError> {
        let previous = {
            let mut cache = self
                .inner
                .subscriptions
                .lock()
                .expect("subscriptions lock poisoned");
            let previous = cache
                .iter()
                .position(|s| s.topic == subscription.topic)
                .map(|i| cache.remove(i));
            cache.push(subscription.clone());
            previous
        };

        let result = post_subscription(&self.inner, &subscription).await;
        if result.is_err() {
            let mut cache = self
                .inner
                .subscriptions
                .lock()
                .expect("subscriptions lock poisoned");
            cache.retain(|s| s.topic != subscription.topic);
            if let Some(previous) = previous {
                cache.push(previous);
            }
        }
        result
    }

    /// Unsubscribes from a topic, rolling the cache back on failure
    ///
    /// # Errors
    /// Fails when the hub rejects the removal or HTTP fails.
    pub async fn unsubscribe(&self, topic: &str) -> Result<(), ClientError> {
        let previous = {
            let mut cache = self
                .inner
                .subscriptions
                .lock()
                .expect("subscriptions lock poisoned");
            cache
                .iter()
                .position(|s| s.topic == topic)
                .map(|i| cache.remove(i))
        };

        let url = format!(
            "{}/subscriptions/{topic}?agentId={}",
            self.inner.config.base_url, self.inner.config.agent_id
        );
        let result = match self.inner.http.delete(url).send().await {
            Ok(response) => check_response(response).await,
            Err(source) => Err(ClientError::Http { source }),
        };

        if result.is_err() {
            if let Some(previous) = previous {
                self.inner
                    .subscriptions
                    .lock()
                    .expect("subscriptions lock poisoned")
                    .push(previous);
            }
        }
        result
    }

    /// Binds a handler for a message type
    pub fn register_message_handler(
        &self,
        message_type: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) {
        self.inner.handlers.insert(message_type.into(), handler);
    }

    /// Publishes a message, preferring the stream when attached
    ///
    /// Always returns a receipt: failures are synthesized as `failed`
    /// receipts and surfaced through the event channel.
    pub async fn publish(&self, message: Message) -> DeliveryReceipt {
        publish_inner(&self.inner, message).await
    }

    /// Currently cached subscriptions
    #[must_use]
    pub fn cached_subscriptions(&self) -> Vec<Subscription> {
        self.inner
            .subscriptions
            .lock()
            .expect("subscriptions lock poisoned")
            .clone()
    }
}

async fn publish_inner(inner: &Arc<ClientInner>, mut message: Message) -> DeliveryReceipt {
    if message.source_agent.is_empty() {
        message.source_agent = inner.config.agent_id.clone();
    }

    let report = inner.validator.validate(&message);
    if !report.is_valid {
        let error = format!("validation failed: {}", report.errors.join("; "));
        inner.events.emit(ClientEvent::PublishError {
            message_id: message.id.clone(),
            error: error.clone(),
        });
        return DeliveryReceipt::failed(&message.id, &inner.config.agent_id, error);
    }

    let writer = inner
        .writer
        .lock()
        .expect("writer lock poisoned")
        .clone();
    if let Some(writer) = writer {
        match publish_via_stream(inner, &writer, &message).await {
            Ok(receipt) => return receipt,
            Err(error) => {
                inner.events.emit(ClientEvent::PublishError {
                    message_id: message.id.clone(),
                    error: error.clone(),
                });
                return DeliveryReceipt::failed(&message.id, &inner.config.agent_id, error);
            }
        }
    }

    publish_via_http(inner, &message).await
}

async fn publish_via_stream(
    inner: &Arc<ClientInner>,
    writer: &mpsc::UnboundedSender<WsMessage>,
    message: &Message,
) -> Result<DeliveryReceipt, String> {
    let wire = serialization::serialize(message, SerializeOptions::default())
        .map_err(|e| e.to_string())?;

    let (tx, rx) = oneshot::channel();
    inner.pending_receipts.insert(message.id.clone(), tx);

    if writer.send(WsMessage::Text(wire)).is_err() {
        inner.pending_receipts.remove(&message.id);
        return Err("stream write failed".to_string());
    }

    match tokio::time::timeout(inner.config.receipt_timeout, rx).await {
        Ok(Ok(receipt)) => Ok(receipt),
        Ok(Err(_)) => {
            inner.pending_receipts.remove(&message.id);
            Err("stream closed before the receipt arrived".to_string())
        }
        Err(_) => {
            inner.pending_receipts.remove(&message.id);
            Err("publish timeout".to_string())
        }
    }
}

async fn publish_via_http(inner: &Arc<ClientInner>, message: &Message) -> DeliveryReceipt {
    let url = format!("{}/messages", inner.config.base_url);
    let result = async {
        let response = inner
            .http
            .post(url)
            .header("X-Agent-ID", &inner.config.agent_id)
            .json(message)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(read_error_message(response).await);
        }
        let body: PublishResponse = response.json().await.map_err(|e| e.to_string())?;
        Ok(body.receipts)
    }
    .await;

    match result {
        Ok(receipts) => receipts.into_iter().next().unwrap_or_else(|| {
            DeliveryReceipt::failed(&message.id, &inner.config.agent_id, "no receipts returned")
        }),
        Err(error) => {
            inner.events.emit(ClientEvent::PublishError {
                message_id: message.id.clone(),
                error: error.clone(),
            });
            DeliveryReceipt::failed(&message.id, &inner.config.agent_id, error)
        }
    }
}

async fn post_subscription(
    inner: &Arc<ClientInner>,
    subscription: &Subscription,
) -> Result<(), ClientError> {
    let url = format!("{}/subscriptions", inner.config.base_url);
    let body = serde_json::json!({
        "agentId": inner.config.agent_id,
        "subscription": subscription,
    });
    let response = inner.http.post(url).json(&body).send().await?;
    check_response(response).await
}

async fn check_response(response: reqwest::Response) -> Result<(), ClientError> {
    if response.status().is_success() {
        return Ok(());
    }
    Err(ClientError::Rejected {
        message: read_error_message(response).await,
    })
}

async fn read_error_message(response: reqwest::Response) -> String {
    let status = response.status();
    match response.json::<ErrorEnvelope>().await {
        Ok(ErrorEnvelope { error: Some(body) }) => body.message,
        _ => format!("http status {status}"),
    }
}

fn ws_url(base_url: &str) -> Result<String, ClientError> {
    if let Some(rest) = base_url.strip_prefix("http://") {
        Ok(format!("ws://{rest}/ws"))
    } else if let Some(rest) = base_url.strip_prefix("https://") {
        Ok(format!("wss://{rest}/ws"))
    } else {
        Err(ClientError::Configuration {
            message: format!("base_url must start with http:// or https://: {base_url}"),
        })
    }
}

async fn open_socket(inner: &Arc<ClientInner>) -> Result<WsStream, ClientError> {
    let url = ws_url(&inner.config.base_url)?;
    let mut request = url
        .into_client_request()
        .map_err(|source| ClientError::Connect { source })?;
    let identity = HeaderValue::from_str(&inner.config.agent_id).map_err(|_| {
        ClientError::Configuration {
            message: "agent_id is not a valid header value".to_string(),
        }
    })?;
    request.headers_mut().insert("X-Agent-ID", identity);

    let (socket, _response) = connect_async(request).await?;
    Ok(socket)
}

/// Spawns the socket IO task; the returned receiver resolves to true when
/// the stream closed normally
///
/// Receipt and error frames are handled inline; messages are handed to a
/// dedicated dispatch task so a handler that publishes (and awaits its own
/// receipt frame) can never stall the read loop.
fn install_socket(inner: Arc<ClientInner>, socket: WsStream) -> oneshot::Receiver<bool> {
    let (closed_tx, closed_rx) = oneshot::channel();
    let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<WsMessage>();
    *inner.writer.lock().expect("writer lock poisoned") = Some(writer_tx);
    inner.connected.store(true, Ordering::SeqCst);

    let (dispatch_tx, mut dispatch_rx) = mpsc::unbounded_channel::<Message>();
    let dispatch_inner = Arc::clone(&inner);
    tokio::spawn(async move {
        // One dispatcher per connection keeps handler invocations in
        // delivery order.
        while let Some(message) = dispatch_rx.recv().await {
            dispatch_message(&dispatch_inner, message).await;
        }
    });

    tokio::spawn(async move {
        let (mut sink, mut stream) = socket.split();
        let mut ping = tokio::time::interval(inner.config.heartbeat_interval);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; that initial ping is harmless.
        let mut normal = false;

        loop {
            tokio::select! {
                outbound = writer_rx.recv() => match outbound {
                    Some(frame) => {
                        let closing = matches!(frame, WsMessage::Close(_));
                        if sink.send(frame).await.is_err() {
                            break;
                        }
                        if closing {
                            normal = true;
                            break;
                        }
                    }
                    None => {
                        normal = true;
                        break;
                    }
                },
                inbound = stream.next() => match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        handle_frame(&inner, &text, &dispatch_tx);
                    }
                    Some(Ok(WsMessage::Ping(payload))) => {
                        let _ = sink.send(WsMessage::Pong(payload)).await;
                    }
                    Some(Ok(WsMessage::Pong(_))) => {}
                    Some(Ok(WsMessage::Close(frame))) => {
                        normal = frame.is_some_and(|f| f.code == CloseCode::Normal);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        debug!(error = %error, "stream read failed");
                        break;
                    }
                    None => break,
                },
                _ = ping.tick() => {
                    if sink.send(WsMessage::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }

        let _ = closed_tx.send(normal);
    });

    closed_rx
}

async fn supervise(
    inner: Arc<ClientInner>,
    cancel: CancellationToken,
    mut closed_rx: oneshot::Receiver<bool>,
) {
    loop {
        let normal = tokio::select! {
            () = cancel.cancelled() => break,
            closed = &mut closed_rx => closed.unwrap_or(true),
        };

        inner.connected.store(false, Ordering::SeqCst);
        *inner.writer.lock().expect("writer lock poisoned") = None;

        if normal || inner.config.test_mode {
            break;
        }

        match reconnect(&inner, &cancel).await {
            Some(receiver) => closed_rx = receiver,
            None => {
                inner.events.emit(ClientEvent::MaxReconnectAttemptsReached);
                break;
            }
        }
    }
}

async fn reconnect(
    inner: &Arc<ClientInner>,
    cancel: &CancellationToken,
) -> Option<oneshot::Receiver<bool>> {
    for attempt in 1..=inner.config.max_reconnect_attempts {
        inner.events.emit(ClientEvent::Reconnecting { attempt });
        let backoff = inner.config.reconnect_backoff * attempt;
        tokio::select! {
            () = cancel.cancelled() => return None,
            () = tokio::time::sleep(backoff) => {}
        }

        match open_socket(inner).await {
            Ok(socket) => {
                let receiver = install_socket(Arc::clone(inner), socket);
                let count = resubscribe(inner).await;
                inner.events.emit(ClientEvent::Resubscribed { count });
                return Some(receiver);
            }
            Err(error) => {
                warn!(attempt, error = %error, "reconnect attempt failed");
            }
        }
    }
    None
}

/// Re-issues every cached subscription after a reconnect
async fn resubscribe(inner: &Arc<ClientInner>) -> usize {
    let cached = inner
        .subscriptions
        .lock()
        .expect("subscriptions lock poisoned")
        .clone();
    let mut count = 0;
    for subscription in cached {
        match post_subscription(inner, &subscription).await {
            Ok(()) => count += 1,
            Err(error) => {
                warn!(topic = %subscription.topic, error = %error, "resubscribe failed");
            }
        }
    }
    count
}

/// Handles one inbound frame on the read loop; never awaits
fn handle_frame(inner: &Arc<ClientInner>, raw: &str, dispatch_tx: &mpsc::UnboundedSender<Message>) {
    // Hub control frames carry a top-level "type" tag.
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) {
        if let Some(frame_type) = map.get("type").and_then(Value::as_str) {
            match frame_type {
                "delivery_receipt" => {
                    let Some(message_id) = map.get("messageId").and_then(Value::as_str) else {
                        return;
                    };
                    let Some(receipt) = map
                        .get("receipt")
                        .and_then(|r| serde_json::from_value::<DeliveryReceipt>(r.clone()).ok())
                    else {
                        return;
                    };
                    if let Some((_, waiter)) = inner.pending_receipts.remove(message_id) {
                        let _ = waiter.send(receipt);
                    }
                }
                "error" => {
                    let message = map
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown hub error")
                        .to_string();
                    warn!(message = %message, "hub sent an error frame");
                    inner.events.emit(ClientEvent::ErrorFrame { message });
                }
                other => debug!(frame_type = %other, "ignoring unknown frame type"),
            }
            return;
        }
    }

    match serialization::deserialize(raw, DeserializeOptions { validate: true }) {
        Ok(message) => {
            let _ = dispatch_tx.send(message);
        }
        Err(error) => {
            warn!(error = %error, "dropping malformed inbound message");
        }
    }
}

/// Runs the registered handler for a delivered message, publishing a
/// response or forwarded copies when the handler asks for them
async fn dispatch_message(inner: &Arc<ClientInner>, message: Message) {
    let Some(handler) = inner
        .handlers
        .get(&message.message_type)
        .map(|h| Arc::clone(h.value()))
    else {
        debug!(message_type = %message.message_type, "no handler registered");
        return;
    };

    match handler.handle(message.clone()).await {
        Ok(outcome) => {
            if let (Some(payload), Some(reply_to)) =
                (outcome.response_payload, message.metadata.reply_to.clone())
            {
                let response = Message {
                    id: MessageId::generate().to_string(),
                    timestamp: Utc::now(),
                    source_agent: inner.config.agent_id.clone(),
                    target_agent: Some(reply_to),
                    topic: message.topic.clone(),
                    message_type: format!("{}_response", message.message_type),
                    priority: message.priority,
                    payload,
                    metadata: MessageMetadata {
                        correlation_id: message.metadata.correlation_id.clone(),
                        ttl: message.metadata.ttl,
                        retry_count: 0,
                        delivery_attempts: 0,
                        routing_key: None,
                        reply_to: None,
                    },
                };
                let _ = publish_inner(inner, response).await;
            }

            for target in outcome.forward_to {
                let mut copy = message.clone();
                copy.id = MessageId::generate().to_string();
                copy.timestamp = Utc::now();
                copy.source_agent = inner.config.agent_id.clone();
                copy.target_agent = Some(target);
                let _ = publish_inner(inner, copy).await;
            }
        }
        Err(error) => {
            inner.events.emit(ClientEvent::HandlerError {
                message_type: message.message_type.clone(),
                error: error.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_translates_scheme() {
        assert_eq!(
            ws_url("http://127.0.0.1:8080").unwrap(),
            "ws://127.0.0.1:8080/ws"
        );
        assert_eq!(
            ws_url("https://hub.example.com").unwrap(),
            "wss://hub.example.com/ws"
        );
        assert!(ws_url("ftp://nope").is_err());
    }

    #[test]
    fn handler_outcome_default_is_inert() {
        let outcome = HandlerOutcome::none();
        assert!(outcome.response_payload.is_none());
        assert!(outcome.forward_to.is_empty());
    }

    #[tokio::test]
    async fn publish_without_connection_synthesizes_failed_receipt() {
        // Nothing is listening on this port; the HTTP fallback fails fast.
        let mut config = HubClientConfig::new("http://127.0.0.1:1", "offline-agent");
        config.request_timeout = Duration::from_millis(300);
        let client = HubClient::new(config).unwrap();
        let mut events = client.subscribe_events();

        let message = Message {
            id: "m1".to_string(),
            timestamp: Utc::now(),
            source_agent: String::new(),
            target_agent: None,
            topic: "chat-support".to_string(),
            message_type: "chat.context_update".to_string(),
            priority: crate::messages::Priority::Normal,
            payload: serde_json::json!({}),
            metadata: MessageMetadata::new("c1"),
        };
        let receipt = client.publish(message).await;
        assert_eq!(receipt.status, crate::messages::DeliveryStatus::Failed);

        match events.recv().await.unwrap() {
            ClientEvent::PublishError { message_id, .. } => assert_eq!(message_id, "m1"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
