//! HTTP and WebSocket surface of the hub
//!
//! Every error response carries the uniform envelope
//! `{success: false, error: {code: "A2A_ERROR", message, timestamp}}`.
//! The `/ws` endpoint requires an `X-Agent-ID` header; connections without
//! it are closed with the policy-violation code.

use crate::error::HubError;
use crate::hub::connections::OutboundFrame;
use crate::hub::{CLOSE_POLICY_VIOLATION, Hub};
use crate::messages::{AgentRegistration, Message, Subscription, TopicDefinition};
use crate::serialization::{self, SerializeOptions};
use axum::{
    Json, Router,
    extract::{
        Path, Query, State, WebSocketUpgrade,
        rejection::JsonRejection,
        ws::{CloseFrame, Message as WsMessage, WebSocket},
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Uniform error body
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "success": false,
            "error": {
                "code": "A2A_ERROR",
                "message": self.message,
                "timestamp": Utc::now(),
            }
        });
        (self.status, Json(body)).into_response()
    }
}

impl From<HubError> for ApiError {
    fn from(error: HubError) -> Self {
        let status = match &error {
            HubError::Validation { .. }
            | HubError::Protocol { .. }
            | HubError::Serialization { .. } => StatusCode::BAD_REQUEST,
            HubError::State { message } => {
                if message.contains("not found")
                    || message.contains("not registered")
                    || message.contains("disabled")
                {
                    StatusCode::NOT_FOUND
                } else {
                    StatusCode::BAD_REQUEST
                }
            }
            HubError::Routing { .. } | HubError::Delivery { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: error.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(format!("invalid request body: {rejection}"))
    }
}

/// Builds the hub's axum application
pub fn create_app(hub: Arc<Hub>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/agents/register", post(register_agent))
        .route("/agents/{agent_id}", delete(unregister_agent))
        .route("/agents", get(list_agents))
        .route("/subscriptions", post(add_subscription))
        .route("/subscriptions/{topic}", delete(remove_subscription))
        .route("/messages", post(publish_message))
        .route("/topics", get(list_topics).post(create_topic))
        .route("/topics/{name}/definition", get(topic_definition))
        .route("/topics/{name}/messages", get(topic_messages))
        .route("/ws", get(ws_handler))
        .with_state(hub)
}

/// Binds the hub's configured port; port 0 lets the OS choose
///
/// # Errors
/// Returns an error when the address cannot be bound.
pub async fn start_server(hub: &Arc<Hub>) -> std::io::Result<(TcpListener, SocketAddr)> {
    let addr = SocketAddr::from(([0, 0, 0, 0], hub.config().port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;
    Ok((listener, actual_addr))
}

/// Serves the application until the listener fails
///
/// # Errors
/// Returns an error when the server fails during operation.
pub async fn serve(listener: TcpListener, router: Router) -> std::io::Result<()> {
    axum::serve(listener, router)
        .await
        .map_err(std::io::Error::other)
}

/// Serves the application until the token is cancelled
///
/// # Errors
/// Returns an error when the server fails during operation.
pub async fn serve_with_graceful_shutdown(
    listener: TcpListener,
    router: Router,
    shutdown_token: CancellationToken,
) -> std::io::Result<()> {
    let shutdown_signal = async move {
        shutdown_token.cancelled().await;
    };
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(std::io::Error::other)
}

async fn health(State(hub): State<Arc<Hub>>) -> impl IntoResponse {
    Json(hub.health())
}

async fn stats(State(hub): State<Arc<Hub>>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(hub.stats()?))
}

async fn register_agent(
    State(hub): State<Arc<Hub>>,
    body: Result<Json<AgentRegistration>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(registration) = body?;
    hub.register_agent(&registration)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({"success": true, "agentId": registration.agent_id})),
    ))
}

async fn unregister_agent(
    State(hub): State<Arc<Hub>>,
    Path(agent_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    hub.unregister_agent(&agent_id)?;
    Ok(Json(json!({"success": true})))
}

async fn list_agents(State(hub): State<Arc<Hub>>) -> impl IntoResponse {
    Json(hub.agent_summaries())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionRequest {
    agent_id: String,
    subscription: Subscription,
}

async fn add_subscription(
    State(hub): State<Arc<Hub>>,
    body: Result<Json<SubscriptionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = body?;
    hub.add_subscription(&request.agent_id, &request.subscription)?;
    Ok(Json(json!({"success": true})))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentQuery {
    agent_id: String,
}

async fn remove_subscription(
    State(hub): State<Arc<Hub>>,
    Path(topic): Path<String>,
    Query(query): Query<AgentQuery>,
) -> Result<impl IntoResponse, ApiError> {
    hub.remove_subscription(&query.agent_id, &topic)?;
    Ok(Json(json!({"success": true})))
}

async fn publish_message(
    State(hub): State<Arc<Hub>>,
    headers: HeaderMap,
    body: Result<Json<Message>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(message) = body?;
    let identity = headers
        .get("x-agent-id")
        .and_then(|value| value.to_str().ok());
    let receipts = hub.publish(message, identity).await?;
    Ok(Json(json!({"success": true, "receipts": receipts})))
}

async fn list_topics(State(hub): State<Arc<Hub>>) -> impl IntoResponse {
    Json(hub.history().definitions())
}

async fn create_topic(
    State(hub): State<Arc<Hub>>,
    body: Result<Json<TopicDefinition>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(definition) = body?;
    hub.history().create_topic(definition)?;
    Ok((StatusCode::CREATED, Json(json!({"success": true}))))
}

async fn topic_definition(
    State(hub): State<Arc<Hub>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    hub.history()
        .definition(&name)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("topic {name} not found")))
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn topic_messages(
    State(hub): State<Arc<Hub>>,
    Path(name): Path<String>,
    Query(page): Query<PageQuery>,
) -> impl IntoResponse {
    let limit = page.limit.unwrap_or(100);
    let offset = page.offset.unwrap_or(0);
    let (messages, total) = hub.history().messages(&name, limit, offset);
    Json(json!({
        "topic": name,
        "messages": messages,
        "total": total,
        "limit": limit,
        "offset": offset,
    }))
}

async fn ws_handler(
    State(hub): State<Arc<Hub>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let agent_id = headers
        .get("x-agent-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    ws.on_upgrade(move |socket| handle_socket(hub, socket, agent_id))
}

async fn handle_socket(hub: Arc<Hub>, mut socket: WebSocket, agent_id: Option<String>) {
    let Some(agent_id) = agent_id else {
        let _ = socket
            .send(WsMessage::Close(Some(CloseFrame {
                code: CLOSE_POLICY_VIOLATION,
                reason: "missing X-Agent-ID header".into(),
            })))
            .await;
        return;
    };

    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<OutboundFrame>();
    let epoch = hub.attach_stream(&agent_id, frame_tx);

    let (mut sink, mut stream) = socket.split();

    let writer_agent = agent_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            match frame {
                OutboundFrame::Close { code, reason } => {
                    let _ = sink
                        .send(WsMessage::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
                frame => {
                    let Some(text) = frame_to_text(frame) else {
                        continue;
                    };
                    if sink.send(WsMessage::Text(text.into())).await.is_err() {
                        debug!(agent_id = %writer_agent, "stream write failed");
                        break;
                    }
                }
            }
        }
    });

    let mut protocol_errors: u32 = 0;
    while let Some(incoming) = stream.next().await {
        let Ok(ws_message) = incoming else {
            break;
        };
        match ws_message {
            WsMessage::Text(text) => {
                let response = hub.handle_stream_frame(&agent_id, text.as_str()).await;
                match response {
                    Some(frame @ OutboundFrame::Error { .. }) => {
                        protocol_errors += 1;
                        hub_send(&hub, &agent_id, frame);
                        if protocol_errors > Hub::max_protocol_errors() {
                            warn!(agent_id = %agent_id, "persistent protocol offender; disconnecting");
                            hub.disconnect_agent(
                                &agent_id,
                                CLOSE_POLICY_VIOLATION,
                                "too many protocol errors",
                            );
                            break;
                        }
                    }
                    Some(frame) => {
                        protocol_errors = 0;
                        hub_send(&hub, &agent_id, frame);
                    }
                    None => {}
                }
            }
            WsMessage::Binary(bytes) => match std::str::from_utf8(&bytes) {
                Ok(text) => {
                    if let Some(frame) = hub.handle_stream_frame(&agent_id, text).await {
                        hub_send(&hub, &agent_id, frame);
                    }
                }
                Err(_) => {
                    protocol_errors += 1;
                    hub_send(
                        &hub,
                        &agent_id,
                        OutboundFrame::Error {
                            message: "binary frames must be UTF-8".to_string(),
                        },
                    );
                }
            },
            WsMessage::Ping(_) | WsMessage::Pong(_) => hub.heartbeat(&agent_id),
            WsMessage::Close(_) => break,
        }
    }

    hub.detach_stream(&agent_id, epoch);
    // Dropping the table's sender ends the writer; give a pending close
    // frame a moment to go out.
    let _ = tokio::time::timeout(std::time::Duration::from_secs(1), writer).await;
}

fn hub_send(hub: &Arc<Hub>, agent_id: &str, frame: OutboundFrame) {
    if !hub.send_frame(agent_id, frame) {
        debug!(agent_id = %agent_id, "no live stream for response frame");
    }
}

fn frame_to_text(frame: OutboundFrame) -> Option<String> {
    match frame {
        OutboundFrame::Message(message) => {
            serialization::serialize(&message, SerializeOptions::default()).ok()
        }
        OutboundFrame::Receipt {
            message_id,
            receipt,
        } => Some(
            json!({
                "type": "delivery_receipt",
                "messageId": message_id,
                "receipt": receipt,
            })
            .to_string(),
        ),
        OutboundFrame::Error { message } => Some(
            json!({
                "type": "error",
                "message": message,
                "timestamp": Utc::now(),
            })
            .to_string(),
        ),
        OutboundFrame::Close { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::messages::DeliveryReceipt;

    #[test]
    fn receipt_frame_wire_shape() {
        let text = frame_to_text(OutboundFrame::Receipt {
            message_id: "m1".to_string(),
            receipt: DeliveryReceipt::delivered("m1", "chatbot-001"),
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "delivery_receipt");
        assert_eq!(value["messageId"], "m1");
        assert_eq!(value["receipt"]["status"], "delivered");
        assert_eq!(value["receipt"]["targetAgent"], "chatbot-001");
    }

    #[test]
    fn error_frame_wire_shape() {
        let text = frame_to_text(OutboundFrame::Error {
            message: "bad frame".to_string(),
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["message"], "bad frame");
        assert!(value.get("timestamp").is_some());
    }

    #[tokio::test]
    async fn app_builds_with_every_route() {
        let hub = Hub::new(HubConfig::testing());
        let _app = create_app(hub);
    }
}
