//! The hub: router + transport + history + timers
//!
//! [`Hub`] composes the message router with the connected-agent table, the
//! topic history store, and the background heartbeat/cleanup tasks. The
//! HTTP and WebSocket surfaces in [`server`] are thin adapters over the
//! methods here.

pub mod connections;
pub mod history;
pub mod server;

use crate::config::HubConfig;
use crate::error::HubError;
use crate::events::{EventBus, HubEvent};
use crate::messages::{
    AgentRegistration, DeliveryReceipt, DeliveryStatus, Message, Subscription, parse_subscription,
};
use crate::router::{HUB_RECIPIENT, MessageRouter, RouterStats};
use crate::serialization::{self, DeserializeOptions};
use crate::validation::MessageValidator;
use chrono::{DateTime, Utc};
use connections::{AgentSummary, ConnectionTable, FrameSender, OutboundFrame};
use history::TopicHistoryStore;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Close code for a normal, client-initiated close
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code sent on hub shutdown and heartbeat eviction
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Close code for policy violations (missing agent id)
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Consecutive protocol errors tolerated before a stream is dropped
const MAX_PROTOCOL_ERRORS: u32 = 8;

/// Total queued messages beyond which health reports degraded
const DEGRADED_QUEUE_THRESHOLD: usize = 1_000;

/// Response body of `GET /health`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `healthy` or `degraded`
    pub status: String,
    /// Now
    pub timestamp: DateTime<Utc>,
    /// Agents with a live stream
    pub connected_agents: usize,
    /// Known topics
    pub topics: usize,
    /// Seconds since the hub started
    pub uptime: u64,
}

/// Response body of `GET /stats`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStats {
    /// Router counters
    #[serde(flatten)]
    pub router: RouterStats,
    /// Agents with a live stream
    pub connected_agents: usize,
    /// Known topic definitions
    pub topics: usize,
    /// Seconds since the hub started
    pub uptime_seconds: u64,
}

/// The A2A communication hub
pub struct Hub {
    config: HubConfig,
    router: Arc<MessageRouter>,
    history: TopicHistoryStore,
    connections: Arc<ConnectionTable>,
    events: EventBus<HubEvent>,
    validator: MessageValidator,
    started_at: Instant,
    shutdown: CancellationToken,
}

impl Hub {
    /// Builds a hub from configuration
    #[must_use]
    pub fn new(config: HubConfig) -> Arc<Self> {
        let events: EventBus<HubEvent> = EventBus::new();
        let router = Arc::new(MessageRouter::new(
            config.queue_soft_cap.as_usize(),
            events.clone(),
        ));
        let connections = Arc::new(ConnectionTable::new());
        let history =
            TopicHistoryStore::new(config.enable_persistence, config.message_retention.as_u64());

        // Queued messages flush to the live stream as soon as they land.
        let hook_router = Arc::downgrade(&router);
        let hook_connections = Arc::clone(&connections);
        router.set_delivery_hook(Arc::new(move |agent_id| {
            if let Some(router) = hook_router.upgrade() {
                flush_to_stream(&router, &hook_connections, agent_id);
            }
        }));

        Arc::new(Self {
            config,
            router,
            history,
            connections,
            events,
            validator: MessageValidator::new(),
            started_at: Instant::now(),
            shutdown: CancellationToken::new(),
        })
    }

    /// The hub's configuration
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// The underlying router
    #[must_use]
    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    /// Subscribes to the hub's observation events
    #[must_use]
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }

    /// Registers an agent, enforcing the connection cap
    ///
    /// # Errors
    /// Fails with a validation error for malformed registrations and a
    /// state error when the hub is at capacity.
    pub fn register_agent(&self, registration: &AgentRegistration) -> Result<(), HubError> {
        let validated = registration
            .parse()
            .map_err(|e| HubError::validation(vec![e]))?;

        let agent_id = validated.agent_id.to_string();
        if !self.router.is_registered(&agent_id)
            && self.connections.len() >= self.config.max_connections.as_usize()
        {
            return Err(HubError::state(format!(
                "hub is at capacity ({} agents)",
                self.config.max_connections.as_usize()
            )));
        }

        self.router.register_agent(&validated);
        self.connections.ensure_entry(&agent_id);
        info!(agent_id = %agent_id, "agent registered");
        Ok(())
    }

    /// Unregisters an agent, closing its stream and dropping its queue
    ///
    /// # Errors
    /// Fails with a state error when the agent is not registered.
    pub fn unregister_agent(&self, agent_id: &str) -> Result<(), HubError> {
        if !self.router.is_registered(agent_id) {
            return Err(HubError::state(format!("agent {agent_id} not found")));
        }
        if let Some(sender) = self.connections.remove(agent_id) {
            let _ = sender.send(OutboundFrame::Close {
                code: CLOSE_NORMAL,
                reason: "unregistered".to_string(),
            });
        }
        self.router.unregister_agent(agent_id);
        info!(agent_id = %agent_id, "agent unregistered");
        Ok(())
    }

    /// Adds a subscription for a registered agent
    ///
    /// # Errors
    /// Fails with a validation error for malformed subscriptions and a
    /// state error for unknown agents.
    pub fn add_subscription(
        &self,
        agent_id: &str,
        subscription: &Subscription,
    ) -> Result<(), HubError> {
        let validated =
            parse_subscription(subscription).map_err(|e| HubError::validation(vec![e]))?;
        self.router
            .add_subscription(agent_id, &validated)
            .map_err(HubError::state)
    }

    /// Removes an agent's subscription to a topic
    ///
    /// # Errors
    /// Fails with a state error when the agent is not registered.
    pub fn remove_subscription(&self, agent_id: &str, topic: &str) -> Result<(), HubError> {
        if !self.router.is_registered(agent_id) {
            return Err(HubError::state(format!("agent {agent_id} not found")));
        }
        self.router.remove_subscription(agent_id, topic);
        Ok(())
    }

    /// The shared publish pipeline: stamp, validate, persist, route
    ///
    /// `transport_identity` overrides any `sourceAgent` claim when the
    /// message arrived over an identified transport.
    ///
    /// # Errors
    /// Fails with a validation error; routing failures become receipts.
    pub async fn publish(
        &self,
        mut message: Message,
        transport_identity: Option<&str>,
    ) -> Result<Vec<DeliveryReceipt>, HubError> {
        if let Some(identity) = transport_identity {
            message.source_agent = identity.to_string();
        }

        let report = self.validator.validate(&message);
        if !report.is_valid {
            return Err(HubError::validation(report.errors));
        }

        self.history.append(&message);
        Ok(self.router.route_message(message).await)
    }

    /// Handles one inbound stream frame from an identified agent
    ///
    /// Returns the frame to send back, if any. Control frames such as
    /// heartbeats produce no response.
    pub async fn handle_stream_frame(&self, agent_id: &str, raw: &str) -> Option<OutboundFrame> {
        self.connections.heartbeat(agent_id);

        // Control frames carry a top-level "type" tag.
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) {
            if let Some(frame_type) = map.get("type").and_then(Value::as_str) {
                return match frame_type {
                    "heartbeat" => None,
                    other => Some(OutboundFrame::Error {
                        message: format!("unknown frame type {other:?}"),
                    }),
                };
            }
        }

        let message = match serialization::deserialize(raw, DeserializeOptions::default()) {
            Ok(message) => message,
            Err(error) => {
                return Some(OutboundFrame::Error {
                    message: format!("malformed message frame: {error}"),
                });
            }
        };

        let message_id = message.id.clone();
        match self.publish(message, Some(agent_id)).await {
            Ok(receipts) => {
                let receipt = receipts
                    .into_iter()
                    .next()
                    .filter(|r| !(r.status == DeliveryStatus::Failed && r.target_agent == HUB_RECIPIENT))
                    .unwrap_or_else(|| DeliveryReceipt::delivered(&message_id, HUB_RECIPIENT));
                Some(OutboundFrame::Receipt {
                    message_id,
                    receipt,
                })
            }
            Err(HubError::Validation { errors }) => Some(OutboundFrame::Error {
                message: format!("validation failed: {}", errors.join("; ")),
            }),
            Err(error) => Some(OutboundFrame::Error {
                message: error.to_string(),
            }),
        }
    }

    /// Attaches a stream for an agent, superseding any previous one and
    /// flushing queued messages in FIFO order
    pub fn attach_stream(&self, agent_id: &str, sender: FrameSender) -> u64 {
        let (epoch, superseded) = self.connections.attach(agent_id, sender);
        if let Some(old) = superseded {
            let _ = old.send(OutboundFrame::Close {
                code: CLOSE_NORMAL,
                reason: "superseded by a new stream".to_string(),
            });
        }
        info!(agent_id = %agent_id, epoch, "stream attached");
        flush_to_stream(&self.router, &self.connections, agent_id);
        epoch
    }

    /// Detaches a stream if `epoch` still owns it, keeping the registration
    pub fn detach_stream(&self, agent_id: &str, epoch: u64) {
        if self.connections.detach(agent_id, epoch) {
            info!(agent_id = %agent_id, "stream detached");
            self.events.emit(HubEvent::AgentDisconnected {
                agent_id: agent_id.to_string(),
            });
        }
    }

    /// Refreshes an agent's liveness timestamp
    pub fn heartbeat(&self, agent_id: &str) {
        self.connections.heartbeat(agent_id);
    }

    /// Closes an agent's stream without touching its registration or queue
    ///
    /// Pending messages keep queueing until the agent reattaches or
    /// unregisters.
    pub fn disconnect_agent(&self, agent_id: &str, code: u16, reason: &str) {
        if self.close_stream(agent_id, code, reason) {
            self.events.emit(HubEvent::AgentDisconnected {
                agent_id: agent_id.to_string(),
            });
        }
    }

    /// Drops an agent's attachment for missed heartbeats
    ///
    /// Identical to [`Self::disconnect_agent`] except that the eviction is
    /// hub-initiated and observable as `AgentEvicted`. The registration and
    /// queue survive.
    pub fn evict_agent(&self, agent_id: &str) {
        if self.close_stream(agent_id, CLOSE_GOING_AWAY, "heartbeat timeout") {
            self.events.emit(HubEvent::AgentEvicted {
                agent_id: agent_id.to_string(),
            });
        }
    }

    /// Tells the agent's writer task to close; true when a stream was live
    fn close_stream(&self, agent_id: &str, code: u16, reason: &str) -> bool {
        let Some(sender) = self.connections.force_detach(agent_id) else {
            return false;
        };
        let _ = sender.send(OutboundFrame::Close {
            code,
            reason: reason.to_string(),
        });
        true
    }

    /// Whether the agent currently has a live stream
    #[must_use]
    pub fn is_attached(&self, agent_id: &str) -> bool {
        self.connections.is_attached(agent_id)
    }

    /// Pushes a frame to an agent's live stream; false when detached
    pub fn send_frame(&self, agent_id: &str, frame: OutboundFrame) -> bool {
        self.connections.send(agent_id, frame)
    }

    /// The topic history store
    #[must_use]
    pub fn history(&self) -> &TopicHistoryStore {
        &self.history
    }

    /// Summary rows for `GET /agents`
    #[must_use]
    pub fn agent_summaries(&self) -> Vec<AgentSummary> {
        self.connections
            .summaries(|agent_id| self.router.queue_depth(agent_id))
    }

    /// Health report; degraded when queues back up
    #[must_use]
    pub fn health(&self) -> HealthResponse {
        let queued = self.router.total_queued();
        let status = if queued > DEGRADED_QUEUE_THRESHOLD {
            "degraded"
        } else {
            "healthy"
        };
        HealthResponse {
            status: status.to_string(),
            timestamp: Utc::now(),
            connected_agents: self.connections.attached_count(),
            topics: self.history.topic_count(),
            uptime: self.started_at.elapsed().as_secs(),
        }
    }

    /// Counter snapshot for `GET /stats`
    ///
    /// # Errors
    /// Fails with a state error when metrics are disabled.
    pub fn stats(&self) -> Result<HubStats, HubError> {
        if !self.config.enable_metrics {
            return Err(HubError::state("metrics are disabled"));
        }
        Ok(HubStats {
            router: self.router.stats(),
            connected_agents: self.connections.attached_count(),
            topics: self.history.topic_count(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
        })
    }

    /// Spawns the heartbeat monitor and the periodic cleanup task
    pub fn start_background_tasks(self: &Arc<Self>) {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let period = hub.config.heartbeat_interval.as_duration();
            let max_idle = period * 2;
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = hub.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        for agent_id in hub.connections.stale_agents(max_idle) {
                            warn!(agent_id = %agent_id, "heartbeat timeout; dropping attachment");
                            hub.evict_agent(&agent_id);
                        }
                    }
                }
            }
        });

        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let period = std::time::Duration::from_millis(hub.config.cleanup_interval_ms);
            let receipt_ttl = std::time::Duration::from_millis(hub.config.receipt_ttl_ms);
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = hub.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let receipts = hub.router.prune_receipts(receipt_ttl);
                        let messages = hub.history.prune_all();
                        if receipts > 0 || messages > 0 {
                            info!(receipts, messages, "cleanup pass evicted stale entries");
                        }
                    }
                }
            }
        });
    }

    /// Cancels background tasks and closes every live stream
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        for sender in self.connections.all_senders() {
            let _ = sender.send(OutboundFrame::Close {
                code: CLOSE_GOING_AWAY,
                reason: "server shutdown".to_string(),
            });
        }
        info!("hub shut down");
    }

    /// Token observed by the serve loop for graceful shutdown
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub(crate) fn max_protocol_errors() -> u32 {
        MAX_PROTOCOL_ERRORS
    }
}

/// Drains an agent's queue into its live stream, if it has one
fn flush_to_stream(router: &MessageRouter, connections: &ConnectionTable, agent_id: &str) {
    let Some(sender) = connections.sender(agent_id) else {
        return;
    };
    router.flush_queue(agent_id, |message| {
        sender
            .send(OutboundFrame::Message(Box::new(message)))
            .is_ok()
    });
}
