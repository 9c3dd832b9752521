//! Typed observation channels
//!
//! The hub exposes a small closed set of tagged events over a broadcast
//! channel instead of ad-hoc named emitters. Listeners subscribe with
//! [`EventBus::subscribe`]; a send with no listeners is not an error.

use crate::messages::DeliveryReceipt;
use tokio::sync::broadcast;

/// Default buffer for event channels
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Everything observable about the hub and router
#[derive(Debug, Clone)]
pub enum HubEvent {
    /// A message was appended to a recipient's queue
    MessageQueued {
        /// Recipient agent
        agent_id: String,
        /// Queued message id
        message_id: String,
    },
    /// A message was written to a recipient's live stream
    MessageDelivered {
        /// Recipient agent
        agent_id: String,
        /// Delivered message id
        message_id: String,
    },
    /// A transport write failed after routing accepted the message
    DeliveryError {
        /// Recipient agent
        agent_id: String,
        /// Message id that could not be written
        message_id: String,
        /// Failure description
        error: String,
    },
    /// An agent registered
    AgentRegistered {
        /// The agent
        agent_id: String,
    },
    /// An agent was explicitly unregistered
    AgentUnregistered {
        /// The agent
        agent_id: String,
    },
    /// An agent's stream closed but its registration remains
    AgentDisconnected {
        /// The agent
        agent_id: String,
    },
    /// The heartbeat monitor dropped an agent's attachment
    AgentEvicted {
        /// The agent
        agent_id: String,
    },
    /// A routing rule matched and applied its action
    RuleApplied {
        /// The rule
        rule_id: String,
        /// The message it acted on
        message_id: String,
    },
    /// A routing rule failed; the message continued unchanged
    RuleError {
        /// The rule
        rule_id: String,
        /// The message being evaluated
        message_id: String,
        /// Failure description
        error: String,
    },
    /// Routing produced a failure receipt
    RoutingError {
        /// The message
        message_id: String,
        /// Failure description
        error: String,
    },
    /// A queue hit its soft cap and dropped its oldest entry
    QueueOverflow {
        /// The agent whose queue overflowed
        agent_id: String,
        /// Id of the dropped message
        dropped_message_id: String,
    },
    /// A forwarded or duplicated copy was dispatched by a rule
    CopyDispatched {
        /// The originating rule
        rule_id: String,
        /// Receipt for the copy
        receipt: DeliveryReceipt,
    },
}

/// Client-side observation events
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A publish failed; a synthesized failure receipt was returned
    PublishError {
        /// The message that failed
        message_id: String,
        /// Failure description
        error: String,
    },
    /// The stream closed unexpectedly; a reconnect attempt is scheduled
    Reconnecting {
        /// 1-based attempt number
        attempt: u32,
    },
    /// Reconnection succeeded and cached subscriptions were re-issued
    Resubscribed {
        /// Number of subscriptions re-established
        count: usize,
    },
    /// All reconnect attempts were exhausted
    MaxReconnectAttemptsReached,
    /// The hub sent an error frame over the stream
    ErrorFrame {
        /// The hub's description
        message: String,
    },
    /// A message handler returned an error
    HandlerError {
        /// The message type that was being handled
        message_type: String,
        /// Failure description
        error: String,
    },
}

/// Broadcast wrapper shared by the hub and router
#[derive(Debug, Clone)]
pub struct EventBus<E: Clone> {
    sender: broadcast::Sender<E>,
}

impl<E: Clone> EventBus<E> {
    /// Creates a bus with the default buffer
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Subscribes a new listener
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    /// Emits an event; silently dropped when nobody listens
    pub fn emit(&self, event: E) {
        let _ = self.sender.send(event);
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}
