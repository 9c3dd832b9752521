//! Wire data model for the A2A hub
//!
//! Everything here serializes to the canonical camelCase JSON the hub and
//! its clients exchange. These structs deliberately carry plain strings so
//! the validator can report every violation of an inbound message at once;
//! [`AgentRegistration::parse`] is the boundary where strings become domain
//! types.

use crate::domain_types::{AgentId, HeartbeatIntervalMs, MessageTypeName, TopicName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background traffic
    Low,
    /// Default priority
    #[default]
    Normal,
    /// Latency-sensitive traffic
    High,
}

/// Metadata carried by every message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    /// Correlates a message with its responses
    pub correlation_id: String,
    /// Time-to-live in milliseconds
    pub ttl: u64,
    /// Publisher-managed retry counter
    #[serde(default)]
    pub retry_count: u32,
    /// Hub-observed delivery attempts
    #[serde(default)]
    pub delivery_attempts: u32,
    /// Opaque routing hint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing_key: Option<String>,
    /// Agent id a response should be addressed to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl MessageMetadata {
    /// Creates metadata with the given correlation id and a 60 second TTL
    #[must_use]
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            ttl: 60_000,
            retry_count: 0,
            delivery_attempts: 0,
            routing_key: None,
            reply_to: None,
        }
    }
}

/// The unit of transport between agents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message identifier
    pub id: String,
    /// Publish time, ISO-8601 on the wire
    pub timestamp: DateTime<Utc>,
    /// The publisher's agent id
    pub source_agent: String,
    /// Explicit unicast recipient; overrides topic fan-out when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_agent: Option<String>,
    /// Routing channel
    pub topic: String,
    /// `category.action` type
    pub message_type: String,
    /// Priority
    #[serde(default)]
    pub priority: Priority,
    /// Arbitrary structured payload
    pub payload: Value,
    /// Message metadata
    pub metadata: MessageMetadata,
}

/// Delivery outcome for a single recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Accepted for delivery to the recipient
    Delivered,
    /// Routing or delivery failed
    Failed,
    /// A filter rule terminated routing
    Filtered,
}

/// The hub's per-recipient acknowledgement of a publish
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    /// Id of the acknowledged message
    pub message_id: String,
    /// When the receipt was issued
    pub timestamp: DateTime<Utc>,
    /// Outcome
    pub status: DeliveryStatus,
    /// The recipient this receipt is for
    pub target_agent: String,
    /// Failure detail when status is `failed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeliveryReceipt {
    /// Builds a `delivered` receipt
    #[must_use]
    pub fn delivered(message_id: impl Into<String>, target_agent: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            timestamp: Utc::now(),
            status: DeliveryStatus::Delivered,
            target_agent: target_agent.into(),
            error: None,
        }
    }

    /// Builds a `failed` receipt with an error description
    #[must_use]
    pub fn failed(
        message_id: impl Into<String>,
        target_agent: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            timestamp: Utc::now(),
            status: DeliveryStatus::Failed,
            target_agent: target_agent.into(),
            error: Some(error.into()),
        }
    }

    /// Builds a `filtered` receipt
    #[must_use]
    pub fn filtered(message_id: impl Into<String>, target_agent: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            timestamp: Utc::now(),
            status: DeliveryStatus::Filtered,
            target_agent: target_agent.into(),
            error: None,
        }
    }
}

/// An agent's declared interest in a topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// Topic the agent subscribes to
    pub topic: String,
    /// Message types of interest; empty means every type on the topic
    #[serde(default)]
    pub message_types: Vec<String>,
    /// Priority hint for the subscriber's handler
    #[serde(default)]
    pub priority: Priority,
    /// Tag naming the handler on the agent side
    #[serde(default)]
    pub handler_tag: String,
}

impl Subscription {
    /// Subscription to every message type on a topic
    #[must_use]
    pub fn all_types(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            message_types: Vec::new(),
            priority: Priority::Normal,
            handler_tag: String::new(),
        }
    }

    /// Returns true when this subscription admits the given message type
    #[must_use]
    pub fn admits(&self, message_type: &str) -> bool {
        self.message_types.is_empty() || self.message_types.iter().any(|t| t == message_type)
    }
}

/// Registration request an agent submits to the hub
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRegistration {
    /// Agent identifier
    pub agent_id: String,
    /// Free-form agent classification (e.g. `chatbot`)
    pub agent_type: String,
    /// Capabilities the agent advertises
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Subscriptions declared at registration time
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
    /// Callback endpoint, informational only
    #[serde(default)]
    pub endpoint: String,
    /// Heartbeat interval in milliseconds
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_interval: u64,
}

fn default_heartbeat_ms() -> u64 {
    30_000
}

impl AgentRegistration {
    /// Parses the registration into validated domain types
    ///
    /// # Errors
    /// Returns a description of the first field that fails validation.
    pub fn parse(&self) -> Result<ValidatedRegistration, String> {
        let agent_id = AgentId::try_new(self.agent_id.clone())
            .map_err(|e| format!("invalid agentId: {e}"))?;

        let heartbeat_interval = HeartbeatIntervalMs::try_new(self.heartbeat_interval)
            .map_err(|e| format!("invalid heartbeatInterval: {e}"))?;

        let mut subscriptions = Vec::with_capacity(self.subscriptions.len());
        for sub in &self.subscriptions {
            subscriptions.push(parse_subscription(sub)?);
        }

        Ok(ValidatedRegistration {
            agent_id,
            heartbeat_interval,
            subscriptions,
            registration: self.clone(),
        })
    }
}

/// Parses one subscription's topic and message types
///
/// # Errors
/// Returns a description of the offending field.
pub fn parse_subscription(sub: &Subscription) -> Result<ValidatedSubscription, String> {
    let topic =
        TopicName::try_new(sub.topic.clone()).map_err(|e| format!("invalid topic: {e}"))?;
    for message_type in &sub.message_types {
        MessageTypeName::try_new(message_type.clone())
            .map_err(|e| format!("invalid messageType {message_type:?}: {e}"))?;
    }
    Ok(ValidatedSubscription {
        topic,
        subscription: sub.clone(),
    })
}

/// A registration whose identifiers passed domain validation
#[derive(Debug, Clone)]
pub struct ValidatedRegistration {
    /// Validated agent id
    pub agent_id: AgentId,
    /// Validated heartbeat interval
    pub heartbeat_interval: HeartbeatIntervalMs,
    /// Validated subscriptions
    pub subscriptions: Vec<ValidatedSubscription>,
    /// The original wire registration
    pub registration: AgentRegistration,
}

/// A subscription whose topic passed domain validation
#[derive(Debug, Clone)]
pub struct ValidatedSubscription {
    /// Validated topic name
    pub topic: TopicName,
    /// The original wire subscription
    pub subscription: Subscription,
}

/// Retention policy for a topic's history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionPolicy {
    /// Hard bound on retained message count
    pub max_messages: usize,
    /// Maximum message age in milliseconds
    pub max_age: u64,
    /// Whether history entries are stored compressed
    pub compression_enabled: bool,
}

/// A named channel with retention and a declared set of message types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicDefinition {
    /// Topic name
    pub name: String,
    /// Human description
    #[serde(default)]
    pub description: String,
    /// Message types published on this topic
    #[serde(default)]
    pub message_types: Vec<String>,
    /// Retention policy
    pub retention_policy: RetentionPolicy,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> Message {
        Message {
            id: "m1".to_string(),
            timestamp: Utc::now(),
            source_agent: "svc".to_string(),
            target_agent: None,
            topic: "chat-support".to_string(),
            message_type: "chat.context_update".to_string(),
            priority: Priority::Normal,
            payload: serde_json::json!({"x": 1}),
            metadata: MessageMetadata::new("c1"),
        }
    }

    #[test]
    fn message_serializes_to_camel_case() {
        let json = serde_json::to_value(sample_message()).unwrap();
        assert!(json.get("sourceAgent").is_some());
        assert!(json.get("messageType").is_some());
        assert_eq!(json["priority"], "normal");
        assert_eq!(json["metadata"]["correlationId"], "c1");
        // Absent optionals are omitted entirely
        assert!(json.get("targetAgent").is_none());
        assert!(json["metadata"].get("replyTo").is_none());
    }

    #[test]
    fn subscription_with_empty_types_admits_everything() {
        let sub = Subscription::all_types("chat-support");
        assert!(sub.admits("chat.context_update"));
        assert!(sub.admits("chat.escalation"));

        let narrow = Subscription {
            message_types: vec!["chat.escalation".to_string()],
            ..Subscription::all_types("chat-support")
        };
        assert!(narrow.admits("chat.escalation"));
        assert!(!narrow.admits("chat.context_update"));
    }

    #[test]
    fn registration_parse_rejects_bad_fields() {
        let reg = AgentRegistration {
            agent_id: "chatbot-001".to_string(),
            agent_type: "chatbot".to_string(),
            capabilities: vec![],
            subscriptions: vec![Subscription::all_types("chat-support")],
            endpoint: String::new(),
            heartbeat_interval: 30_000,
        };
        assert!(reg.parse().is_ok());

        let bad_id = AgentRegistration {
            agent_id: "-bad".to_string(),
            ..reg.clone()
        };
        assert!(bad_id.parse().is_err());

        let bad_topic = AgentRegistration {
            subscriptions: vec![Subscription::all_types("Bad--Topic")],
            ..reg
        };
        assert!(bad_topic.parse().is_err());
    }

    #[test]
    fn receipt_constructors_set_status() {
        let r = DeliveryReceipt::delivered("m1", "a1");
        assert_eq!(r.status, DeliveryStatus::Delivered);
        assert!(r.error.is_none());
        let f = DeliveryReceipt::failed("m1", "hub", "no recipients");
        assert_eq!(f.status, DeliveryStatus::Failed);
        assert_eq!(f.error.as_deref(), Some("no recipients"));
    }
}
