//! Message validation and payload sanitization
//!
//! The validator never mutates its input and reports every violation it
//! finds rather than stopping at the first. Pattern checks reuse the
//! domain-type parsers so the wire boundary and the internal types can
//! never disagree about what a valid identifier looks like.

use crate::domain_types::{
    AgentId, DeliveryAttempts, MessageTypeName, RetryCount, TopicName, TtlMs,
};
use crate::messages::Message;
use chrono::{Duration, Utc};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

/// Maximum serialized payload size in bytes (1 MiB)
pub const MAX_PAYLOAD_BYTES: usize = 1_048_576;

/// How far in the past a message timestamp may lie
const MAX_CLOCK_SKEW_PAST_MS: i64 = 3_600_000;

/// How far in the future a message timestamp may lie
const MAX_CLOCK_SKEW_FUTURE_MS: i64 = 300_000;

static HTML_TAG_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

/// Outcome of validating a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    /// True when no violations were found
    pub is_valid: bool,
    /// Every violation, in field order
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }
}

/// Structural and semantic message validation
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageValidator;

impl MessageValidator {
    /// Creates a validator
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Validates a message, collecting every violation
    #[must_use]
    pub fn validate(&self, message: &Message) -> ValidationReport {
        let mut errors = Vec::new();

        if message.id.is_empty() {
            errors.push("id is required".to_string());
        } else if message.id.chars().count() > 100 {
            errors.push("id exceeds 100 characters".to_string());
        }

        let now = Utc::now();
        let age = now.signed_duration_since(message.timestamp);
        if age > Duration::milliseconds(MAX_CLOCK_SKEW_PAST_MS) {
            errors.push("timestamp is more than 1 hour in the past".to_string());
        } else if age < Duration::milliseconds(-MAX_CLOCK_SKEW_FUTURE_MS) {
            errors.push("timestamp is more than 5 minutes in the future".to_string());
        }

        if message.source_agent.is_empty() {
            errors.push("sourceAgent is required".to_string());
        } else if message.source_agent.chars().count() > 50 {
            errors.push("sourceAgent exceeds 50 characters".to_string());
        }

        if let Some(target) = &message.target_agent {
            if target.is_empty() {
                errors.push("targetAgent must not be empty when present".to_string());
            } else if target.chars().count() > 50 {
                errors.push("targetAgent exceeds 50 characters".to_string());
            }
        }

        if let Err(e) = validate_topic(&message.topic) {
            errors.push(e);
        }
        if let Err(e) = validate_message_type(&message.message_type) {
            errors.push(e);
        }

        match serde_json::to_string(&message.payload) {
            Ok(serialized) => {
                if serialized.len() > MAX_PAYLOAD_BYTES {
                    errors.push(format!(
                        "payload exceeds {MAX_PAYLOAD_BYTES} bytes when serialized"
                    ));
                }
            }
            Err(e) => errors.push(format!("payload is not serializable: {e}")),
        }

        let meta = &message.metadata;
        if meta.correlation_id.is_empty() {
            errors.push("metadata.correlationId is required".to_string());
        } else if meta.correlation_id.chars().count() > 100 {
            errors.push("metadata.correlationId exceeds 100 characters".to_string());
        }
        if meta.ttl == 0 {
            errors.push("metadata.ttl must be greater than zero".to_string());
        } else if TtlMs::try_new(meta.ttl).is_err() {
            errors.push("metadata.ttl exceeds 24 hours".to_string());
        }
        if u8::try_from(meta.retry_count)
            .ok()
            .and_then(|count| RetryCount::try_new(count).ok())
            .is_none()
        {
            errors.push("metadata.retryCount exceeds 10".to_string());
        }
        if u8::try_from(meta.delivery_attempts)
            .ok()
            .and_then(|count| DeliveryAttempts::try_new(count).ok())
            .is_none()
        {
            errors.push("metadata.deliveryAttempts exceeds 20".to_string());
        }
        if let Some(key) = &meta.routing_key {
            if key.chars().count() > 200 {
                errors.push("metadata.routingKey exceeds 200 characters".to_string());
            }
        }
        if let Some(reply_to) = &meta.reply_to {
            if reply_to.chars().count() > 100 {
                errors.push("metadata.replyTo exceeds 100 characters".to_string());
            }
        }

        ValidationReport::from_errors(errors)
    }
}

/// Validates a topic name against the lowercase-hyphenated pattern
///
/// # Errors
/// Returns a human-readable description of the violation.
pub fn validate_topic(topic: &str) -> Result<(), String> {
    if topic.is_empty() {
        return Err("topic is required".to_string());
    }
    TopicName::try_new(topic.to_string())
        .map(|_| ())
        .map_err(|_| format!("topic {topic:?} must be lowercase alphanumeric with single hyphens, at most 100 characters"))
}

/// Validates a `category.action` message type
///
/// # Errors
/// Returns a human-readable description of the violation.
pub fn validate_message_type(message_type: &str) -> Result<(), String> {
    if message_type.is_empty() {
        return Err("messageType is required".to_string());
    }
    MessageTypeName::try_new(message_type.to_string())
        .map(|_| ())
        .map_err(|_| format!("messageType {message_type:?} must match category.action"))
}

/// Validates an agent identifier
///
/// # Errors
/// Returns a human-readable description of the violation.
pub fn validate_agent_id(agent_id: &str) -> Result<(), String> {
    AgentId::try_new(agent_id.to_string())
        .map(|_| ())
        .map_err(|_| format!("agentId {agent_id:?} must be 3-50 characters of alphanumeric, underscore, or hyphen, starting alphanumeric"))
}

/// Strips HTML tags and the characters `<>"'&` from string values and keys,
/// walking objects recursively. Non-string scalars, arrays, and null pass
/// through unchanged.
#[must_use]
pub fn sanitize_payload(payload: &Value) -> Value {
    match payload {
        Value::String(s) => Value::String(sanitize_string(s)),
        Value::Object(map) => {
            let mut sanitized = Map::with_capacity(map.len());
            for (key, value) in map {
                sanitized.insert(sanitize_string(key), sanitize_payload(value));
            }
            Value::Object(sanitized)
        }
        other => other.clone(),
    }
}

fn sanitize_string(input: &str) -> String {
    let without_tags = HTML_TAG_REGEX.replace_all(input, "");
    without_tags
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | '"' | '\'' | '&'))
        .collect()
}
