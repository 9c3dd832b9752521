//! Domain types for the A2A hub
//!
//! This module defines strongly-typed domain values to prevent primitive
//! obsession and improve type safety throughout the codebase. Wire structs
//! carry plain strings (the validator reports every violation at once);
//! these types are the parse boundary the rest of the crate works with.

use nutype::nutype;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

/// Pattern for agent identifiers: leading alphanumeric, then 2..=49 of
/// alphanumeric, underscore, or hyphen.
static AGENT_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{2,49}$").expect("valid regex"));

/// Pattern for topic names: lowercase alphanumeric runs joined by single
/// hyphens, no leading/trailing/consecutive hyphens.
static TOPIC_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").expect("valid regex"));

/// Pattern for message types: `category.action`.
static MESSAGE_TYPE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]*\.[a-z][a-z0-9_]*$").expect("valid regex"));

/// Identifier of an agent participating in the hub
#[nutype(
    validate(regex = AGENT_ID_REGEX),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        AsRef,
        TryFrom,
        Into
    )
)]
pub struct AgentId(String);

/// Name of a topic channel
#[nutype(
    validate(len_char_max = 100, regex = TOPIC_REGEX),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        AsRef,
        TryFrom,
        Into
    )
)]
pub struct TopicName(String);

/// A `category.action` message type
#[nutype(
    validate(len_char_max = 100, regex = MESSAGE_TYPE_REGEX),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        AsRef,
        TryFrom,
        Into
    )
)]
pub struct MessageTypeName(String);

/// Unique identifier of a message
#[nutype(
    validate(len_char_min = 1, len_char_max = 100),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        AsRef,
        TryFrom,
        Into
    )
)]
pub struct MessageId(String);

impl MessageId {
    /// Creates a new random message ID
    ///
    /// # Panics
    /// Never panics; the generated form always satisfies the length bounds.
    #[must_use]
    pub fn generate() -> Self {
        Self::try_new(format!("msg_{}", uuid::Uuid::new_v4())).expect("generated id is valid")
    }
}

/// Correlation identifier carried in message metadata
#[nutype(
    validate(len_char_min = 1, len_char_max = 100),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        AsRef,
        TryFrom,
        Into
    )
)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Creates a new random correlation ID
    ///
    /// # Panics
    /// Never panics; the generated form always satisfies the length bounds.
    #[must_use]
    pub fn generate() -> Self {
        Self::try_new(format!("corr_{}", uuid::Uuid::new_v4())).expect("generated id is valid")
    }
}

/// Heartbeat interval in milliseconds
#[nutype(
    validate(greater_or_equal = 100, less_or_equal = 600_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 30_000
)]
pub struct HeartbeatIntervalMs(u64);

impl HeartbeatIntervalMs {
    /// Converts to Duration
    #[must_use]
    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.into_inner())
    }

    /// Gets the value as u64
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.into_inner()
    }
}

/// Maximum number of registered agents the hub accepts
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 100_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 1_000
)]
pub struct MaxConnections(usize);

impl MaxConnections {
    /// Gets the value as usize
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Soft cap on a single agent's pending queue
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1_000_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 10_000
)]
pub struct QueueSoftCap(usize);

impl QueueSoftCap {
    /// Gets the value as usize
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Maximum retained messages for a topic
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 1_000_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 1_000
)]
pub struct RetentionMaxMessages(usize);

impl RetentionMaxMessages {
    /// Gets the value as usize
    #[must_use]
    pub fn as_usize(&self) -> usize {
        self.into_inner()
    }
}

/// Maximum age of retained messages in milliseconds
#[nutype(
    validate(greater_or_equal = 1_000, less_or_equal = 604_800_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 3_600_000
)]
pub struct RetentionMaxAgeMs(u64);

impl RetentionMaxAgeMs {
    /// Converts to Duration
    #[must_use]
    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.into_inner())
    }

    /// Gets the value as u64
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.into_inner()
    }
}

/// Message time-to-live in milliseconds (at most 24 hours)
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 86_400_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into
    )
)]
pub struct TtlMs(u64);

/// Publisher-managed retry counter
#[nutype(
    validate(less_or_equal = 10),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 0
)]
pub struct RetryCount(u8);

/// Hub-observed delivery attempt counter
#[nutype(
    validate(less_or_equal = 20),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        Default,
        TryFrom,
        Into
    ),
    default = 0
)]
pub struct DeliveryAttempts(u8);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_id_accepts_valid_identifiers() {
        assert!(AgentId::try_new("chatbot-001".to_string()).is_ok());
        assert!(AgentId::try_new("A1_b".to_string()).is_ok());
        assert!(AgentId::try_new("abc".to_string()).is_ok());
    }

    #[test]
    fn agent_id_rejects_invalid_identifiers() {
        // Minimum three characters
        assert!(AgentId::try_new("ab".to_string()).is_err());
        assert!(AgentId::try_new("-abc".to_string()).is_err());
        assert!(AgentId::try_new("_abc".to_string()).is_err());
        assert!(AgentId::try_new("a".repeat(51)).is_err());
        assert!(AgentId::try_new(String::new()).is_err());
    }

    #[test]
    fn topic_name_enforces_hyphen_rules() {
        assert!(TopicName::try_new("fraud-detection".to_string()).is_ok());
        assert!(TopicName::try_new("x".to_string()).is_ok());
        assert!(TopicName::try_new("-leading".to_string()).is_err());
        assert!(TopicName::try_new("trailing-".to_string()).is_err());
        assert!(TopicName::try_new("double--hyphen".to_string()).is_err());
        assert!(TopicName::try_new("Uppercase".to_string()).is_err());
        assert!(TopicName::try_new("a".repeat(101)).is_err());
    }

    #[test]
    fn message_type_requires_category_and_action() {
        assert!(MessageTypeName::try_new("chat.context_update".to_string()).is_ok());
        assert!(MessageTypeName::try_new("fraud.alert".to_string()).is_ok());
        assert!(MessageTypeName::try_new("noaction".to_string()).is_err());
        assert!(MessageTypeName::try_new("Upper.case".to_string()).is_err());
        assert!(MessageTypeName::try_new("a.b.c".to_string()).is_err());
        assert!(MessageTypeName::try_new("1num.act".to_string()).is_err());
    }

    #[test]
    fn generated_ids_are_valid() {
        let id = MessageId::generate();
        assert!(id.as_ref().starts_with("msg_"));
        let corr = CorrelationId::generate();
        assert!(corr.as_ref().starts_with("corr_"));
    }

    #[test]
    fn interval_bounds_are_enforced() {
        assert!(HeartbeatIntervalMs::try_new(50).is_err());
        assert!(HeartbeatIntervalMs::try_new(30_000).is_ok());
        assert!(TtlMs::try_new(0).is_err());
        assert!(TtlMs::try_new(86_400_000).is_ok());
        assert!(TtlMs::try_new(86_400_001).is_err());
        assert!(RetryCount::try_new(10).is_ok());
        assert!(RetryCount::try_new(11).is_err());
        assert!(DeliveryAttempts::try_new(20).is_ok());
        assert!(DeliveryAttempts::try_new(21).is_err());
    }
}
