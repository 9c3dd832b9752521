//! Topic definitions and bounded message history
//!
//! History is in-memory. Retention runs lazily on every append and eagerly
//! from the hub's cleanup task; the configured global retention acts as an
//! upper bound on every topic's own policy.

use crate::domain_types::{RetentionMaxAgeMs, RetentionMaxMessages};
use crate::error::HubError;
use crate::messages::{Message, RetentionPolicy, TopicDefinition};
use crate::validation::validate_topic;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;

/// Fallback policy for topics that were published to but never defined
const IMPLICIT_POLICY: RetentionPolicy = RetentionPolicy {
    max_messages: 1_000,
    max_age: 3_600_000,
    compression_enabled: false,
};

/// Per-topic history with retention
pub struct TopicHistoryStore {
    definitions: DashMap<String, TopicDefinition>,
    histories: DashMap<String, VecDeque<Message>>,
    persistence_enabled: bool,
    global_max_age_ms: u64,
}

impl TopicHistoryStore {
    /// Creates the store and preloads the default topics
    #[must_use]
    pub fn new(persistence_enabled: bool, global_max_age_ms: u64) -> Self {
        let store = Self {
            definitions: DashMap::new(),
            histories: DashMap::new(),
            persistence_enabled,
            global_max_age_ms,
        };
        for definition in default_topics() {
            store.definitions.insert(definition.name.clone(), definition);
        }
        store
    }

    /// Registers a topic definition
    ///
    /// # Errors
    /// Fails on an invalid topic name or a duplicate definition.
    pub fn create_topic(&self, definition: TopicDefinition) -> Result<(), HubError> {
        validate_topic(&definition.name).map_err(|e| HubError::validation(vec![e]))?;
        if RetentionMaxMessages::try_new(definition.retention_policy.max_messages).is_err() {
            return Err(HubError::validation(vec![
                "retentionPolicy.maxMessages is out of range".to_string(),
            ]));
        }
        if RetentionMaxAgeMs::try_new(definition.retention_policy.max_age).is_err() {
            return Err(HubError::validation(vec![
                "retentionPolicy.maxAge is out of range".to_string(),
            ]));
        }
        if self.definitions.contains_key(&definition.name) {
            return Err(HubError::state(format!(
                "topic {} already exists",
                definition.name
            )));
        }
        self.definitions.insert(definition.name.clone(), definition);
        Ok(())
    }

    /// Looks up a topic definition
    #[must_use]
    pub fn definition(&self, name: &str) -> Option<TopicDefinition> {
        self.definitions.get(name).map(|d| d.clone())
    }

    /// Every known topic definition
    #[must_use]
    pub fn definitions(&self) -> Vec<TopicDefinition> {
        let mut definitions: Vec<TopicDefinition> =
            self.definitions.iter().map(|d| d.clone()).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Number of known topics
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.definitions.len()
    }

    /// Appends a message to its topic's history and applies retention
    pub fn append(&self, message: &Message) {
        if !self.persistence_enabled {
            return;
        }
        let policy = self.effective_policy(&message.topic);
        let mut history = self.histories.entry(message.topic.clone()).or_default();
        history.push_back(message.clone());
        Self::apply_retention(&mut history, &policy);
    }

    /// Reads a window of a topic's history; returns `(messages, total)`
    #[must_use]
    pub fn messages(&self, topic: &str, limit: usize, offset: usize) -> (Vec<Message>, usize) {
        if !self.persistence_enabled {
            return (Vec::new(), 0);
        }
        let Some(history) = self.histories.get(topic) else {
            return (Vec::new(), 0);
        };
        let total = history.len();
        let window = history.iter().skip(offset).take(limit).cloned().collect();
        (window, total)
    }

    /// Re-applies retention across every topic; returns evicted count
    pub fn prune_all(&self) -> usize {
        let mut evicted = 0;
        for mut entry in self.histories.iter_mut() {
            let policy = self.effective_policy(entry.key());
            let before = entry.len();
            Self::apply_retention(&mut entry, &policy);
            evicted += before - entry.len();
        }
        evicted
    }

    fn effective_policy(&self, topic: &str) -> RetentionPolicy {
        let mut policy = self
            .definitions
            .get(topic)
            .map_or(IMPLICIT_POLICY, |d| d.retention_policy);
        policy.max_age = policy.max_age.min(self.global_max_age_ms);
        policy
    }

    fn apply_retention(history: &mut VecDeque<Message>, policy: &RetentionPolicy) {
        let age_limit = i64::try_from(policy.max_age).unwrap_or(i64::MAX);
        let cutoff = Utc::now() - Duration::milliseconds(age_limit);
        history.retain(|message| message.timestamp > cutoff);
        while history.len() > policy.max_messages {
            history.pop_front();
        }
    }
}

/// The four topics every hub starts with
#[must_use]
pub fn default_topics() -> Vec<TopicDefinition> {
    vec![
        TopicDefinition {
            name: "fraud-detection".to_string(),
            description: "Fraud alerts and risk scoring".to_string(),
            message_types: vec!["fraud.alert".to_string(), "fraud.risk_score".to_string()],
            retention_policy: RetentionPolicy {
                max_messages: 10_000,
                max_age: 86_400_000,
                compression_enabled: true,
            },
        },
        TopicDefinition {
            name: "recommendations".to_string(),
            description: "Recommendation requests and responses".to_string(),
            message_types: vec![
                "recommendation.request".to_string(),
                "recommendation.response".to_string(),
            ],
            retention_policy: RetentionPolicy {
                max_messages: 5_000,
                max_age: 3_600_000,
                compression_enabled: false,
            },
        },
        TopicDefinition {
            name: "chat-support".to_string(),
            description: "Customer chat context and escalations".to_string(),
            message_types: vec![
                "chat.context_update".to_string(),
                "chat.escalation".to_string(),
            ],
            retention_policy: RetentionPolicy {
                max_messages: 1_000,
                max_age: 1_800_000,
                compression_enabled: false,
            },
        },
        TopicDefinition {
            name: "system-events".to_string(),
            description: "Hub and agent status events".to_string(),
            message_types: vec![
                "system.alert".to_string(),
                "agent.status_update".to_string(),
            ],
            retention_policy: RetentionPolicy {
                max_messages: 1_000,
                max_age: 3_600_000,
                compression_enabled: true,
            },
        },
    ]
}
