//! Rule-driven message routing
//!
//! The router owns the agent registry, the topic subscription index, the
//! per-agent pending queues, and the delivery-receipt table. All of its
//! tables are sharded maps mutated per key; there is no global lock.
//!
//! `route_message` never fails: rule errors and unreachable recipients are
//! converted into failure receipts and events so one bad recipient can
//! never deny the others their receipt.

pub mod rules;

use crate::events::{EventBus, HubEvent};
use crate::messages::{
    AgentRegistration, DeliveryReceipt, Message, Subscription, ValidatedRegistration,
    ValidatedSubscription,
};
use chrono::{Duration, Utc};
use dashmap::DashMap;
use rules::{RoutingRule, RuleAction};
use serde::Serialize;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Recipient recorded on synthetic receipts that have no real target
pub const HUB_RECIPIENT: &str = "hub";

/// Counters the router exposes through `/stats`
#[derive(Debug, Default)]
struct RouterCounters {
    routed: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    filtered: AtomicU64,
    dropped: AtomicU64,
    rule_errors: AtomicU64,
}

/// Snapshot of router statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterStats {
    /// Messages that entered routing, including rule-generated copies
    pub messages_routed: u64,
    /// Receipts issued with `delivered` status
    pub messages_delivered: u64,
    /// Receipts issued with `failed` status
    pub messages_failed: u64,
    /// Messages terminated by a filter rule
    pub messages_filtered: u64,
    /// Messages currently waiting in per-agent queues
    pub queued_messages: usize,
    /// Messages dropped by queue soft-cap overflow
    pub dropped_messages: u64,
    /// Rule evaluation failures
    pub rule_errors: u64,
    /// Agents currently registered
    pub registered_agents: usize,
    /// Topics with at least one subscriber
    pub active_topics: usize,
    /// Message ids with receipts still held
    pub receipts_held: usize,
}

/// Hook invoked after a message lands in an agent's queue
pub type DeliveryHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Outcome of the rule pipeline
enum PipelineOutcome {
    /// Message survived the pipeline, possibly transformed
    Continue(Box<Message>),
    /// A filter rule terminated routing
    Filtered {
        message_id: String,
        rule_id: String,
    },
}

/// The rule-driven message router
pub struct MessageRouter {
    registry: DashMap<String, AgentRegistration>,
    subscriptions: DashMap<String, BTreeSet<String>>,
    rules: RwLock<Vec<RoutingRule>>,
    queues: DashMap<String, VecDeque<Message>>,
    receipts: DashMap<String, Vec<DeliveryReceipt>>,
    queue_soft_cap: usize,
    counters: RouterCounters,
    events: EventBus<HubEvent>,
    delivery_hook: RwLock<Option<DeliveryHook>>,
}

impl MessageRouter {
    /// Creates a router with the given per-agent queue soft cap
    #[must_use]
    pub fn new(queue_soft_cap: usize, events: EventBus<HubEvent>) -> Self {
        Self {
            registry: DashMap::new(),
            subscriptions: DashMap::new(),
            rules: RwLock::new(Vec::new()),
            queues: DashMap::new(),
            receipts: DashMap::new(),
            queue_soft_cap,
            counters: RouterCounters::default(),
            events,
            delivery_hook: RwLock::new(None),
        }
    }

    /// Installs the hook the hub uses to flush queues to live streams
    pub fn set_delivery_hook(&self, hook: DeliveryHook) {
        *self.delivery_hook.write().expect("hook lock poisoned") = Some(hook);
    }

    /// Records a registration and indexes its declared subscriptions
    pub fn register_agent(&self, registration: &ValidatedRegistration) {
        let agent_id = registration.agent_id.to_string();
        self.registry
            .insert(agent_id.clone(), registration.registration.clone());
        for sub in &registration.subscriptions {
            self.index_subscription(&agent_id, sub);
        }
        debug!(agent_id = %agent_id, "agent registered with router");
        self.events.emit(HubEvent::AgentRegistered {
            agent_id: agent_id.clone(),
        });
    }

    /// Removes an agent's registration, subscriptions, and queue. Idempotent.
    pub fn unregister_agent(&self, agent_id: &str) -> bool {
        let existed = self.registry.remove(agent_id).is_some();
        self.subscriptions.retain(|_, subscribers| {
            subscribers.remove(agent_id);
            !subscribers.is_empty()
        });
        self.queues.remove(agent_id);
        if existed {
            self.events.emit(HubEvent::AgentUnregistered {
                agent_id: agent_id.to_string(),
            });
        }
        existed
    }

    /// Returns true when the agent is registered
    #[must_use]
    pub fn is_registered(&self, agent_id: &str) -> bool {
        self.registry.contains_key(agent_id)
    }

    /// Number of registered agents
    #[must_use]
    pub fn registered_count(&self) -> usize {
        self.registry.len()
    }

    /// Snapshot of a registration
    #[must_use]
    pub fn registration(&self, agent_id: &str) -> Option<AgentRegistration> {
        self.registry.get(agent_id).map(|r| r.clone())
    }

    /// Snapshot of every registration
    #[must_use]
    pub fn registrations(&self) -> Vec<AgentRegistration> {
        self.registry.iter().map(|r| r.value().clone()).collect()
    }

    /// Adds a subscription for a registered agent
    ///
    /// # Errors
    /// Fails when the agent has no registration; the subscription index
    /// only ever references registered agents.
    pub fn add_subscription(
        &self,
        agent_id: &str,
        subscription: &ValidatedSubscription,
    ) -> Result<(), String> {
        let Some(mut registration) = self.registry.get_mut(agent_id) else {
            return Err(format!("agent {agent_id} is not registered"));
        };
        let topic = subscription.topic.to_string();
        registration
            .subscriptions
            .retain(|existing| existing.topic != topic);
        registration
            .subscriptions
            .push(subscription.subscription.clone());
        drop(registration);

        self.index_subscription(agent_id, subscription);
        Ok(())
    }

    /// Removes an agent's subscription to a topic
    ///
    /// Removing the last subscriber of a topic removes the topic key.
    pub fn remove_subscription(&self, agent_id: &str, topic: &str) {
        if let Some(mut registration) = self.registry.get_mut(agent_id) {
            registration.subscriptions.retain(|sub| sub.topic != topic);
        }
        let emptied = if let Some(mut subscribers) = self.subscriptions.get_mut(topic) {
            subscribers.remove(agent_id);
            subscribers.is_empty()
        } else {
            false
        };
        if emptied {
            self.subscriptions.remove(topic);
        }
    }

    fn index_subscription(&self, agent_id: &str, subscription: &ValidatedSubscription) {
        self.subscriptions
            .entry(subscription.topic.to_string())
            .or_default()
            .insert(agent_id.to_string());
    }

    /// Subscribers of a topic whose subscription admits the message type
    #[must_use]
    pub fn subscribers_for(&self, topic: &str, message_type: &str) -> Vec<String> {
        let Some(subscribers) = self.subscriptions.get(topic) else {
            return Vec::new();
        };
        subscribers
            .iter()
            .filter(|agent_id| {
                self.registry.get(agent_id.as_str()).is_some_and(|reg| {
                    reg.subscriptions
                        .iter()
                        .any(|sub| sub.topic == topic && sub.admits(message_type))
                })
            })
            .cloned()
            .collect()
    }

    /// Installs a routing rule, keeping the list sorted by descending
    /// priority with insertion order breaking ties
    pub fn add_rule(&self, rule: RoutingRule) {
        let mut rules = self.rules.write().expect("rules lock poisoned");
        rules.push(rule);
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Removes a rule by id; returns true when it existed
    pub fn remove_rule(&self, rule_id: &str) -> bool {
        let mut rules = self.rules.write().expect("rules lock poisoned");
        let before = rules.len();
        rules.retain(|rule| rule.id != rule_id);
        rules.len() != before
    }

    /// Routes a message, producing exactly `max(1, recipients)` receipts
    pub async fn route_message(&self, message: Message) -> Vec<DeliveryReceipt> {
        self.route_inner(message, false).await
    }

    async fn route_inner(&self, message: Message, suppress_rules: bool) -> Vec<DeliveryReceipt> {
        self.counters.routed.fetch_add(1, Ordering::Relaxed);

        let message = if suppress_rules {
            message
        } else {
            match self.apply_rules(message).await {
                PipelineOutcome::Continue(message) => *message,
                PipelineOutcome::Filtered {
                    message_id,
                    rule_id,
                } => {
                    self.counters.filtered.fetch_add(1, Ordering::Relaxed);
                    debug!(message_id = %message_id, rule_id = %rule_id, "message filtered by rule");
                    let receipt = DeliveryReceipt::filtered(&message_id, HUB_RECIPIENT);
                    self.record_receipt(&message_id, &receipt);
                    return vec![receipt];
                }
            }
        };

        let recipients: Vec<String> = match &message.target_agent {
            Some(target) => vec![target.clone()],
            None => self.subscribers_for(&message.topic, &message.message_type),
        };

        if recipients.is_empty() {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            self.events.emit(HubEvent::RoutingError {
                message_id: message.id.clone(),
                error: "no recipients".to_string(),
            });
            let receipt = DeliveryReceipt::failed(&message.id, HUB_RECIPIENT, "no recipients");
            self.record_receipt(&message.id, &receipt);
            return vec![receipt];
        }

        // Deliveries are independent: a failure for one recipient never
        // aborts the rest.
        let mut receipts = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let receipt = self.deliver_to_agent(message.clone(), &recipient);
            self.record_receipt(&message.id, &receipt);
            receipts.push(receipt);
        }
        receipts
    }

    async fn apply_rules(&self, message: Message) -> PipelineOutcome {
        let rules: Vec<RoutingRule> = {
            let guard = self.rules.read().expect("rules lock poisoned");
            guard.clone()
        };

        let mut message = message;
        for rule in rules {
            if !rule.enabled || !(rule.predicate)(&message) {
                continue;
            }
            match &rule.action {
                RuleAction::Filter(condition) => match condition.is_satisfied_by(&message) {
                    Ok(true) => self.rule_applied(&rule, &message),
                    Ok(false) => {
                        self.rule_applied(&rule, &message);
                        return PipelineOutcome::Filtered {
                            message_id: message.id,
                            rule_id: rule.id,
                        };
                    }
                    Err(error) => self.rule_failed(&rule, &message, &error),
                },
                RuleAction::Transform(spec) => {
                    let mut transformed = message.clone();
                    match spec.apply(&mut transformed) {
                        Ok(()) => {
                            message = transformed;
                            self.rule_applied(&rule, &message);
                        }
                        Err(error) => self.rule_failed(&rule, &message, &error),
                    }
                }
                RuleAction::Forward { targets } => {
                    for target in targets {
                        let mut copy = message.clone();
                        copy.id = format!("{}_forward_{}", message.id, target);
                        copy.timestamp = Utc::now();
                        copy.target_agent = Some(target.clone());
                        let receipt = self.deliver_to_agent(copy, target);
                        self.record_receipt(&receipt.message_id, &receipt);
                        self.events.emit(HubEvent::CopyDispatched {
                            rule_id: rule.id.clone(),
                            receipt,
                        });
                    }
                    self.rule_applied(&rule, &message);
                }
                RuleAction::Duplicate {
                    count,
                    modifications,
                } => {
                    for i in 0..*count {
                        let mut copy = message.clone();
                        copy.id = format!("{}_dup_{i}", message.id);
                        if let Some(spec) = modifications {
                            if let Err(error) = spec.apply(&mut copy) {
                                self.rule_failed(&rule, &message, &error);
                                continue;
                            }
                        }
                        // Copies bypass the rule pipeline so a rule can
                        // never match its own output.
                        let copy_receipts = Box::pin(self.route_inner(copy, true)).await;
                        for receipt in copy_receipts {
                            self.events.emit(HubEvent::CopyDispatched {
                                rule_id: rule.id.clone(),
                                receipt,
                            });
                        }
                    }
                    self.rule_applied(&rule, &message);
                }
                RuleAction::Delay { delay_ms } => {
                    tokio::time::sleep(std::time::Duration::from_millis(*delay_ms)).await;
                    self.rule_applied(&rule, &message);
                }
            }
        }
        PipelineOutcome::Continue(Box::new(message))
    }

    fn rule_applied(&self, rule: &RoutingRule, message: &Message) {
        self.events.emit(HubEvent::RuleApplied {
            rule_id: rule.id.clone(),
            message_id: message.id.clone(),
        });
    }

    fn rule_failed(&self, rule: &RoutingRule, message: &Message, error: &str) {
        self.counters.rule_errors.fetch_add(1, Ordering::Relaxed);
        warn!(
            rule_id = %rule.id,
            message_id = %message.id,
            error = %error,
            "routing rule failed; message continues unchanged"
        );
        self.events.emit(HubEvent::RuleError {
            rule_id: rule.id.clone(),
            message_id: message.id.clone(),
            error: error.to_string(),
        });
    }

    /// Appends a message to an agent's queue without blocking
    ///
    /// The receipt marks *accepted for delivery*; transport failures are
    /// surfaced later through `DeliveryError` events.
    pub fn deliver_to_agent(&self, mut message: Message, agent_id: &str) -> DeliveryReceipt {
        if !self.registry.contains_key(agent_id) {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            self.events.emit(HubEvent::DeliveryError {
                agent_id: agent_id.to_string(),
                message_id: message.id.clone(),
                error: "agent not registered".to_string(),
            });
            return DeliveryReceipt::failed(&message.id, agent_id, "agent not registered");
        }

        message.metadata.delivery_attempts = message.metadata.delivery_attempts.saturating_add(1);
        let message_id = message.id.clone();

        {
            let mut queue = self.queues.entry(agent_id.to_string()).or_default();
            if queue.len() >= self.queue_soft_cap {
                if let Some(dropped) = queue.pop_front() {
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    self.events.emit(HubEvent::QueueOverflow {
                        agent_id: agent_id.to_string(),
                        dropped_message_id: dropped.id,
                    });
                }
            }
            queue.push_back(message);
        }

        self.counters.delivered.fetch_add(1, Ordering::Relaxed);
        self.events.emit(HubEvent::MessageQueued {
            agent_id: agent_id.to_string(),
            message_id: message_id.clone(),
        });

        // The hub flushes the queue to the live stream, if any.
        let hook = self
            .delivery_hook
            .read()
            .expect("hook lock poisoned")
            .clone();
        if let Some(hook) = hook {
            hook(agent_id);
        }

        DeliveryReceipt::delivered(message_id, agent_id)
    }

    /// Drains an agent's queue in FIFO order into the sink
    ///
    /// The queue entry stays locked for the whole drain, so concurrent
    /// flushes cannot interleave and per-recipient ordering is preserved.
    /// A sink returning false stops the drain and puts the message back.
    pub fn flush_queue(&self, agent_id: &str, mut sink: impl FnMut(Message) -> bool) -> usize {
        let Some(mut queue) = self.queues.get_mut(agent_id) else {
            return 0;
        };
        let mut flushed = 0;
        while let Some(message) = queue.pop_front() {
            let message_id = message.id.clone();
            if sink(message.clone()) {
                flushed += 1;
                self.events.emit(HubEvent::MessageDelivered {
                    agent_id: agent_id.to_string(),
                    message_id,
                });
            } else {
                queue.push_front(message);
                self.events.emit(HubEvent::DeliveryError {
                    agent_id: agent_id.to_string(),
                    message_id,
                    error: "stream write failed".to_string(),
                });
                break;
            }
        }
        flushed
    }

    /// Current depth of an agent's queue
    #[must_use]
    pub fn queue_depth(&self, agent_id: &str) -> usize {
        self.queues.get(agent_id).map_or(0, |q| q.len())
    }

    /// Messages waiting across every agent queue
    #[must_use]
    pub fn total_queued(&self) -> usize {
        self.queues.iter().map(|q| q.len()).sum()
    }

    /// Receipts recorded for a message id
    #[must_use]
    pub fn receipts_for(&self, message_id: &str) -> Vec<DeliveryReceipt> {
        self.receipts
            .get(message_id)
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Drops receipts older than the given age; returns how many went
    pub fn prune_receipts(&self, max_age: std::time::Duration) -> usize {
        let cutoff = Utc::now()
            - Duration::from_std(max_age).unwrap_or_else(|_| Duration::try_hours(1).unwrap_or_default());
        let mut pruned = 0;
        self.receipts.retain(|_, receipts| {
            let before = receipts.len();
            receipts.retain(|receipt| receipt.timestamp > cutoff);
            pruned += before - receipts.len();
            !receipts.is_empty()
        });
        pruned
    }

    fn record_receipt(&self, message_id: &str, receipt: &DeliveryReceipt) {
        self.receipts
            .entry(message_id.to_string())
            .or_default()
            .push(receipt.clone());
    }

    /// Statistics snapshot
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            messages_routed: self.counters.routed.load(Ordering::Relaxed),
            messages_delivered: self.counters.delivered.load(Ordering::Relaxed),
            messages_failed: self.counters.failed.load(Ordering::Relaxed),
            messages_filtered: self.counters.filtered.load(Ordering::Relaxed),
            queued_messages: self.total_queued(),
            dropped_messages: self.counters.dropped.load(Ordering::Relaxed),
            rule_errors: self.counters.rule_errors.load(Ordering::Relaxed),
            registered_agents: self.registry.len(),
            active_topics: self.subscriptions.len(),
            receipts_held: self.receipts.len(),
        }
    }
}

/// Convenience used by tests and the hub to build a registration for a
/// bare agent id with the given subscriptions
///
/// # Errors
/// Fails when the id or any subscription is invalid.
pub fn registration_for(
    agent_id: &str,
    subscriptions: Vec<Subscription>,
) -> Result<ValidatedRegistration, String> {
    AgentRegistration {
        agent_id: agent_id.to_string(),
        agent_type: "agent".to_string(),
        capabilities: Vec::new(),
        subscriptions,
        endpoint: String::new(),
        heartbeat_interval: 30_000,
    }
    .parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{MessageMetadata, Priority};
    use serde_json::json;

    fn router() -> MessageRouter {
        MessageRouter::new(10_000, EventBus::new())
    }

    fn message(id: &str, topic: &str, message_type: &str) -> Message {
        Message {
            id: id.to_string(),
            timestamp: Utc::now(),
            source_agent: "svc".to_string(),
            target_agent: None,
            topic: topic.to_string(),
            message_type: message_type.to_string(),
            priority: Priority::Normal,
            payload: json!({"x": 1}),
            metadata: MessageMetadata::new("c1"),
        }
    }

    #[tokio::test]
    async fn subscriber_receives_topic_message() {
        let router = router();
        let reg =
            registration_for("agent-a", vec![Subscription::all_types("chat-support")]).unwrap();
        router.register_agent(&reg);

        let receipts = router
            .route_message(message("m1", "chat-support", "chat.context_update"))
            .await;
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].target_agent, "agent-a");
        assert_eq!(receipts[0].status, crate::messages::DeliveryStatus::Delivered);
        assert_eq!(router.queue_depth("agent-a"), 1);
    }

    #[tokio::test]
    async fn unrouted_message_gets_single_failure_receipt() {
        let router = router();
        let receipts = router
            .route_message(message("m1", "nowhere", "a.b"))
            .await;
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].status, crate::messages::DeliveryStatus::Failed);
        assert_eq!(receipts[0].error.as_deref(), Some("no recipients"));
    }

    #[tokio::test]
    async fn unicast_overrides_subscriptions() {
        let router = router();
        router
            .register_agent(&registration_for("agent-a", vec![]).unwrap());
        router.register_agent(
            &registration_for("agent-b", vec![Subscription::all_types("topic-x")]).unwrap(),
        );

        let mut msg = message("m1", "topic-x", "a.b");
        msg.target_agent = Some("agent-a".to_string());
        let receipts = router.route_message(msg).await;
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].target_agent, "agent-a");
        assert_eq!(router.queue_depth("agent-b"), 0);
    }

    #[tokio::test]
    async fn message_type_filtering_respects_empty_list() {
        let router = router();
        let narrow = Subscription {
            message_types: vec!["chat.escalation".to_string()],
            ..Subscription::all_types("chat-support")
        };
        router
            .register_agent(&registration_for("narrow-agent", vec![narrow]).unwrap());
        router.register_agent(
            &registration_for("wide-agent", vec![Subscription::all_types("chat-support")])
                .unwrap(),
        );

        let receipts = router
            .route_message(message("m1", "chat-support", "chat.context_update"))
            .await;
        let targets: Vec<&str> = receipts.iter().map(|r| r.target_agent.as_str()).collect();
        assert_eq!(targets, vec!["wide-agent"]);
    }

    #[tokio::test]
    async fn unregister_is_idempotent_and_clears_state() {
        let router = router();
        router.register_agent(
            &registration_for("agent-a", vec![Subscription::all_types("topic-x")]).unwrap(),
        );
        router
            .route_message(message("m1", "topic-x", "a.b"))
            .await;
        assert_eq!(router.queue_depth("agent-a"), 1);

        assert!(router.unregister_agent("agent-a"));
        assert!(!router.unregister_agent("agent-a"));
        assert_eq!(router.queue_depth("agent-a"), 0);
        assert_eq!(router.subscribers_for("topic-x", "a.b").len(), 0);
    }

    #[tokio::test]
    async fn queue_overflow_drops_oldest() {
        let router = MessageRouter::new(2, EventBus::new());
        router.register_agent(
            &registration_for("agent-a", vec![Subscription::all_types("topic-x")]).unwrap(),
        );
        for i in 0..3 {
            router
                .route_message(message(&format!("m{i}"), "topic-x", "a.b"))
                .await;
        }
        assert_eq!(router.queue_depth("agent-a"), 2);
        let mut seen = Vec::new();
        router.flush_queue("agent-a", |m| {
            seen.push(m.id);
            true
        });
        assert_eq!(seen, vec!["m1", "m2"]);
        assert_eq!(router.stats().dropped_messages, 1);
    }

    #[tokio::test]
    async fn flush_preserves_fifo_and_requeues_on_failure() {
        let router = router();
        router.register_agent(
            &registration_for("agent-a", vec![Subscription::all_types("topic-x")]).unwrap(),
        );
        for i in 0..3 {
            router
                .route_message(message(&format!("m{i}"), "topic-x", "a.b"))
                .await;
        }

        let mut sent = Vec::new();
        let flushed = router.flush_queue("agent-a", |m| {
            if sent.len() == 2 {
                return false;
            }
            sent.push(m.id);
            true
        });
        assert_eq!(flushed, 2);
        assert_eq!(sent, vec!["m0", "m1"]);
        assert_eq!(router.queue_depth("agent-a"), 1);
    }
}
