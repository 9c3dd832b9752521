//! Rule pipeline behavior: filter, transform, forward, duplicate, delay,
//! priority ordering, and failure isolation.

mod common;

use a2a_hub::events::{EventBus, HubEvent};
use a2a_hub::messages::{DeliveryStatus, Priority, Subscription};
use a2a_hub::router::rules::{
    FilterCondition, FilterOperator, RoutingRule, RuleAction, TransformSpec,
};
use a2a_hub::router::{MessageRouter, registration_for};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::Instant;

fn router() -> MessageRouter {
    MessageRouter::new(10_000, EventBus::new())
}

fn subscribe(router: &MessageRouter, agent_id: &str, topic: &str) {
    router
        .register_agent(&registration_for(agent_id, vec![Subscription::all_types(topic)]).unwrap());
}

#[tokio::test]
async fn filter_rule_terminates_with_single_filtered_receipt() {
    let router = router();
    subscribe(&router, "agent-a", "topic-x");

    // Only low-priority messages on topic-x pass
    router.add_rule(RoutingRule::new(
        "only-low",
        "drop non-low priority",
        100,
        |msg| msg.topic == "topic-x",
        RuleAction::Filter(FilterCondition {
            field: "priority".to_string(),
            operator: FilterOperator::Equals,
            value: json!("low"),
        }),
    ));

    let mut high = common::message("m-high", "topic-x", "a.b");
    high.priority = Priority::High;
    let receipts = router.route_message(high).await;
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].status, DeliveryStatus::Filtered);
    assert_eq!(router.queue_depth("agent-a"), 0);

    let mut low = common::message("m-low", "topic-x", "a.b");
    low.priority = Priority::Low;
    let receipts = router.route_message(low).await;
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].status, DeliveryStatus::Delivered);
    assert_eq!(receipts[0].target_agent, "agent-a");
}

#[tokio::test]
async fn transform_rule_rewrites_the_message_for_later_rules() {
    let router = router();
    subscribe(&router, "agent-a", "topic-x");

    router.add_rule(RoutingRule::new(
        "escalate",
        "escalate priority",
        200,
        |_| true,
        RuleAction::Transform(TransformSpec {
            payload: Some(json!({"escalated": true}).as_object().unwrap().clone()),
            priority: Some(Priority::High),
            ..TransformSpec::default()
        }),
    ));
    // Evaluated after the transform: sees the escalated priority (P6)
    router.add_rule(RoutingRule::new(
        "gate",
        "only escalated traffic passes",
        100,
        |_| true,
        RuleAction::Filter(FilterCondition {
            field: "priority".to_string(),
            operator: FilterOperator::Equals,
            value: json!("high"),
        }),
    ));

    let receipts = router
        .route_message(common::message("m1", "topic-x", "a.b"))
        .await;
    assert_eq!(receipts[0].status, DeliveryStatus::Delivered);

    let mut delivered = Vec::new();
    router.flush_queue("agent-a", |m| {
        delivered.push(m);
        true
    });
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].priority, Priority::High);
    assert_eq!(delivered[0].payload["escalated"], true);
    assert_eq!(delivered[0].payload["x"], 1);
}

#[tokio::test]
async fn rules_evaluate_in_descending_priority_with_stable_ties() {
    let router = router();
    subscribe(&router, "agent-a", "topic-x");

    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    for (id, priority) in [("first", 300_i64), ("tie-a", 100), ("tie-b", 100), ("last", 10)] {
        let order = Arc::clone(&order);
        router.add_rule(RoutingRule::new(
            id,
            id,
            priority,
            move |_| {
                order.lock().unwrap().push(id);
                false // never matches, so no action runs
            },
            RuleAction::Delay { delay_ms: 0 },
        ));
    }

    router
        .route_message(common::message("m1", "topic-x", "a.b"))
        .await;
    let seen = order.lock().unwrap().clone();
    assert_eq!(seen, vec!["first", "tie-a", "tie-b", "last"]);
}

#[tokio::test]
async fn forward_rule_delivers_copies_without_touching_the_original() {
    let router = router();
    subscribe(&router, "agent-a", "topic-x");
    router.register_agent(&registration_for("audit-agent", vec![]).unwrap());

    router.add_rule(RoutingRule::new(
        "audit",
        "copy everything to the auditor",
        100,
        |_| true,
        RuleAction::Forward {
            targets: vec!["audit-agent".to_string()],
        },
    ));

    let receipts = router
        .route_message(common::message("m1", "topic-x", "a.b"))
        .await;
    // The original still fans out to its subscriber only
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].target_agent, "agent-a");

    // The auditor got a derived copy
    let mut forwarded = Vec::new();
    router.flush_queue("audit-agent", |m| {
        forwarded.push(m.id);
        true
    });
    assert_eq!(forwarded, vec!["m1_forward_audit-agent"]);
}

#[tokio::test]
async fn duplicate_rule_copies_bypass_the_pipeline() {
    let router = router();
    subscribe(&router, "agent-a", "topic-x");

    let evaluations = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&evaluations);
    router.add_rule(RoutingRule::new(
        "duplicator",
        "route two extra copies",
        100,
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        },
        RuleAction::Duplicate {
            count: 2,
            modifications: None,
        },
    ));

    let receipts = router
        .route_message(common::message("m1", "topic-x", "a.b"))
        .await;
    // The original's receipts only; copies report through events
    assert_eq!(receipts.len(), 1);

    let mut ids = Vec::new();
    router.flush_queue("agent-a", |m| {
        ids.push(m.id);
        true
    });
    ids.sort();
    assert_eq!(ids, vec!["m1", "m1_dup_0", "m1_dup_1"]);

    // The predicate ran once: copies are exempt from rule evaluation, so
    // a duplicate rule can never match its own output.
    assert_eq!(evaluations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn delay_rule_suspends_the_pipeline() {
    let router = router();
    subscribe(&router, "agent-a", "topic-x");
    router.add_rule(RoutingRule::new(
        "slow",
        "hold messages briefly",
        100,
        |_| true,
        RuleAction::Delay { delay_ms: 100 },
    ));

    let started = Instant::now();
    router
        .route_message(common::message("m1", "topic-x", "a.b"))
        .await;
    assert!(started.elapsed().as_millis() >= 100);
}

#[tokio::test]
async fn failing_rule_is_skipped_and_message_continues() {
    let router = router();
    subscribe(&router, "agent-a", "topic-x");

    // ttl must be numeric, so this transform always fails to apply
    router.add_rule(RoutingRule::new(
        "broken",
        "broken metadata override",
        100,
        |_| true,
        RuleAction::Transform(TransformSpec {
            metadata: Some(json!({"ttl": "oops"}).as_object().unwrap().clone()),
            ..TransformSpec::default()
        }),
    ));

    let receipts = router
        .route_message(common::message("m1", "topic-x", "a.b"))
        .await;
    assert_eq!(receipts[0].status, DeliveryStatus::Delivered);
    assert_eq!(router.stats().rule_errors, 1);
}

#[tokio::test]
async fn disabled_rules_are_skipped() {
    let router = router();
    subscribe(&router, "agent-a", "topic-x");

    let mut rule = RoutingRule::new(
        "off",
        "disabled filter",
        100,
        |_| true,
        RuleAction::Filter(FilterCondition {
            field: "priority".to_string(),
            operator: FilterOperator::Equals,
            value: json!("low"),
        }),
    );
    rule.enabled = false;
    router.add_rule(rule);

    let receipts = router
        .route_message(common::message("m1", "topic-x", "a.b"))
        .await;
    assert_eq!(receipts[0].status, DeliveryStatus::Delivered);
}

#[tokio::test]
async fn rule_events_are_observable() {
    let events = EventBus::new();
    let router = MessageRouter::new(10_000, events.clone());
    subscribe(&router, "agent-a", "topic-x");
    let mut rx = events.subscribe();

    router.add_rule(RoutingRule::new(
        "tag",
        "tag all",
        100,
        |_| true,
        RuleAction::Transform(TransformSpec {
            payload: Some(json!({"tagged": true}).as_object().unwrap().clone()),
            ..TransformSpec::default()
        }),
    ));
    router
        .route_message(common::message("m1", "topic-x", "a.b"))
        .await;

    let mut saw_rule_applied = false;
    while let Ok(event) = rx.try_recv() {
        if let HubEvent::RuleApplied { rule_id, message_id } = event {
            assert_eq!(rule_id, "tag");
            assert_eq!(message_id, "m1");
            saw_rule_applied = true;
        }
    }
    assert!(saw_rule_applied);
}
