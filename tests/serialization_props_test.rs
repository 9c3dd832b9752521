//! Property tests for the serializer: round-trips in plain and compressed
//! form, and content-hash stability across id/timestamp changes.

use a2a_hub::messages::{Message, MessageMetadata, Priority};
use a2a_hub::serialization::{
    DeserializeOptions, SerializeOptions, content_hash, deserialize, serialize,
};
use chrono::{TimeZone, Utc};
use proptest::prelude::*;

fn priority_strategy() -> impl Strategy<Value = Priority> {
    prop_oneof![
        Just(Priority::Low),
        Just(Priority::Normal),
        Just(Priority::High),
    ]
}

fn payload_strategy() -> impl Strategy<Value = serde_json::Value> {
    let leaf = prop_oneof![
        Just(serde_json::Value::Null),
        any::<bool>().prop_map(serde_json::Value::from),
        any::<i64>().prop_map(serde_json::Value::from),
        "[a-zA-Z0-9 ]{0,20}".prop_map(serde_json::Value::from),
    ];
    leaf.prop_recursive(3, 24, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(serde_json::Value::from),
            prop::collection::btree_map("[a-z]{1,8}", inner, 0..4)
                .prop_map(|m| serde_json::Value::Object(m.into_iter().collect())),
        ]
    })
}

prop_compose! {
    fn message_strategy()(
        id in "[a-zA-Z0-9_-]{1,40}",
        secs in 1_600_000_000_i64..1_900_000_000,
        source in "[a-z][a-z0-9-]{2,20}",
        target in proptest::option::of("[a-z][a-z0-9-]{2,20}"),
        topic in "[a-z]{1,10}(-[a-z0-9]{1,8}){0,2}",
        category in "[a-z][a-z0-9_]{0,10}",
        action in "[a-z][a-z0-9_]{0,10}",
        priority in priority_strategy(),
        payload in payload_strategy(),
        correlation in "[a-zA-Z0-9-]{1,30}",
        ttl in 1_u64..86_400_000,
        retry in 0_u32..=10,
        routing_key in proptest::option::of("[a-zA-Z0-9.]{1,30}"),
    ) -> Message {
        Message {
            id,
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            source_agent: source,
            target_agent: target,
            topic,
            message_type: format!("{category}.{action}"),
            priority,
            payload,
            metadata: MessageMetadata {
                correlation_id: correlation,
                ttl,
                retry_count: retry,
                delivery_attempts: 0,
                routing_key,
                reply_to: None,
            },
        }
    }
}

proptest! {
    #[test]
    fn plain_round_trip(message in message_strategy()) {
        let wire = serialize(&message, SerializeOptions::default()).unwrap();
        let back = deserialize(&wire, DeserializeOptions::default()).unwrap();
        prop_assert_eq!(back, message);
    }

    #[test]
    fn compressed_round_trip(message in message_strategy()) {
        let wire = serialize(
            &message,
            SerializeOptions { compress: true, include_schema: false },
        )
        .unwrap();
        let back = deserialize(&wire, DeserializeOptions::default()).unwrap();
        prop_assert_eq!(back, message);
    }

    #[test]
    fn schema_tagged_round_trip(message in message_strategy()) {
        let wire = serialize(
            &message,
            SerializeOptions { compress: true, include_schema: true },
        )
        .unwrap();
        let back = deserialize(&wire, DeserializeOptions::default()).unwrap();
        prop_assert_eq!(back, message);
    }

    #[test]
    fn content_hash_is_stable_across_id_and_timestamp(
        message in message_strategy(),
        other_id in "[a-zA-Z0-9_-]{1,40}",
        other_secs in 1_600_000_000_i64..1_900_000_000,
    ) {
        let mut renamed = message.clone();
        renamed.id = other_id;
        renamed.timestamp = Utc.timestamp_opt(other_secs, 0).unwrap();
        prop_assert_eq!(content_hash(&message), content_hash(&renamed));
    }

    #[test]
    fn content_hash_tracks_payload_changes(message in message_strategy()) {
        let mut changed = message.clone();
        changed.payload = serde_json::json!({"__sentinel": "different"});
        // Identical payloads collide by construction; anything else should not
        if changed.payload != message.payload {
            prop_assert_ne!(content_hash(&message), content_hash(&changed));
        }
    }
}
