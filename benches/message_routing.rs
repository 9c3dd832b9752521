//! Message routing performance benchmarks
//!
//! Measures serialization and routing-table throughput for different
//! payload sizes and subscriber counts.

use a2a_hub::events::EventBus;
use a2a_hub::messages::{Message, MessageMetadata, Priority, Subscription};
use a2a_hub::router::{MessageRouter, registration_for};
use a2a_hub::serialization::{DeserializeOptions, SerializeOptions, deserialize, serialize};
use chrono::Utc;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::time::Duration;
use tokio::runtime::Runtime;

fn test_message(payload_size: usize) -> Message {
    Message {
        id: "bench-message".to_string(),
        timestamp: Utc::now(),
        source_agent: "bench-source".to_string(),
        target_agent: None,
        topic: "bench-topic".to_string(),
        message_type: "bench.payload".to_string(),
        priority: Priority::Normal,
        payload: serde_json::json!({"data": "x".repeat(payload_size)}),
        metadata: MessageMetadata::new("bench-correlation"),
    }
}

fn bench_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialization");
    group.measurement_time(Duration::from_secs(10));

    for payload_size in [64, 512, 4096, 32_768] {
        let message = test_message(payload_size);
        group.throughput(Throughput::Bytes(payload_size as u64));

        group.bench_with_input(
            BenchmarkId::new("serialize_plain", payload_size),
            &message,
            |b, message| {
                b.iter(|| serialize(black_box(message), SerializeOptions::default()).unwrap());
            },
        );

        group.bench_with_input(
            BenchmarkId::new("serialize_compressed", payload_size),
            &message,
            |b, message| {
                b.iter(|| {
                    serialize(
                        black_box(message),
                        SerializeOptions {
                            compress: true,
                            include_schema: false,
                        },
                    )
                    .unwrap()
                });
            },
        );

        let wire = serialize(&message, SerializeOptions::default()).unwrap();
        group.bench_with_input(
            BenchmarkId::new("deserialize", payload_size),
            &wire,
            |b, wire| {
                b.iter(|| deserialize(black_box(wire), DeserializeOptions::default()).unwrap());
            },
        );
    }
    group.finish();
}

fn bench_routing(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("routing");
    group.measurement_time(Duration::from_secs(10));

    for subscriber_count in [1_usize, 10, 100] {
        group.throughput(Throughput::Elements(subscriber_count as u64));
        group.bench_with_input(
            BenchmarkId::new("route_to_subscribers", subscriber_count),
            &subscriber_count,
            |b, &subscriber_count| {
                let router = MessageRouter::new(1_000_000, EventBus::new());
                for i in 0..subscriber_count {
                    router.register_agent(
                        &registration_for(
                            &format!("bench-agent-{i}"),
                            vec![Subscription::all_types("bench-topic")],
                        )
                        .unwrap(),
                    );
                }
                let message = test_message(64);
                b.to_async(&rt).iter(|| {
                    let router = &router;
                    let message = message.clone();
                    async move { black_box(router.route_message(message).await) }
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_serialization, bench_routing);
criterion_main!(benches);
