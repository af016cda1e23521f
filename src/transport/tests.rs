use super::*;
use crate::config::TransportConfig;
use futures::StreamExt;
use serde_json::json;
use std::time::Duration;

fn fast_config() -> TransportConfig {
    TransportConfig {
        subscriber_capacity: 16,
        max_delivery_attempts: 3,
        backoff_base_ms: 1,
        backoff_factor: 2.0,
        backoff_max_ms: 4,
        dedup_capacity: 64,
    }
}

fn heartbeat(n: u64) -> AgentMessage {
    AgentMessage::new(MessageKind::Heartbeat, "agent-1", "system", json!({ "n": n }))
}

#[test]
fn test_message_wire_schema() {
    let msg = AgentMessage::new(
        MessageKind::TaskAssignment,
        "coordinator",
        "tasks.coder",
        json!({"task": "t1"}),
    );
    let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

    for key in [
        "id",
        "sender_id",
        "recipient_id",
        "message_type",
        "payload",
        "timestamp",
        "correlation_id",
    ] {
        assert!(value.get(key).is_some(), "missing wire field {}", key);
    }
    assert_eq!(value["message_type"], "task_assignment");

    let parsed = AgentMessage::from_json(&msg.to_json().unwrap()).unwrap();
    assert_eq!(parsed, msg);
}

#[test]
fn test_reply_keeps_correlation_id() {
    let msg = heartbeat(1);
    let reply = msg.reply(MessageKind::TaskResult, "coordinator", json!({}));
    assert_eq!(reply.correlation_id(), msg.correlation_id());
    assert_eq!(reply.recipient_id, "agent-1");
    assert_ne!(reply.id, msg.id);
}

#[test]
fn test_payload_as_reports_malformed_payload() {
    let msg = AgentMessage::new(MessageKind::Heartbeat, "a", "b", json!({"nope": 1}));
    let err = msg.payload_as::<Heartbeat>().unwrap_err();
    assert!(err.to_string().contains("malformed heartbeat payload"));
}

#[test]
fn test_assignment_unmet_dependencies() {
    let task = crate::task::TaskSpecification::new("c", "C")
        .with_dependency("a")
        .with_dependency("b");
    let assignment = TaskAssignment {
        feature_id: "f".into(),
        task,
        attempt: 1,
        completed_dependencies: vec!["a".into()],
    };
    assert_eq!(assignment.unmet_dependencies(), vec!["b"]);
    assert!(!assignment.dependencies_met());
}

#[tokio::test]
async fn test_publish_reaches_every_subscriber() {
    let bus = MessageBus::new(&fast_config());
    let mut first = bus.subscribe("topic");
    let mut second = bus.subscribe("topic");
    let mut other = bus.subscribe("other");

    let msg = heartbeat(1);
    let receipt = bus.publish("topic", msg.clone()).await.unwrap();
    assert_eq!(receipt.delivered, 2);
    assert_eq!(receipt.dead_lettered, 0);

    assert_eq!(first.recv().await.unwrap(), msg);
    assert_eq!(second.recv().await.unwrap(), msg);
    assert!(other.try_recv().is_none());
}

#[tokio::test]
async fn test_publish_without_subscribers_delivers_nothing() {
    let bus = MessageBus::new(&fast_config());
    let receipt = bus.publish("empty", heartbeat(1)).await.unwrap();
    assert_eq!(receipt.delivered, 0);
    assert_eq!(bus.stats().published, 1);
}

#[tokio::test]
async fn test_messages_from_one_publisher_arrive_in_order() {
    let bus = MessageBus::new(&fast_config());
    let mut sub = bus.subscribe("ordered");

    for n in 0..10 {
        bus.publish("ordered", heartbeat(n)).await.unwrap();
    }

    for n in 0..10 {
        let msg = sub.recv().await.unwrap();
        assert_eq!(msg.payload["n"], n);
    }
}

#[tokio::test]
async fn test_full_subscriber_is_dead_lettered() {
    let config = TransportConfig {
        subscriber_capacity: 1,
        max_delivery_attempts: 2,
        ..fast_config()
    };
    let bus = MessageBus::new(&config);
    let mut slow = bus.subscribe("work");
    let mut dead = bus.subscribe(topics::DEAD_LETTER);

    bus.publish("work", heartbeat(1)).await.unwrap();
    let overflow = heartbeat(2);
    let receipt = bus.publish("work", overflow.clone()).await.unwrap();
    assert_eq!(receipt.delivered, 0);
    assert_eq!(receipt.dead_lettered, 1);

    let letter_msg = dead.recv().await.unwrap();
    assert_eq!(letter_msg.message_type, MessageKind::Error);
    assert_eq!(letter_msg.correlation_id(), overflow.correlation_id());

    let letter: DeadLetter = letter_msg.payload_as().unwrap();
    assert_eq!(letter.topic, "work");
    assert_eq!(letter.attempts, 2);
    assert_eq!(*letter.original, overflow);

    assert_eq!(slow.recv().await.unwrap().payload["n"], 1);
    assert_eq!(bus.stats().dead_lettered, 1);
}

#[tokio::test]
async fn test_cancelled_subscription_is_pruned() {
    let bus = MessageBus::new(&fast_config());
    let mut sub = bus.subscribe("topic");
    let _keep = bus.subscribe("topic");
    assert_eq!(bus.subscriber_count("topic"), 2);

    sub.cancel();
    let receipt = bus.publish("topic", heartbeat(1)).await.unwrap();
    assert_eq!(receipt.delivered, 1);
    assert_eq!(receipt.dead_lettered, 0);
    assert_eq!(bus.subscriber_count("topic"), 1);
    assert!(sub.recv().await.is_none());
}

#[tokio::test]
async fn test_closed_bus_rejects_publish_and_ends_streams() {
    let bus = MessageBus::new(&fast_config());
    let mut sub = bus.subscribe("topic");
    bus.close();

    assert!(bus.publish("topic", heartbeat(1)).await.is_err());
    assert!(sub.recv().await.is_none());
    assert!(bus.is_closed());
}

#[tokio::test]
async fn test_subscription_is_a_stream() {
    let bus = MessageBus::new(&fast_config());
    let mut sub = bus.subscribe("stream");
    bus.publish("stream", heartbeat(7)).await.unwrap();

    let msg = sub.next().await.unwrap();
    assert_eq!(msg.payload["n"], 7);
}

#[tokio::test]
async fn test_recv_timeout_is_bounded() {
    let bus = MessageBus::new(&fast_config());
    let mut sub = bus.subscribe("quiet");
    let err = sub
        .recv_timeout(Duration::from_millis(10))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no message on 'quiet'"));
}
