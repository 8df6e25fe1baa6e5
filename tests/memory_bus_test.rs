use std::sync::{Arc, Mutex};

use serversync::broker::memory::memory_bus::MemoryHub;
use serversync::common::error::SyncError;
use serversync::common::event::{ChangeEvent, EventKind};
use serversync::traits::message_bus::{BusHandler, BusMessage, MessageBus};

fn collector() -> (BusHandler, Arc<Mutex<Vec<BusMessage>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handler: BusHandler = Arc::new(move |msg: BusMessage| sink.lock().unwrap().push(msg));
    (handler, seen)
}

fn deregistered(seq: u64) -> ChangeEvent {
    ChangeEvent::new("lobby-1", seq, "instance-x", 0, EventKind::Deregistered)
}

#[tokio::test]
async fn subscriptions_survive_a_reconnect() {
    let hub = MemoryHub::new();
    let publisher = hub.client();
    let subscriber = hub.client();
    let (handler, seen) = collector();
    subscriber.subscribe("fleet", handler).await.unwrap();

    publisher.publish("fleet", &deregistered(1)).await.unwrap();
    subscriber.disconnect().await;
    publisher.publish("fleet", &deregistered(2)).await.unwrap();
    subscriber.reconnect().await;
    publisher.publish("fleet", &deregistered(3)).await.unwrap();

    let sequences: Vec<u64> = seen
        .lock()
        .unwrap()
        .iter()
        .map(|m| ChangeEvent::decode(&m.payload).unwrap().sequence)
        .collect();
    assert_eq!(sequences, vec![1, 3]);
}

#[tokio::test]
async fn disconnected_publisher_fails_fast() {
    let hub = MemoryHub::new();
    let publisher = hub.client();
    publisher.disconnect().await;
    assert!(!publisher.is_connected());
    let err = publisher.publish("fleet", &deregistered(1)).await.unwrap_err();
    assert!(matches!(err, SyncError::BusUnavailable(_)));
    assert!(err.is_unavailable());
}

#[tokio::test]
async fn topics_are_isolated() {
    let hub = MemoryHub::new();
    let client = hub.client();
    let (handler, seen) = collector();
    client.subscribe("fleet", handler).await.unwrap();

    assert_eq!(hub.inject("chat", "hello").await, 0);
    assert_eq!(hub.inject("fleet", "raw").await, 1);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].topic, "fleet");
    assert_eq!(seen[0].payload, "raw");
}
