//! Integration tests against a real Redis broker. Run with a local server:
//! `cargo test -p cortex_bus -- --ignored`

use std::sync::Arc;
use std::time::Duration;

use cortex_bus::{RedisBroker, Task, TaskBus, TaskPriority};
use serde_json::Map;
use tokio_util::sync::CancellationToken;

const REDIS_URL: &str = "redis://127.0.0.1:6379";

#[tokio::test]
#[ignore]
async fn redis_round_trip_preserves_priority_order() {
    let broker = Arc::new(RedisBroker::connect(REDIS_URL).await.expect("redis up"));
    let bus = TaskBus::new(broker, "live-test-receiver");

    for priority in [TaskPriority::Low, TaskPriority::Critical] {
        let task = Task::new("live-test", "live-test-receiver", priority, "ping", Map::new());
        bus.publish_task(&task).await.unwrap();
    }

    let cancel = CancellationToken::new();
    let mut rx = bus.subscribe_tasks(cancel.clone());
    let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.priority, TaskPriority::Critical);
    let second = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.priority, TaskPriority::Low);
    cancel.cancel();
}
