use std::sync::Arc;
use std::time::Duration;

use cortex_fabric::{ChannelForwarder, ConnectionState, Event, FabricClient, WILDCARD};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;

/// Minimal in-process fabric endpoint: pushes the frames it is given to
/// every connected client and records what clients send.
async fn spawn_server() -> (String, mpsc::Sender<String>, mpsc::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(32);
    let (inbound_tx, inbound_rx) = mpsc::channel::<String>(32);

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let (mut sink, mut reader) = ws.split();
        loop {
            tokio::select! {
                frame = outbound_rx.recv() => match frame {
                    Some(frame) => {
                        if sink.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                incoming = reader.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let _ = inbound_tx.send(text).await;
                    }
                    Some(Ok(_)) => {}
                    _ => break,
                },
            }
        }
    });

    (format!("ws://{addr}"), outbound_tx, inbound_rx)
}

fn frame(kind: &str) -> String {
    serde_json::to_string(&Event::broadcast(kind, "server", serde_json::json!({"n": 1}))).unwrap()
}

async fn recv_event(rx: &mut mpsc::Receiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event within deadline")
        .expect("channel open")
}

#[tokio::test]
async fn typed_and_wildcard_handlers_fire_from_the_wire() {
    let (url, server_tx, _server_rx) = spawn_server().await;
    let client = FabricClient::new(url, "test-agent");
    client.connect().await.unwrap();

    let (typed_tx, mut typed_rx) = mpsc::channel(8);
    let (wild_tx, mut wild_rx) = mpsc::channel(8);
    client.subscribe("x", Arc::new(ChannelForwarder::new(typed_tx)));
    client.subscribe(WILDCARD, Arc::new(ChannelForwarder::new(wild_tx)));

    server_tx.send(frame("x")).await.unwrap();
    assert_eq!(recv_event(&mut typed_rx).await.kind, "x");
    assert_eq!(recv_event(&mut wild_rx).await.kind, "x");

    server_tx.send(frame("y")).await.unwrap();
    assert_eq!(recv_event(&mut wild_rx).await.kind, "y");
    let nothing = tokio::time::timeout(Duration::from_millis(200), typed_rx.recv()).await;
    assert!(nothing.is_err(), "typed handler must not see other types");

    client.disconnect().await;
}

#[tokio::test]
async fn publish_reaches_the_server_only_when_connected() {
    let (url, _server_tx, mut server_rx) = spawn_server().await;
    let client = FabricClient::new(url, "test-agent");

    let event = Event::broadcast("status", "test-agent", serde_json::json!({"ok": true}));
    let err = client.publish(&event).await.unwrap_err();
    assert!(matches!(err, cortex_fabric::FabricError::NotConnected));

    client.connect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);
    client.publish(&event).await.unwrap();

    let raw = tokio::time::timeout(Duration::from_secs(5), server_rx.recv())
        .await
        .unwrap()
        .unwrap();
    let parsed: Event = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed.kind, "status");
    assert_eq!(parsed.source, "test-agent");

    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Closed);
    let err = client.publish(&event).await.unwrap_err();
    assert!(matches!(err, cortex_fabric::FabricError::NotConnected));
}

#[tokio::test]
async fn connect_is_idempotent_when_already_connected() {
    let (url, _server_tx, _server_rx) = spawn_server().await;
    let client = FabricClient::new(url, "test-agent");
    client.connect().await.unwrap();
    client.connect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);
    client.disconnect().await;
}

#[tokio::test]
async fn connect_failure_is_surfaced_and_state_reset() {
    // Nothing listens here.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = FabricClient::new(format!("ws://{addr}"), "test-agent");
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, cortex_fabric::FabricError::Connect(_)));
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn events_published_before_subscribing_are_not_backfilled() {
    let (url, server_tx, _server_rx) = spawn_server().await;
    let client = FabricClient::new(url, "test-agent");
    client.connect().await.unwrap();

    // Frame arrives while nobody subscribes to its type: dropped.
    server_tx.send(frame("early")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (tx, mut rx) = mpsc::channel(8);
    client.subscribe("early", Arc::new(ChannelForwarder::new(tx)));
    let nothing = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(nothing.is_err(), "no backfill of earlier events");

    // Later frames of the same type do arrive.
    server_tx.send(frame("early")).await.unwrap();
    assert_eq!(recv_event(&mut rx).await.kind, "early");

    client.disconnect().await;
}

#[tokio::test]
async fn malformed_frames_are_dropped_and_the_stream_continues() {
    let (url, server_tx, _server_rx) = spawn_server().await;
    let client = FabricClient::new(url, "test-agent");
    client.connect().await.unwrap();

    let (tx, mut rx) = mpsc::channel(8);
    client.subscribe("x", Arc::new(ChannelForwarder::new(tx)));

    server_tx.send("{definitely not json".into()).await.unwrap();
    server_tx.send(frame("x")).await.unwrap();
    assert_eq!(recv_event(&mut rx).await.kind, "x");

    client.disconnect().await;
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let (url, server_tx, _server_rx) = spawn_server().await;
    let client = FabricClient::new(url, "test-agent");
    client.connect().await.unwrap();

    let (tx, mut rx) = mpsc::channel(8);
    client.subscribe("x", Arc::new(ChannelForwarder::new(tx)));
    assert_eq!(client.unsubscribe("x"), 1);

    server_tx.send(frame("x")).await.unwrap();
    let nothing = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(nothing.is_err());

    client.disconnect().await;
}
