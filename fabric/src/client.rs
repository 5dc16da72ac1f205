use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cortex_core::retry::{sleep_cancellable, Backoff};

use crate::dispatch::{EventHandler, HandlerRegistry};
use crate::event::Event;

const WRITE_CHANNEL_CAPACITY: usize = 64;
const SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    Closed,
}

#[derive(Debug, Error)]
pub enum FabricError {
    #[error("not connected")]
    NotConnected,

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("send failed: {0}")]
    Send(String),
}

struct Shared {
    state: Mutex<ConnectionState>,
    writer: Mutex<Option<mpsc::Sender<Message>>>,
    registry: HandlerRegistry,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }
}

/// One fabric connection per process. `connect` establishes the socket and
/// spawns a supervisor that keeps it alive with exponential backoff until
/// `disconnect` is called. Events missed while disconnected are lost; the
/// fabric is not a log.
pub struct FabricClient {
    url: String,
    source: String,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl FabricClient {
    pub fn new(url: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            source: source.into(),
            shared: Arc::new(Shared {
                state: Mutex::new(ConnectionState::Disconnected),
                writer: Mutex::new(None),
                registry: HandlerRegistry::new(),
            }),
            cancel: CancellationToken::new(),
            supervisor: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.shared.registry
    }

    /// Establish the connection. Idempotent when already connected; the
    /// first failure is surfaced to the caller, later ones go through the
    /// reconnect supervisor.
    pub async fn connect(&self) -> Result<(), FabricError> {
        {
            let mut state = self.shared.state.lock();
            match *state {
                ConnectionState::Connected | ConnectionState::Connecting => return Ok(()),
                // Disconnect is terminal for this client instance.
                ConnectionState::Closing | ConnectionState::Closed => {
                    return Err(FabricError::NotConnected)
                }
                ConnectionState::Disconnected => *state = ConnectionState::Connecting,
            }
        }

        let (socket, _) = match connect_async(self.url.as_str()).await {
            Ok(connected) => connected,
            Err(err) => {
                self.shared.set_state(ConnectionState::Disconnected);
                return Err(FabricError::Connect(err.to_string()));
            }
        };
        info!(url = %self.url, "fabric connected");

        let (writer_tx, writer_rx) = mpsc::channel(WRITE_CHANNEL_CAPACITY);
        *self.shared.writer.lock() = Some(writer_tx);
        self.shared.set_state(ConnectionState::Connected);

        let shared = Arc::clone(&self.shared);
        let url = self.url.clone();
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(supervise(shared, url, cancel, socket, writer_rx));
        *self.supervisor.lock() = Some(handle);
        Ok(())
    }

    /// Serialize and write one frame. Requires the Connected state.
    pub async fn publish(&self, event: &Event) -> Result<(), FabricError> {
        if self.state() != ConnectionState::Connected {
            return Err(FabricError::NotConnected);
        }
        let frame = serde_json::to_string(event)?;
        let writer = self.shared.writer.lock().clone();
        match writer {
            Some(tx) => tx
                .send(Message::Text(frame))
                .await
                .map_err(|err| FabricError::Send(err.to_string())),
            None => Err(FabricError::NotConnected),
        }
    }

    pub fn subscribe(&self, kind: &str, handler: Arc<dyn EventHandler>) -> u64 {
        self.shared.registry.subscribe(kind, handler)
    }

    pub fn unsubscribe(&self, kind: &str) -> usize {
        self.shared.registry.unsubscribe(kind)
    }

    /// Tear the connection down for good. Never reconnects afterwards; all
    /// background tasks exit within the shutdown grace period.
    pub async fn disconnect(&self) {
        self.shared.set_state(ConnectionState::Closing);
        self.cancel.cancel();
        let handle = self.supervisor.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                warn!("fabric supervisor did not stop within the grace period");
            }
        }
        *self.shared.writer.lock() = None;
        self.shared.set_state(ConnectionState::Closed);
        info!("fabric disconnected");
    }
}

/// Owns the connection lifecycle: run a session until the socket dies,
/// then sleep with backoff and redial, until cancelled.
async fn supervise(
    shared: Arc<Shared>,
    url: String,
    cancel: CancellationToken,
    first: WsStream,
    first_writer_rx: mpsc::Receiver<Message>,
) {
    let mut backoff = Backoff::reconnect();
    let mut session = Some((first, first_writer_rx));
    loop {
        let (ws, writer_rx) = match session.take() {
            Some(pair) => pair,
            None => {
                shared.set_state(ConnectionState::Connecting);
                match connect_async(url.as_str()).await {
                    Ok((ws, _)) => {
                        info!(url = %url, "fabric reconnected");
                        backoff.reset();
                        let (writer_tx, writer_rx) = mpsc::channel(WRITE_CHANNEL_CAPACITY);
                        *shared.writer.lock() = Some(writer_tx);
                        shared.set_state(ConnectionState::Connected);
                        (ws, writer_rx)
                    }
                    Err(err) => {
                        shared.set_state(ConnectionState::Disconnected);
                        let delay = backoff.next_delay();
                        warn!(error = %err, retry_in_secs = delay.as_secs(), "fabric reconnect failed");
                        if !sleep_cancellable(delay, &cancel).await {
                            break;
                        }
                        continue;
                    }
                }
            }
        };

        run_session(ws, writer_rx, &shared.registry, &cancel).await;
        *shared.writer.lock() = None;

        if cancel.is_cancelled() {
            break;
        }
        shared.set_state(ConnectionState::Disconnected);
        let delay = backoff.next_delay();
        debug!(retry_in_secs = delay.as_secs(), "fabric session ended, scheduling reconnect");
        if !sleep_cancellable(delay, &cancel).await {
            break;
        }
    }
}

/// Single select loop per session. The writer half is fed only through the
/// channel (single-writer discipline); the reader half owns the socket
/// reads, drops unparseable frames, and treats read errors as abnormal
/// close.
async fn run_session(
    ws: WsStream,
    mut writer_rx: mpsc::Receiver<Message>,
    registry: &HandlerRegistry,
    cancel: &CancellationToken,
) {
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            outbound = writer_rx.recv() => {
                match outbound {
                    Some(message) => {
                        if let Err(err) = sink.send(message).await {
                            warn!(error = %err, "fabric write failed");
                            break;
                        }
                    }
                    None => break,
                }
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<Event>(&text) {
                            Ok(event) => registry.dispatch(&event).await,
                            Err(err) => warn!(error = %err, "dropping malformed fabric frame"),
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("fabric socket closed by peer");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(error = %err, "fabric read failed, treating as abnormal close");
                        break;
                    }
                }
            }
        }
    }
}
