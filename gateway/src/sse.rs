use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures_util::stream::Stream;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use cortex_fabric::{ChannelForwarder, HandlerRegistry};

use crate::state::AppState;

const EVENT_BUFFER: usize = 32;
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Drops the fabric subscription when the SSE stream goes away.
struct SubscriptionGuard {
    registry: HandlerRegistry,
    kind: String,
    id: u64,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.registry.unsubscribe_id(&self.kind, self.id);
    }
}

/// Mirror fabric events of one type as an SSE channel. Frames follow the
/// standard `event:`/`data:` shape with a blank-line terminator; axum
/// flushes each one as it is produced, and keepalive comments flow on an
/// interval so proxies keep the stream open.
pub async fn events(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let registry = state.fabric.registry().clone();
    let id = registry.subscribe(&kind, Arc::new(ChannelForwarder::new(tx)));
    let guard = SubscriptionGuard {
        registry,
        kind,
        id,
    };

    let stream = ReceiverStream::new(rx).map(move |event| {
        // The guard rides inside the closure so dropping the stream
        // unsubscribes.
        let _ = &guard;
        let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok(SseEvent::default().event(event.kind.clone()).data(data))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEPALIVE_INTERVAL)
            .text("keep-alive"),
    )
}
