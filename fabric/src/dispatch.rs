use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::warn;

use crate::event::{Event, WILDCARD};

/// A subscriber callback. Handlers for one event run in parallel and a
/// failing handler never blocks the others.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event) -> anyhow::Result<()>;
}

type HandlerEntry = (u64, Arc<dyn EventHandler>);

/// Type → handlers map with wildcard support. Dispatch is awaited per
/// event, so handlers of a given type observe events in arrival order.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    inner: Arc<RwLock<HashMap<String, Vec<HandlerEntry>>>>,
    next_id: Arc<AtomicU64>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; the returned id can drop this registration
    /// alone via [`unsubscribe_id`](Self::unsubscribe_id).
    pub fn subscribe(&self, kind: &str, handler: Arc<dyn EventHandler>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .write()
            .entry(kind.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    /// Remove every handler registered for a type. Returns how many were
    /// dropped.
    pub fn unsubscribe(&self, kind: &str) -> usize {
        self.inner
            .write()
            .remove(kind)
            .map(|handlers| handlers.len())
            .unwrap_or(0)
    }

    pub fn unsubscribe_id(&self, kind: &str, id: u64) {
        let mut inner = self.inner.write();
        if let Some(handlers) = inner.get_mut(kind) {
            handlers.retain(|(entry_id, _)| *entry_id != id);
            if handlers.is_empty() {
                inner.remove(kind);
            }
        }
    }

    fn handlers_for(&self, kind: &str) -> Vec<Arc<dyn EventHandler>> {
        let inner = self.inner.read();
        let mut handlers = Vec::new();
        if let Some(entries) = inner.get(kind) {
            handlers.extend(entries.iter().map(|(_, handler)| Arc::clone(handler)));
        }
        if kind != WILDCARD {
            if let Some(entries) = inner.get(WILDCARD) {
                handlers.extend(entries.iter().map(|(_, handler)| Arc::clone(handler)));
            }
        }
        handlers
    }

    /// Run every matching handler concurrently and wait for all of them.
    /// Errors (and panics) are isolated per handler.
    pub async fn dispatch(&self, event: &Event) {
        let handlers = self.handlers_for(&event.kind);
        if handlers.is_empty() {
            return;
        }
        let mut join_set = JoinSet::new();
        for handler in handlers {
            let event = event.clone();
            join_set.spawn(async move { handler.handle(event).await });
        }
        while let Some(outcome) = join_set.join_next().await {
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(kind = %event.kind, error = %err, "event handler failed"),
                Err(err) => warn!(kind = %event.kind, error = %err, "event handler panicked"),
            }
        }
    }
}

/// Handler that forwards events into an mpsc channel; the bridge between
/// the registry and stream consumers such as SSE endpoints.
pub struct ChannelForwarder {
    tx: mpsc::Sender<Event>,
}

impl ChannelForwarder {
    pub fn new(tx: mpsc::Sender<Event>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl EventHandler for ChannelForwarder {
    async fn handle(&self, event: Event) -> anyhow::Result<()> {
        // A dropped receiver is a consumer that went away, not a fault.
        let _ = self.tx.send(event).await;
        Ok(())
    }
}
