use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use tokio::sync::{broadcast, Notify};
use tokio_stream::wrappers::BroadcastStream;

use crate::broker::Broker;
use crate::error::BusError;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
struct Inner {
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    notify: Notify,
}

/// In-process broker with the same ordering semantics as the Redis one.
/// Backs tests and broker-less deployments (`memory://`).
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        let mut channels = self.inner.channels.lock().expect("channel registry poisoned");
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Test hook: current length of one list.
    pub fn list_len(&self, key: &str) -> usize {
        self.inner
            .lists
            .lock()
            .expect("list registry poisoned")
            .get(key)
            .map(VecDeque::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn push_back(&self, key: &str, payload: String) -> Result<(), BusError> {
        self.inner
            .lists
            .lock()
            .expect("list registry poisoned")
            .entry(key.to_string())
            .or_default()
            .push_back(payload);
        self.inner.notify.notify_waiters();
        Ok(())
    }

    async fn push_front(&self, key: &str, payload: String) -> Result<(), BusError> {
        self.inner
            .lists
            .lock()
            .expect("list registry poisoned")
            .entry(key.to_string())
            .or_default()
            .push_front(payload);
        self.inner.notify.notify_waiters();
        Ok(())
    }

    async fn pop_first(
        &self,
        keys: &[String],
        timeout: Duration,
    ) -> Result<Option<(String, String)>, BusError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.inner.notify.notified();
            {
                let mut lists = self.inner.lists.lock().expect("list registry poisoned");
                for key in keys {
                    if let Some(payload) = lists.get_mut(key).and_then(VecDeque::pop_front) {
                        return Ok(Some((key.clone(), payload)));
                    }
                }
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
            }
        }
    }

    async fn publish(&self, channel: &str, payload: String) -> Result<(), BusError> {
        // A send with no receivers is fine: channels carry notifications,
        // not durable state.
        let _ = self.sender(channel).send(payload);
        Ok(())
    }

    async fn subscribe(
        &self,
        channels: &[String],
    ) -> Result<BoxStream<'static, (String, String)>, BusError> {
        let streams: Vec<BoxStream<'static, (String, String)>> = channels
            .iter()
            .map(|channel| {
                let name = channel.clone();
                BroadcastStream::new(self.sender(channel).subscribe())
                    .filter_map(move |result| {
                        let name = name.clone();
                        async move { result.ok().map(|payload| (name, payload)) }
                    })
                    .boxed()
            })
            .collect();
        Ok(stream::select_all(streams).boxed())
    }
}
