use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::BusError;

/// The broker abstraction the bus is written against: ordered key→list
/// storage with a blocking multi-key pop, plus fire-and-forget pub/sub
/// channels. `pop_first` must check `keys` in order and return the first
/// element available, which is what makes the priority drain atomic.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    async fn push_back(&self, key: &str, payload: String) -> Result<(), BusError>;

    /// Re-queue at the head, ahead of everything already in the list.
    async fn push_front(&self, key: &str, payload: String) -> Result<(), BusError>;

    /// Blocking pop across `keys` in order with a deadline. `None` on
    /// timeout.
    async fn pop_first(
        &self,
        keys: &[String],
        timeout: Duration,
    ) -> Result<Option<(String, String)>, BusError>;

    async fn publish(&self, channel: &str, payload: String) -> Result<(), BusError>;

    /// Subscribe to channels; yields `(channel, payload)` pairs.
    async fn subscribe(
        &self,
        channels: &[String],
    ) -> Result<BoxStream<'static, (String, String)>, BusError>;
}

/// Redis realization: BLPOP already checks keys in argument order, RPUSH/
/// LPUSH give us tail-enqueue and head-requeue, and pub/sub carries the
/// notification channels.
pub struct RedisBroker {
    client: redis::Client,
    manager: ConnectionManager,
}

impl RedisBroker {
    pub async fn connect(address: &str) -> Result<Self, BusError> {
        let client = redis::Client::open(address)?;
        let manager = ConnectionManager::new(client.clone()).await?;
        Ok(Self { client, manager })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn push_back(&self, key: &str, payload: String) -> Result<(), BusError> {
        let mut conn = self.manager.clone();
        conn.rpush::<_, _, ()>(key, payload).await?;
        Ok(())
    }

    async fn push_front(&self, key: &str, payload: String) -> Result<(), BusError> {
        let mut conn = self.manager.clone();
        conn.lpush::<_, _, ()>(key, payload).await?;
        Ok(())
    }

    async fn pop_first(
        &self,
        keys: &[String],
        timeout: Duration,
    ) -> Result<Option<(String, String)>, BusError> {
        let mut conn = self.manager.clone();
        let popped: Option<(String, String)> = conn
            .blpop(keys, timeout.as_secs().max(1) as f64)
            .await?;
        Ok(popped)
    }

    async fn publish(&self, channel: &str, payload: String) -> Result<(), BusError> {
        let mut conn = self.manager.clone();
        conn.publish::<_, _, ()>(channel, payload).await?;
        Ok(())
    }

    async fn subscribe(
        &self,
        channels: &[String],
    ) -> Result<BoxStream<'static, (String, String)>, BusError> {
        let conn = self.client.get_async_connection().await?;
        let mut pubsub = conn.into_pubsub();
        for channel in channels {
            pubsub.subscribe(channel).await?;
        }
        let stream = pubsub
            .into_on_message()
            .filter_map(|message| async move {
                let channel = message.get_channel_name().to_string();
                message
                    .get_payload::<String>()
                    .ok()
                    .map(|payload| (channel, payload))
            })
            .boxed();
        Ok(stream)
    }
}
