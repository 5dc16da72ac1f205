use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chrono::Utc;
use cortex_core::retry::{sleep_cancellable, Backoff};

use crate::broker::Broker;
use crate::error::BusError;
use crate::task::{
    heartbeat_channel, message_channel, notify_channel, task_list_key, BridgeMessage, Heartbeat,
    Task, TaskPriority,
};

const POP_DEADLINE: Duration = Duration::from_secs(1);
const DELIVERY_BACKPRESSURE: Duration = Duration::from_secs(30);
const DELIVERY_CHANNEL_CAPACITY: usize = 32;

/// Agent-facing handle over the broker. Cloning shares the underlying
/// connection.
#[derive(Clone)]
pub struct TaskBus {
    broker: Arc<dyn Broker>,
    agent: String,
    backpressure: Duration,
}

impl TaskBus {
    pub fn new(broker: Arc<dyn Broker>, agent_name: impl Into<String>) -> Self {
        Self {
            broker,
            agent: agent_name.into(),
            backpressure: DELIVERY_BACKPRESSURE,
        }
    }

    /// How long a stalled receiver may block delivery before the task is
    /// re-queued at the head of its list.
    pub fn with_backpressure(mut self, timeout: Duration) -> Self {
        self.backpressure = timeout;
        self
    }

    pub fn agent_name(&self) -> &str {
        &self.agent
    }

    /// Publish a task. Returns only after the payload is durably enqueued
    /// on the recipient's priority list; the notify publish afterwards is
    /// best-effort since subscribers poll the lists anyway.
    pub async fn publish_task(&self, task: &Task) -> Result<(), BusError> {
        let payload = serde_json::to_string(task)?;
        let key = task_list_key(&task.to, task.priority);
        self.broker.push_back(&key, payload).await?;
        if let Err(err) = self
            .broker
            .publish(&notify_channel(&task.to), task.id.clone())
            .await
        {
            warn!(task = %task.id, error = %err, "task notify publish failed");
        }
        debug!(task = %task.id, to = %task.to, priority = %task.priority, "task published");
        Ok(())
    }

    /// Stream of tasks addressed to this agent in strict priority order,
    /// FIFO within a priority. One cooperative reader drains the four
    /// priority lists with a short blocking pop per iteration; broker
    /// outages trigger exponential-backoff retries against the same lists.
    pub fn subscribe_tasks(&self, cancel: CancellationToken) -> mpsc::Receiver<Task> {
        let (tx, rx) = mpsc::channel(DELIVERY_CHANNEL_CAPACITY);
        let broker = Arc::clone(&self.broker);
        let keys: Vec<String> = TaskPriority::DELIVERY_ORDER
            .iter()
            .map(|priority| task_list_key(&self.agent, *priority))
            .collect();
        let agent = self.agent.clone();
        let backpressure = self.backpressure;

        tokio::spawn(async move {
            let mut backoff = Backoff::reconnect();
            loop {
                let popped = tokio::select! {
                    _ = cancel.cancelled() => break,
                    popped = broker.pop_first(&keys, POP_DEADLINE) => popped,
                };
                match popped {
                    Ok(Some((key, payload))) => {
                        backoff.reset();
                        let task: Task = match serde_json::from_str(&payload) {
                            Ok(task) => task,
                            Err(err) => {
                                warn!(%key, error = %err, "dropping malformed task frame");
                                continue;
                            }
                        };
                        match tx.send_timeout(task, backpressure).await {
                            Ok(()) => {}
                            Err(SendTimeoutError::Timeout(_)) => {
                                // Receiver is stalled: give the task back to
                                // the head of its list and pause until the
                                // channel has room again.
                                warn!(agent = %agent, "delivery backpressure, re-queueing task");
                                if let Err(err) = broker.push_front(&key, payload).await {
                                    warn!(error = %err, "failed to re-queue task");
                                }
                                tokio::select! {
                                    _ = cancel.cancelled() => break,
                                    permit = tx.reserve() => {
                                        if permit.is_err() {
                                            break;
                                        }
                                    }
                                }
                            }
                            Err(SendTimeoutError::Closed(_)) => {
                                if let Err(err) = broker.push_front(&key, payload).await {
                                    warn!(error = %err, "failed to re-queue task");
                                }
                                break;
                            }
                        }
                    }
                    Ok(None) => continue,
                    Err(err) => {
                        let delay = backoff.next_delay();
                        warn!(
                            agent = %agent,
                            error = %err,
                            retry_in_secs = delay.as_secs(),
                            "broker pop failed, backing off"
                        );
                        if !sleep_cancellable(delay, &cancel).await {
                            break;
                        }
                    }
                }
            }
            info!(agent = %agent, "task subscriber stopped");
        });
        rx
    }

    /// Broadcast a heartbeat to every agent on the shared channel.
    pub async fn send_heartbeat(
        &self,
        status: &str,
        data: Map<String, Value>,
    ) -> Result<(), BusError> {
        let heartbeat = Heartbeat {
            agent: self.agent.clone(),
            status: status.to_string(),
            data,
            timestamp: Utc::now(),
        };
        let payload = serde_json::to_string(&heartbeat)?;
        self.broker.publish(heartbeat_channel(), payload).await
    }

    /// Stream of heartbeats from all agents. No ordering guarantee beyond
    /// per-sender monotonicity.
    pub fn subscribe_heartbeats(&self, cancel: CancellationToken) -> mpsc::Receiver<Heartbeat> {
        self.subscribe_channel(heartbeat_channel().to_string(), cancel)
    }

    /// Addressed small-payload message outside the priority lists.
    pub async fn send_message(
        &self,
        from: &str,
        to: &str,
        kind: &str,
        content: Value,
    ) -> Result<BridgeMessage, BusError> {
        let message = BridgeMessage::new(from, to, kind, content);
        let payload = serde_json::to_string(&message)?;
        self.broker.publish(&message_channel(to), payload).await?;
        Ok(message)
    }

    /// Stream of addressed messages for this agent.
    pub fn subscribe_messages(&self, cancel: CancellationToken) -> mpsc::Receiver<BridgeMessage> {
        self.subscribe_channel(message_channel(&self.agent), cancel)
    }

    fn subscribe_channel<T>(&self, channel: String, cancel: CancellationToken) -> mpsc::Receiver<T>
    where
        T: serde::de::DeserializeOwned + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(DELIVERY_CHANNEL_CAPACITY);
        let broker = Arc::clone(&self.broker);
        tokio::spawn(async move {
            let mut backoff = Backoff::reconnect();
            'outer: loop {
                let channels = vec![channel.clone()];
                let mut stream = match broker.subscribe(&channels).await {
                    Ok(stream) => {
                        backoff.reset();
                        stream
                    }
                    Err(err) => {
                        let delay = backoff.next_delay();
                        warn!(%channel, error = %err, "broker subscribe failed, backing off");
                        if !sleep_cancellable(delay, &cancel).await {
                            break;
                        }
                        continue;
                    }
                };
                loop {
                    let next = tokio::select! {
                        _ = cancel.cancelled() => break 'outer,
                        next = futures::StreamExt::next(&mut stream) => next,
                    };
                    match next {
                        Some((_, payload)) => match serde_json::from_str::<T>(&payload) {
                            Ok(parsed) => {
                                if tx.send(parsed).await.is_err() {
                                    break 'outer;
                                }
                            }
                            Err(err) => {
                                warn!(%channel, error = %err, "dropping malformed frame");
                            }
                        },
                        // Stream ended: the broker connection dropped.
                        None => {
                            let delay = backoff.next_delay();
                            warn!(%channel, "subscription stream ended, reconnecting");
                            if !sleep_cancellable(delay, &cancel).await {
                                break 'outer;
                            }
                            continue 'outer;
                        }
                    }
                }
            }
        });
        rx
    }
}
