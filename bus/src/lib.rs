//! Priority task bus.
//!
//! Tasks travel through per-`(recipient, priority)` lists on a shared
//! broker; pub/sub channels carry only notifications and ephemeral fan-out
//! (heartbeats, addressed messages). The lists are the durable state: a
//! subscriber that reconnects resumes from them without any offset
//! bookkeeping.

mod broker;
mod bus;
mod error;
mod memory;
mod task;

pub use broker::{Broker, RedisBroker};
pub use bus::TaskBus;
pub use error::BusError;
pub use memory::InMemoryBroker;
pub use task::{
    heartbeat_channel, message_channel, notify_channel, task_list_key, BridgeMessage, Heartbeat,
    Task, TaskPriority,
};
