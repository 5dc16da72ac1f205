//! Event fabric client.
//!
//! One long-lived websocket per process carries typed JSON events in both
//! directions. Subscriptions are local: handlers registered here see frames
//! that arrive after they subscribe; the fabric is not a persistent log and
//! nothing is replayed across reconnects.

mod client;
mod dispatch;
mod event;

pub use client::{ConnectionState, FabricClient, FabricError};
pub use dispatch::{ChannelForwarder, EventHandler, HandlerRegistry};
pub use event::{Event, WILDCARD};
