//! Peer discovery and the health ring.
//!
//! Discovery probes a configured candidate set concurrently, classifies
//! which services answer, and maintains the authoritative peer snapshot the
//! bus and router resolve targets against. The health ring runs explicit
//! check lists against named members and keeps a roll-up view.

mod discovery;
mod peer;
mod probe;
mod ring;

pub use discovery::{Discovery, DiscoveryConfig};
pub use peer::{Candidate, HealthCheck, Peer, PeerStatus};
pub use ring::{CheckResult, HealthRing, MemberHealth, RingMember, RingStatus};
