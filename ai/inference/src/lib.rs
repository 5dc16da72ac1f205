//! Inference router.
//!
//! Requests name a lane, a model, or nothing at all; the router resolves
//! the lane, converts the canonical request into that lane's wire dialect,
//! retries transient upstream failures, and keeps per-lane counters.

pub mod adapters;
mod error;
mod lane;
mod metrics;
mod router;
mod types;

pub use error::InferenceError;
pub use lane::{Lane, ProviderKind};
pub use metrics::{LaneMetrics, LaneMetricsSnapshot};
pub use router::{EngineInfo, InferenceRouter, ModelInfo, RouterConfig};
pub use types::{InferenceRequest, InferenceResponse};
