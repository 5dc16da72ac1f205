//! Cortex gateway - the uniform external surface over the swarm.
//!
//! One axum router exposes discovery, the health ring, the inference
//! router, the task bus bridge and the attention blackboard, mirrors
//! fabric events over SSE, and reverse-proxies the websocket endpoint.
//! Collaborator services (memory storage, onboarding) are forwarded, not
//! reimplemented.

pub mod collab;
pub mod routes;
pub mod sse;
pub mod state;
pub mod tasks;
pub mod ws_proxy;

pub use routes::{build_router, ApiError};
pub use state::AppState;
