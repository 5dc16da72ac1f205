use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use cortex_blackboard::{Blackboard, Compactor, HealthEngine};
use cortex_bus::TaskBus;
use cortex_discovery::{Discovery, HealthRing};
use cortex_fabric::FabricClient;
use cortex_inference::InferenceRouter;
use cortex_observability::MetricsExporter;

use crate::collab::CollaboratorClient;

#[derive(Default)]
pub struct ReadinessState {
    ready: AtomicBool,
}

impl ReadinessState {
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

/// Everything the HTTP surface needs, shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub discovery: Arc<Discovery>,
    pub ring: Option<Arc<HealthRing>>,
    pub bus: TaskBus,
    pub inference: Arc<InferenceRouter>,
    pub fabric: Arc<FabricClient>,
    pub blackboard: Arc<Blackboard>,
    pub health_engine: Arc<HealthEngine>,
    pub compactor: Arc<Compactor>,
    pub collaborators: Arc<CollaboratorClient>,
    /// Absent when another recorder already owns the process (tests).
    pub metrics: Option<MetricsExporter>,
    pub readiness: Arc<ReadinessState>,
    pub started_at: Instant,
    pub ws_upstream: Option<String>,
}

impl AppState {
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
