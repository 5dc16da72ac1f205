use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::error::InferenceError;

/// Lock-free per-lane counters. Owned by the router, read via snapshots.
#[derive(Debug, Default)]
pub struct LaneMetrics {
    attempts: AtomicU64,
    client_failures: AtomicU64,
    server_failures: AtomicU64,
    transport_failures: AtomicU64,
    total_tokens: AtomicU64,
    total_latency_ms: AtomicU64,
}

impl LaneMetrics {
    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, error: &InferenceError) {
        match error {
            InferenceError::UpstreamClient { .. } => {
                self.client_failures.fetch_add(1, Ordering::Relaxed);
            }
            InferenceError::UpstreamServer { .. } => {
                self.server_failures.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                self.transport_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn record_success(&self, tokens: usize, elapsed_ms: u64) {
        self.total_tokens.fetch_add(tokens as u64, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self, lane: &str) -> LaneMetricsSnapshot {
        let client_failures = self.client_failures.load(Ordering::Relaxed);
        let server_failures = self.server_failures.load(Ordering::Relaxed);
        let transport_failures = self.transport_failures.load(Ordering::Relaxed);
        LaneMetricsSnapshot {
            lane: lane.to_string(),
            attempts: self.attempts.load(Ordering::Relaxed),
            client_failures,
            server_failures,
            transport_failures,
            failures: client_failures + server_failures + transport_failures,
            total_tokens: self.total_tokens.load(Ordering::Relaxed),
            total_latency_ms: self.total_latency_ms.load(Ordering::Relaxed),
        }
    }
}

/// Read-only view of one lane's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaneMetricsSnapshot {
    pub lane: String,
    pub attempts: u64,
    pub client_failures: u64,
    pub server_failures: u64,
    pub transport_failures: u64,
    pub failures: u64,
    pub total_tokens: u64,
    pub total_latency_ms: u64,
}
