use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::debug;

use crate::board::Blackboard;
use crate::health::HealthStatus;
use crate::item::Zone;

/// Knobs for a prune pass. Items with a stored priority at or above
/// `protect_priority` are never candidates.
#[derive(Debug, Clone)]
pub struct PruneConfig {
    pub target_utilization: f64,
    pub min_prune_count: usize,
    pub protect_priority: f64,
    pub supporting_first: bool,
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            target_utilization: 0.70,
            min_prune_count: 3,
            protect_priority: 0.90,
            supporting_first: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PrunedItem {
    pub id: String,
    pub zone: Zone,
    pub tokens: usize,
    pub priority: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PruneResult {
    pub pruned: Vec<PrunedItem>,
    pub removed_critical: usize,
    pub removed_supporting: usize,
    pub removed_actionable: usize,
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub tokens_freed: usize,
    pub utilization_before: f64,
    pub utilization_after: f64,
    pub duration_ms: u64,
}

impl PruneResult {
    fn no_op(tokens: usize, utilization: f64, started: Instant) -> Self {
        Self {
            pruned: Vec::new(),
            removed_critical: 0,
            removed_supporting: 0,
            removed_actionable: 0,
            tokens_before: tokens,
            tokens_after: tokens,
            tokens_freed: 0,
            utilization_before: utilization,
            utilization_after: utilization,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// Deterministic, priority-aware pruning. Compaction never fails; when the
/// board is already under target it is a no-op.
pub struct Compactor {
    config: PruneConfig,
}

impl Default for Compactor {
    fn default() -> Self {
        Self::new(PruneConfig::default())
    }
}

impl Compactor {
    pub fn new(config: PruneConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PruneConfig {
        &self.config
    }

    /// Prune down to the configured target utilization.
    pub fn prune(&self, board: &Blackboard) -> PruneResult {
        let target_tokens =
            (board.budget() as f64 * self.config.target_utilization).floor() as usize;
        self.prune_to_target(board, target_tokens)
    }

    /// Prune down to an explicit token target.
    pub fn prune_to_target(&self, board: &Blackboard, target_tokens: usize) -> PruneResult {
        let started = Instant::now();
        let before = board.stats();
        if before.total_used <= target_tokens {
            return PruneResult::no_op(before.total_used, before.utilization, started);
        }
        let tokens_to_free = before.total_used - target_tokens;

        let now = Utc::now();
        let mut candidates: Vec<_> = board
            .all_items()
            .into_iter()
            .filter(|item| item.priority < self.config.protect_priority)
            .map(|item| {
                let effective = item.effective_priority(now);
                (item, effective)
            })
            .collect();

        if self.config.supporting_first {
            candidates.sort_by(|(a, ea), (b, eb)| {
                let zone_rank = |zone: Zone| usize::from(zone != Zone::Supporting);
                zone_rank(a.zone)
                    .cmp(&zone_rank(b.zone))
                    .then(ea.total_cmp(eb))
            });
        } else {
            candidates.sort_by(|(_, ea), (_, eb)| ea.total_cmp(eb));
        }

        let mut pruned = Vec::new();
        let mut freed = 0usize;
        for (item, _) in candidates {
            if freed >= tokens_to_free && pruned.len() >= self.config.min_prune_count {
                break;
            }
            if board.remove(&item.id) {
                freed += item.tokens;
                pruned.push(PrunedItem {
                    id: item.id,
                    zone: item.zone,
                    tokens: item.tokens,
                    priority: item.priority,
                });
            }
        }

        let after = board.stats();
        let zone_tally = |zone: Zone| pruned.iter().filter(|item| item.zone == zone).count();
        let result = PruneResult {
            removed_critical: zone_tally(Zone::Critical),
            removed_supporting: zone_tally(Zone::Supporting),
            removed_actionable: zone_tally(Zone::Actionable),
            pruned,
            tokens_before: before.total_used,
            tokens_after: after.total_used,
            tokens_freed: freed,
            utilization_before: before.utilization,
            utilization_after: after.utilization,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        debug!(
            freed = result.tokens_freed,
            removed = result.pruned.len(),
            utilization = result.utilization_after,
            "compaction pass finished"
        );
        result
    }

    /// Policy layer over the primitive: the worse the health status, the
    /// more aggressive the utilization target.
    pub fn target_for(status: HealthStatus) -> f64 {
        match status {
            HealthStatus::Critical => 0.50,
            HealthStatus::Degraded => 0.60,
            HealthStatus::Healthy => 0.70,
        }
    }

    pub fn prune_for_health(&self, board: &Blackboard, status: HealthStatus) -> PruneResult {
        let target_tokens = (board.budget() as f64 * Self::target_for(status)).floor() as usize;
        self.prune_to_target(board, target_tokens)
    }
}
