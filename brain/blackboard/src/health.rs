use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::board::Blackboard;
use crate::item::Zone;

/// Health status ordering matters: `max` of two statuses is the worse one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthDimension {
    pub name: &'static str,
    pub status: HealthStatus,
    pub score: f64,
    pub detail: String,
}

/// Derived report; computed fresh on every call, never stored.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub score: f64,
    pub utilization: HealthDimension,
    pub zone_balance: HealthDimension,
    pub age: HealthDimension,
    pub reasons: Vec<String>,
}

/// Classifies blackboard health along three dimensions: budget pressure,
/// zone balance (a dominating Supporting zone means stale middle content),
/// and item freshness.
pub struct HealthEngine {
    age_threshold: Duration,
}

const UTILIZATION_WEIGHT: f64 = 0.5;
const BALANCE_WEIGHT: f64 = 0.3;
const AGE_WEIGHT: f64 = 0.2;

impl Default for HealthEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthEngine {
    pub fn new() -> Self {
        Self {
            age_threshold: Duration::minutes(10),
        }
    }

    pub fn with_age_threshold(mut self, threshold: Duration) -> Self {
        self.age_threshold = threshold;
        self
    }

    pub fn classify(&self, board: &Blackboard) -> HealthReport {
        self.classify_at(board, Utc::now())
    }

    /// Deterministic variant taking an explicit clock reading.
    pub fn classify_at(&self, board: &Blackboard, now: DateTime<Utc>) -> HealthReport {
        let stats = board.stats();
        let utilization = classify_utilization(stats.utilization);

        let supporting_share = if stats.total_used == 0 {
            0.0
        } else {
            stats.zone(Zone::Supporting).used as f64 / stats.total_used as f64
        };
        let zone_balance = classify_balance(supporting_share);

        let items = board.all_items();
        let stale = items
            .iter()
            .filter(|item| item.age(now) > self.age_threshold)
            .count();
        let stale_share = if items.is_empty() {
            0.0
        } else {
            stale as f64 / items.len() as f64
        };
        let age = classify_age(stale_share, stale);

        let status = utilization
            .status
            .max(zone_balance.status)
            .max(age.status);
        let score = (utilization.score * UTILIZATION_WEIGHT
            + zone_balance.score * BALANCE_WEIGHT
            + age.score * AGE_WEIGHT)
            .clamp(0.0, 100.0);

        let reasons = [&utilization, &zone_balance, &age]
            .into_iter()
            .filter(|dimension| dimension.status != HealthStatus::Healthy)
            .map(|dimension| format!("{}: {}", dimension.name, dimension.detail))
            .collect();

        HealthReport {
            status,
            score,
            utilization,
            zone_balance,
            age,
            reasons,
        }
    }
}

fn classify_utilization(utilization: f64) -> HealthDimension {
    // Exactly 0.70 is still healthy; degradation starts strictly above it.
    let status = if utilization >= 0.85 {
        HealthStatus::Critical
    } else if utilization > 0.70 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };
    HealthDimension {
        name: "utilization",
        status,
        score: ((1.0 - utilization) * 100.0).clamp(0.0, 100.0),
        detail: format!("{:.0}% of the token budget in use", utilization * 100.0),
    }
}

fn classify_balance(supporting_share: f64) -> HealthDimension {
    let status = if supporting_share >= 0.80 {
        HealthStatus::Critical
    } else if supporting_share >= 0.60 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };
    HealthDimension {
        name: "zone_balance",
        status,
        score: ((1.0 - supporting_share) * 100.0).clamp(0.0, 100.0),
        detail: format!(
            "supporting zone holds {:.0}% of used tokens",
            supporting_share * 100.0
        ),
    }
}

fn classify_age(stale_share: f64, stale_count: usize) -> HealthDimension {
    let status = if stale_share >= 0.80 {
        HealthStatus::Critical
    } else if stale_share >= 0.50 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };
    HealthDimension {
        name: "age",
        status,
        score: ((1.0 - stale_share) * 100.0).clamp(0.0, 100.0),
        detail: format!("{stale_count} items older than the freshness threshold"),
    }
}
