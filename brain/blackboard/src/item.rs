use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Attention zone an item lives in. Immutable after insertion; moving an
/// item between zones is remove + add.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    Critical,
    Supporting,
    Actionable,
}

impl Zone {
    pub const ALL: [Zone; 3] = [Zone::Critical, Zone::Supporting, Zone::Actionable];

    pub fn as_str(&self) -> &'static str {
        match self {
            Zone::Critical => "critical",
            Zone::Supporting => "supporting",
            Zone::Actionable => "actionable",
        }
    }
}

impl std::fmt::Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single unit of working memory. Token count never changes after
/// creation; `touched_at` is the only field mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextItem {
    pub id: String,
    pub source: String,
    pub category: String,
    pub zone: Zone,
    pub priority: f64,
    pub tokens: usize,
    pub created_at: DateTime<Utc>,
    pub touched_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decay_rate: Option<f64>,
}

impl ContextItem {
    pub fn new(
        source: impl Into<String>,
        category: impl Into<String>,
        zone: Zone,
        priority: f64,
        tokens: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            source: source.into(),
            category: category.into(),
            zone,
            priority: priority.clamp(0.0, 1.0),
            tokens,
            created_at: now,
            touched_at: now,
            decay_rate: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Per-minute exponential freshness decay. None leaves the stored
    /// priority untouched.
    pub fn with_decay(mut self, rate: f64) -> Self {
        self.decay_rate = Some(rate.max(0.0));
        self
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }

    /// `stored_priority × decay(age)`. With no decay rate the factor is 1,
    /// so the effective priority equals the stored one.
    pub fn effective_priority(&self, now: DateTime<Utc>) -> f64 {
        match self.decay_rate {
            None => self.priority,
            Some(rate) => {
                let minutes = self.age(now).num_milliseconds().max(0) as f64 / 60_000.0;
                self.priority * (-rate * minutes).exp()
            }
        }
    }
}
