use std::collections::HashMap;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

use crate::item::{ContextItem, Zone};

/// Token budgets per zone. Total budget is the sum of the three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ZoneLimits {
    pub critical: usize,
    pub supporting: usize,
    pub actionable: usize,
}

impl ZoneLimits {
    pub fn budget(&self) -> usize {
        self.critical + self.supporting + self.actionable
    }

    fn limit(&self, zone: Zone) -> usize {
        match zone {
            Zone::Critical => self.critical,
            Zone::Supporting => self.supporting,
            Zone::Actionable => self.actionable,
        }
    }
}

impl Default for ZoneLimits {
    fn default() -> Self {
        Self {
            critical: 2000,
            supporting: 4000,
            actionable: 2000,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum BlackboardError {
    #[error("zone {zone} full: {requested} tokens requested, {available} available")]
    ZoneFull {
        zone: Zone,
        requested: usize,
        available: usize,
    },
    #[error("item token count must be positive")]
    EmptyItem,
    #[error("duplicate item id {0}")]
    DuplicateId(String),
}

#[derive(Debug, Default)]
struct ZoneBuffer {
    used: usize,
    // Insertion order; ids resolve through `Inner::items`.
    order: Vec<String>,
}

#[derive(Debug, Default)]
struct Inner {
    critical: ZoneBuffer,
    supporting: ZoneBuffer,
    actionable: ZoneBuffer,
    items: HashMap<String, ContextItem>,
}

impl Inner {
    fn buffer(&self, zone: Zone) -> &ZoneBuffer {
        match zone {
            Zone::Critical => &self.critical,
            Zone::Supporting => &self.supporting,
            Zone::Actionable => &self.actionable,
        }
    }

    fn buffer_mut(&mut self, zone: Zone) -> &mut ZoneBuffer {
        match zone {
            Zone::Critical => &mut self.critical,
            Zone::Supporting => &mut self.supporting,
            Zone::Actionable => &mut self.actionable,
        }
    }
}

/// Per-zone usage snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ZoneStats {
    pub limit: usize,
    pub used: usize,
    pub count: usize,
}

/// Whole-board snapshot. `PartialEq` so tests can assert state equality
/// across mutation round-trips.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlackboardStats {
    pub critical: ZoneStats,
    pub supporting: ZoneStats,
    pub actionable: ZoneStats,
    pub total_used: usize,
    pub budget: usize,
    pub utilization: f64,
    pub count: usize,
}

impl BlackboardStats {
    pub fn zone(&self, zone: Zone) -> ZoneStats {
        match zone {
            Zone::Critical => self.critical,
            Zone::Supporting => self.supporting,
            Zone::Actionable => self.actionable,
        }
    }
}

/// The zoned working-memory store. One mutex guards the whole structure;
/// every operation is short and non-blocking, and all reads return copies.
pub struct Blackboard {
    limits: ZoneLimits,
    inner: Mutex<Inner>,
}

impl Blackboard {
    pub fn new(limits: ZoneLimits) -> Self {
        Self {
            limits,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn limits(&self) -> ZoneLimits {
        self.limits
    }

    pub fn budget(&self) -> usize {
        self.limits.budget()
    }

    /// Insert into the item's nominated zone. Rejects when the remaining
    /// zone budget is smaller than the item; never evicts to make room.
    pub fn add(&self, item: ContextItem) -> Result<(), BlackboardError> {
        if item.tokens == 0 {
            return Err(BlackboardError::EmptyItem);
        }
        let mut inner = self.inner.lock();
        if inner.items.contains_key(&item.id) {
            return Err(BlackboardError::DuplicateId(item.id));
        }
        let limit = self.limits.limit(item.zone);
        let buffer = inner.buffer(item.zone);
        let available = limit - buffer.used;
        if item.tokens > available {
            return Err(BlackboardError::ZoneFull {
                zone: item.zone,
                requested: item.tokens,
                available,
            });
        }
        let zone = item.zone;
        let id = item.id.clone();
        let tokens = item.tokens;
        let buffer = inner.buffer_mut(zone);
        buffer.used += tokens;
        buffer.order.push(id.clone());
        inner.items.insert(id, item);
        Ok(())
    }

    /// Returns true iff the item existed.
    pub fn remove(&self, id: &str) -> bool {
        let mut inner = self.inner.lock();
        let Some(item) = inner.items.remove(id) else {
            return false;
        };
        let buffer = inner.buffer_mut(item.zone);
        buffer.used -= item.tokens;
        buffer.order.retain(|entry| entry != id);
        true
    }

    /// Refresh the last-touched instant. Timestamp only; the stored
    /// priority is never changed implicitly.
    pub fn touch(&self, id: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.items.get_mut(id) {
            Some(item) => {
                item.touched_at = Utc::now();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<ContextItem> {
        self.inner.lock().items.get(id).cloned()
    }

    /// Snapshot of a zone in insertion order. Copies; holders never see
    /// later mutations.
    pub fn get_zone(&self, zone: Zone) -> Vec<ContextItem> {
        let inner = self.inner.lock();
        inner
            .buffer(zone)
            .order
            .iter()
            .filter_map(|id| inner.items.get(id).cloned())
            .collect()
    }

    /// Snapshot of every item across zones.
    pub fn all_items(&self) -> Vec<ContextItem> {
        let inner = self.inner.lock();
        Zone::ALL
            .iter()
            .flat_map(|zone| inner.buffer(*zone).order.iter())
            .filter_map(|id| inner.items.get(id).cloned())
            .collect()
    }

    pub fn stats(&self) -> BlackboardStats {
        let inner = self.inner.lock();
        let zone_stats = |zone: Zone| {
            let buffer = inner.buffer(zone);
            ZoneStats {
                limit: self.limits.limit(zone),
                used: buffer.used,
                count: buffer.order.len(),
            }
        };
        let critical = zone_stats(Zone::Critical);
        let supporting = zone_stats(Zone::Supporting);
        let actionable = zone_stats(Zone::Actionable);
        let total_used = critical.used + supporting.used + actionable.used;
        let budget = self.limits.budget();
        BlackboardStats {
            critical,
            supporting,
            actionable,
            total_used,
            budget,
            utilization: if budget == 0 {
                0.0
            } else {
                total_used as f64 / budget as f64
            },
            count: inner.items.len(),
        }
    }
}
