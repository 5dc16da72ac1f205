use serde::Serialize;

/// Compaction triggers surfaced to the integrator. `Budget75`/`Budget90`
/// are edge-triggered on upward crossings; `PhaseComplete` is fired on an
/// explicit phase-boundary signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Budget75,
    Budget90,
    PhaseComplete,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Budget75 => "budget_75",
            Trigger::Budget90 => "budget_90",
            Trigger::PhaseComplete => "phase_complete",
        }
    }
}

struct Threshold {
    trigger: Trigger,
    level: f64,
    armed: bool,
}

/// Tracks utilization crossings. Each threshold fires at most once per
/// crossing and re-arms only after utilization drops back below it.
pub struct TriggerSet {
    thresholds: Vec<Threshold>,
}

impl Default for TriggerSet {
    fn default() -> Self {
        Self::new()
    }
}

impl TriggerSet {
    pub fn new() -> Self {
        Self {
            thresholds: vec![
                Threshold {
                    trigger: Trigger::Budget75,
                    level: 0.75,
                    armed: true,
                },
                Threshold {
                    trigger: Trigger::Budget90,
                    level: 0.90,
                    armed: true,
                },
            ],
        }
    }

    /// Feed the current utilization; returns the triggers that fire now.
    pub fn observe(&mut self, utilization: f64) -> Vec<Trigger> {
        let mut fired = Vec::new();
        for threshold in &mut self.thresholds {
            if utilization >= threshold.level {
                if threshold.armed {
                    threshold.armed = false;
                    fired.push(threshold.trigger);
                }
            } else {
                threshold.armed = true;
            }
        }
        fired
    }

    /// External phase-boundary signal; always fires.
    pub fn phase_complete(&mut self) -> Trigger {
        Trigger::PhaseComplete
    }
}
