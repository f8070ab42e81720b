//! `PathMemory` and `FlexibilityCalculator` (§3.2, §4.4).
//!
//! `PathMemory` is an append-only arena: events are indices into a `Vec`,
//! never owned pointers (§9 "Cyclic/temporal data"), so `revises_step` and
//! constraint `created_by` references stay valid even as the log grows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// A single append-only decision record (§3.2 "PathEvent").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathEvent {
    /// Index of this event in `PathMemory::events` — stable once appended.
    pub id: usize,
    pub timestamp: DateTime<Utc>,
    pub technique: String,
    pub step: u32,
    pub decision: String,
    pub options_opened: Vec<String>,
    pub options_closed: Vec<String>,
    pub reversibility_cost: f64,
    pub commitment_level: f64,
    pub constraints_created: Vec<String>,
    /// Present when this event revises an earlier one.
    pub revises_step: Option<usize>,
}

/// Input to `PathMemory::record`, before the event is assigned an id/timestamp.
#[derive(Debug, Clone, Default)]
pub struct PathEventInput {
    pub technique: String,
    pub step: u32,
    pub decision: String,
    pub options_opened: Vec<String>,
    pub options_closed: Vec<String>,
    pub reversibility_cost: f64,
    pub commitment_level: f64,
    pub constraints_created: Vec<String>,
    pub revises_step: Option<usize>,
}

/// `{flexibilityScore, reversibilityIndex, optionVelocity, commitmentDepth}` (§3.2).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FlexibilitySnapshot {
    pub flexibility_score: f64,
    pub reversibility_index: f64,
    pub option_velocity: f64,
    pub commitment_depth: f64,
}

const COMMITMENT_WINDOW: usize = 10;

/// Append-only decision log plus derived state, per §3.2/§4.4.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathMemory {
    path_history: Vec<PathEvent>,
    pub constraints: Vec<String>,
    pub flexibility_over_time: Vec<f64>,
    pub available_options: Vec<String>,
}

impl PathMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[PathEvent] {
        &self.path_history
    }

    pub fn len(&self) -> usize {
        self.path_history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.path_history.is_empty()
    }

    /// Append a new decision, validating ranges and revision ordering (§9
    /// open question: "implementers should reject out-of-range references").
    pub fn record(&mut self, input: PathEventInput) -> EngineResult<usize> {
        if !(0.0..=1.0).contains(&input.reversibility_cost) {
            return Err(EngineError::InvalidInput(format!(
                "reversibility_cost must be in [0,1], got {}",
                input.reversibility_cost
            )));
        }
        if !(0.0..=1.0).contains(&input.commitment_level) {
            return Err(EngineError::InvalidInput(format!(
                "commitment_level must be in [0,1], got {}",
                input.commitment_level
            )));
        }
        let id = self.path_history.len();
        if let Some(revises) = input.revises_step {
            if revises >= id {
                return Err(EngineError::InvalidInput(format!(
                    "revisesStep {revises} must refer to an earlier event (< {id})"
                )));
            }
        }

        for opened in &input.options_opened {
            if !self.available_options.contains(opened) {
                self.available_options.push(opened.clone());
            }
        }
        self.available_options
            .retain(|o| !input.options_closed.contains(o));
        self.constraints.extend(input.constraints_created.clone());

        let event = PathEvent {
            id,
            timestamp: Utc::now(),
            technique: input.technique,
            step: input.step,
            decision: input.decision,
            options_opened: input.options_opened,
            options_closed: input.options_closed,
            reversibility_cost: input.reversibility_cost,
            commitment_level: input.commitment_level,
            constraints_created: input.constraints_created,
            revises_step: input.revises_step,
        };
        self.path_history.push(event);

        let score = FlexibilityCalculator::score(self);
        self.flexibility_over_time.push(score);
        Ok(id)
    }

    pub fn snapshot(&self) -> FlexibilitySnapshot {
        FlexibilityCalculator::snapshot(self)
    }
}

/// Pure functions deriving a flexibility snapshot from a `PathMemory` log.
pub struct FlexibilityCalculator;

impl FlexibilityCalculator {
    /// `flexibilityScore = clamp(openOptions / (openOptions + closedWeighted), 0, 1)`,
    /// 1.0 when nothing has opened or closed yet (§4.4 tie-break).
    pub fn score(memory: &PathMemory) -> f64 {
        let open = memory.available_options.len() as f64;
        let closed_weighted: f64 = memory
            .events()
            .iter()
            .flat_map(|e| std::iter::repeat(e.reversibility_cost).take(e.options_closed.len()))
            .sum();
        if open == 0.0 && closed_weighted == 0.0 {
            return 1.0;
        }
        (open / (open + closed_weighted)).clamp(0.0, 1.0)
    }

    /// Mean `commitmentLevel` over the last `COMMITMENT_WINDOW` events.
    pub fn commitment_depth(memory: &PathMemory) -> f64 {
        let events = memory.events();
        if events.is_empty() {
            return 0.0;
        }
        let start = events.len().saturating_sub(COMMITMENT_WINDOW);
        let window = &events[start..];
        window.iter().map(|e| e.commitment_level).sum::<f64>() / window.len() as f64
    }

    /// `Δ(openOptions)/Δt`, normalized to `[-1, 1]` over the whole history.
    pub fn option_velocity(memory: &PathMemory) -> f64 {
        let events = memory.events();
        if events.len() < 2 {
            return 0.0;
        }
        let first = events.first().unwrap();
        let last = events.last().unwrap();
        let dt = (last.timestamp - first.timestamp).num_milliseconds().max(1) as f64;
        let net_opened = events.iter().map(|e| e.options_opened.len() as f64).sum::<f64>();
        let net_closed = events.iter().map(|e| e.options_closed.len() as f64).sum::<f64>();
        let raw = (net_opened - net_closed) / dt * 1000.0;
        raw.clamp(-1.0, 1.0)
    }

    /// `1 - mean(reversibilityCost)` over the whole history.
    pub fn reversibility_index(memory: &PathMemory) -> f64 {
        let events = memory.events();
        if events.is_empty() {
            return 1.0;
        }
        let mean = events.iter().map(|e| e.reversibility_cost).sum::<f64>() / events.len() as f64;
        (1.0 - mean).clamp(0.0, 1.0)
    }

    pub fn snapshot(memory: &PathMemory) -> FlexibilitySnapshot {
        FlexibilitySnapshot {
            flexibility_score: Self::score(memory),
            reversibility_index: Self::reversibility_index(memory),
            option_velocity: Self::option_velocity(memory),
            commitment_depth: Self::commitment_depth(memory),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(opened: &[&str], closed: &[&str], cost: f64) -> PathEventInput {
        PathEventInput {
            technique: "six_hats".into(),
            step: 1,
            decision: "d".into(),
            options_opened: opened.iter().map(|s| s.to_string()).collect(),
            options_closed: closed.iter().map(|s| s.to_string()).collect(),
            reversibility_cost: cost,
            commitment_level: 0.3,
            constraints_created: Vec::new(),
            revises_step: None,
        }
    }

    #[test]
    fn empty_memory_has_full_flexibility() {
        let memory = PathMemory::new();
        assert_eq!(FlexibilityCalculator::score(&memory), 1.0);
    }

    #[test]
    fn closing_without_opening_never_increases_score() {
        let mut memory = PathMemory::new();
        memory.record(input(&["a", "b", "c"], &[], 0.2)).unwrap();
        let before = memory.snapshot().flexibility_score;
        memory.record(input(&[], &["a"], 0.2)).unwrap();
        let after = memory.snapshot().flexibility_score;
        assert!(after <= before);
    }

    #[test]
    fn out_of_range_costs_rejected() {
        let mut memory = PathMemory::new();
        let err = memory.record(input(&[], &[], 1.5)).unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[test]
    fn revises_step_must_be_earlier() {
        let mut memory = PathMemory::new();
        let mut bad = input(&[], &[], 0.1);
        bad.revises_step = Some(0);
        let err = memory.record(bad).unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }
}
