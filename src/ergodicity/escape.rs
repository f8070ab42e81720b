//! `EscapeVelocitySystem`: ordered recovery protocols (§4.6).

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::path_memory::{PathEventInput, PathMemory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Protocol {
    PatternInterruption,
    ResourceReallocation,
    StakeholderReset,
    TechnicalRefactoring,
    StrategicPivot,
}

impl Protocol {
    /// Ascending order matches escalation strength (§4.6).
    pub const ALL: [Protocol; 5] = [
        Protocol::PatternInterruption,
        Protocol::ResourceReallocation,
        Protocol::StakeholderReset,
        Protocol::TechnicalRefactoring,
        Protocol::StrategicPivot,
    ];

    /// Minimum `currentFlexibility` required to invoke this protocol.
    pub fn flexibility_floor(self) -> f64 {
        match self {
            Protocol::PatternInterruption => 0.00,
            Protocol::ResourceReallocation => 0.20,
            Protocol::StakeholderReset => 0.30,
            Protocol::TechnicalRefactoring => 0.35,
            Protocol::StrategicPivot => 0.50,
        }
    }

    /// 1-based escalation level; levels >= 3 require explicit user approval.
    pub fn level(self) -> u8 {
        Protocol::ALL.iter().position(|p| *p == self).unwrap() as u8 + 1
    }

    pub fn requires_approval(self) -> bool {
        self.level() >= 3
    }

    fn flexibility_gain(self) -> f64 {
        match self {
            Protocol::PatternInterruption => 0.05,
            Protocol::ResourceReallocation => 0.10,
            Protocol::StakeholderReset => 0.15,
            Protocol::TechnicalRefactoring => 0.20,
            Protocol::StrategicPivot => 0.30,
        }
    }
}

/// Inputs to an escape attempt (§4.6 "EscapeContext").
#[derive(Debug, Clone)]
pub struct EscapeContext {
    pub current_flexibility: f64,
    pub trigger_reason: String,
    pub user_approval: bool,
    pub automatic_mode: bool,
    /// Protocol level (1-5) the caller's risk assessment judges necessary;
    /// automatic mode picks the cheapest protocol that still meets it.
    pub escape_force_needed: u8,
}

/// `{success, protocol, flexibilityGained, constraintsRemoved[], newOptionsCreated[], executionNotes[]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscapeResult {
    pub success: bool,
    pub protocol: Protocol,
    pub flexibility_gained: f64,
    pub constraints_removed: Vec<String>,
    pub new_options_created: Vec<String>,
    pub execution_notes: Vec<String>,
}

pub struct EscapeVelocitySystem;

impl EscapeVelocitySystem {
    /// Execute a specific protocol against `path_memory`, appending a
    /// PathEvent crediting the simulated flexibility gain.
    pub fn execute(
        path_memory: &mut PathMemory,
        protocol: Protocol,
        ctx: &EscapeContext,
    ) -> EngineResult<EscapeResult> {
        if ctx.current_flexibility < protocol.flexibility_floor() {
            return Err(EngineError::InsufficientFlexibility {
                required: protocol.flexibility_floor(),
                actual: ctx.current_flexibility,
            });
        }
        if protocol.requires_approval() && !ctx.user_approval {
            return Err(EngineError::Blocked(format!(
                "{protocol:?} requires explicit user approval (level {})",
                protocol.level()
            )));
        }

        let gain = protocol.flexibility_gain();
        let new_option = format!("{protocol:?}::recovered-option");
        let constraint_removed = format!("{protocol:?}::relieved-constraint");

        path_memory.record(PathEventInput {
            technique: "escape_velocity".to_string(),
            step: 0,
            decision: format!("invoked {protocol:?} for: {}", ctx.trigger_reason),
            options_opened: vec![new_option.clone()],
            options_closed: Vec::new(),
            reversibility_cost: (1.0 - gain).clamp(0.0, 1.0),
            commitment_level: 0.2,
            constraints_created: Vec::new(),
            revises_step: None,
        })?;

        Ok(EscapeResult {
            success: true,
            protocol,
            flexibility_gained: gain,
            constraints_removed: vec![constraint_removed],
            new_options_created: vec![new_option],
            execution_notes: vec![format!(
                "{protocol:?} executed at flexibility {:.2}, gained {:.2}",
                ctx.current_flexibility, gain
            )],
        })
    }

    /// Select the weakest protocol meeting both the flexibility floor and
    /// the caller's assessed force requirement, then execute it.
    pub fn execute_automatic(
        path_memory: &mut PathMemory,
        ctx: &EscapeContext,
    ) -> EngineResult<EscapeResult> {
        let chosen = Protocol::ALL
            .into_iter()
            .find(|p| {
                p.level() >= ctx.escape_force_needed
                    && ctx.current_flexibility >= p.flexibility_floor()
                    && (!p.requires_approval() || ctx.user_approval)
            })
            .ok_or_else(|| EngineError::InsufficientFlexibility {
                required: ctx.escape_force_needed as f64 / Protocol::ALL.len() as f64,
                actual: ctx.current_flexibility,
            })?;
        Self::execute(path_memory, chosen, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(flexibility: f64, approval: bool) -> EscapeContext {
        EscapeContext {
            current_flexibility: flexibility,
            trigger_reason: "critical risk".into(),
            user_approval: approval,
            automatic_mode: false,
            escape_force_needed: 1,
        }
    }

    #[test]
    fn strategic_pivot_below_floor_is_insufficient_flexibility() {
        let mut memory = PathMemory::new();
        let err = EscapeVelocitySystem::execute(&mut memory, Protocol::StrategicPivot, &ctx(0.05, true))
            .unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_FLEXIBILITY");
    }

    #[test]
    fn pattern_interruption_succeeds_at_floor() {
        let mut memory = PathMemory::new();
        let result =
            EscapeVelocitySystem::execute(&mut memory, Protocol::PatternInterruption, &ctx(0.05, false))
                .unwrap();
        assert!(result.success);
        assert!(result.flexibility_gained > 0.0);
    }

    #[test]
    fn high_level_protocol_requires_approval() {
        let mut memory = PathMemory::new();
        let err = EscapeVelocitySystem::execute(&mut memory, Protocol::StakeholderReset, &ctx(0.9, false))
            .unwrap_err();
        assert_eq!(err.code(), "BLOCKED_ACTION");
    }

    #[test]
    fn automatic_mode_picks_minimum_sufficient_protocol() {
        let mut memory = PathMemory::new();
        let mut context = ctx(0.25, false);
        context.automatic_mode = true;
        context.escape_force_needed = 2;
        let result = EscapeVelocitySystem::execute_automatic(&mut memory, &context).unwrap();
        assert_eq!(result.protocol, Protocol::ResourceReallocation);
    }
}
