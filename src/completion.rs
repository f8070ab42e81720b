//! `CompletionTracker` and `CompletionGatekeeper` (§4.9).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::config::EnforcementLevel;
use crate::plan::Plan;

/// A caller's self-reported completion status for the current step (§4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionStatus {
    pub overall_progress: f64,
    pub next_step_needed: bool,
    pub critical_gaps_identified: Vec<String>,
    pub executed_techniques: Vec<String>,
    pub skipped_techniques: Vec<String>,
}

/// `{blocked:true, title, reason, completionStatus, requiredActions[], suggestions[], override?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedResponse {
    pub blocked: bool,
    pub title: String,
    pub reason: String,
    pub completion_status: CompletionStatus,
    pub required_actions: Vec<String>,
    pub suggestions: Vec<String>,
    #[serde(rename = "override")]
    pub override_flag: Option<ForceOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForceOverride {
    pub force_complete: bool,
    pub consequences: String,
}

/// Pure decision function over a reported completion status and the
/// configured enforcement level.
pub struct CompletionGatekeeper {
    pub level: EnforcementLevel,
    pub minimum_completion_threshold: f64,
    pub require_confirmation_threshold: f64,
}

impl CompletionGatekeeper {
    pub fn new(level: EnforcementLevel, minimum: f64, confirm: f64) -> Self {
        Self {
            level,
            minimum_completion_threshold: minimum,
            require_confirmation_threshold: confirm,
        }
    }

    /// Returns `Some(response)` if the gatekeeper blocks the requested
    /// early termination, `None` to allow it.
    pub fn check(&self, status: &CompletionStatus, total_steps: u32) -> Option<BlockedResponse> {
        if status.next_step_needed {
            return None;
        }

        let required_actions_from_progress = |threshold: f64| -> Vec<String> {
            let completed = (status.overall_progress * total_steps as f64).round() as u32;
            let remaining = total_steps.saturating_sub(completed);
            vec![format!(
                "Complete {remaining} more step{} to reach {:.0}% overall progress",
                if remaining == 1 { "" } else { "s" },
                threshold * 100.0
            )]
        };

        match self.level {
            EnforcementLevel::None => None,
            EnforcementLevel::Lenient => {
                if status.overall_progress < self.minimum_completion_threshold {
                    Some(BlockedResponse {
                        blocked: false,
                        title: "Completion warning".to_string(),
                        reason: format!(
                            "Overall progress {:.0}% is below the recommended {:.0}% threshold",
                            status.overall_progress * 100.0,
                            self.minimum_completion_threshold * 100.0
                        ),
                        completion_status: status.clone(),
                        required_actions: Vec::new(),
                        suggestions: vec!["Consider completing remaining steps before finishing".into()],
                        override_flag: None,
                    })
                } else {
                    None
                }
            }
            EnforcementLevel::Standard => {
                let blocks = status.overall_progress < 0.30 || !status.critical_gaps_identified.is_empty();
                if blocks {
                    Some(BlockedResponse {
                        blocked: true,
                        title: "Synthesis blocked".to_string(),
                        reason: if !status.critical_gaps_identified.is_empty() {
                            format!("Critical gaps identified: {}", status.critical_gaps_identified.join(", "))
                        } else {
                            "Overall progress is below the 30% minimum".to_string()
                        },
                        completion_status: status.clone(),
                        required_actions: required_actions_from_progress(0.30),
                        suggestions: vec!["Address the identified gaps before proceeding".into()],
                        override_flag: Some(ForceOverride {
                            force_complete: false,
                            consequences: "Forcing completion will skip outstanding analysis".into(),
                        }),
                    })
                } else if status.overall_progress < self.require_confirmation_threshold {
                    Some(BlockedResponse {
                        blocked: false,
                        title: "Confirmation required".to_string(),
                        reason: format!(
                            "Overall progress {:.0}% is below the confirmation threshold {:.0}%",
                            status.overall_progress * 100.0,
                            self.require_confirmation_threshold * 100.0
                        ),
                        completion_status: status.clone(),
                        required_actions: Vec::new(),
                        suggestions: vec!["Confirm early completion is intentional".into()],
                        override_flag: None,
                    })
                } else {
                    None
                }
            }
            EnforcementLevel::Strict => {
                if status.overall_progress < self.minimum_completion_threshold {
                    Some(BlockedResponse {
                        blocked: true,
                        title: "Synthesis blocked".to_string(),
                        reason: format!(
                            "Overall progress {:.0}% is below the required {:.0}% threshold",
                            status.overall_progress * 100.0,
                            self.minimum_completion_threshold * 100.0
                        ),
                        completion_status: status.clone(),
                        required_actions: required_actions_from_progress(self.minimum_completion_threshold),
                        suggestions: vec!["Complete remaining steps before requesting synthesis".into()],
                        override_flag: Some(ForceOverride {
                            force_complete: false,
                            consequences: "Forcing completion under STRICT enforcement skips required analysis".into(),
                        }),
                    })
                } else {
                    None
                }
            }
        }
    }

    /// Every technique in the plan must have >=1 executed step unless
    /// explicitly marked skipped, before synthesis may proceed (§4.9).
    pub fn can_proceed_to_synthesis(&self, plan: &Plan, status: &CompletionStatus) -> bool {
        let executed: HashSet<&str> = status.executed_techniques.iter().map(String::as_str).collect();
        let skipped: HashSet<&str> = status.skipped_techniques.iter().map(String::as_str).collect();
        plan.techniques
            .iter()
            .all(|t| executed.contains(t.as_str()) || skipped.contains(t.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{ExecutionMode, Plan, PlanId};

    fn plan() -> Plan {
        Plan {
            plan_id: PlanId::new(),
            problem: "p".into(),
            techniques: vec!["six_hats".into()],
            mode: ExecutionMode::Sequential,
            workflow: (1..=6)
                .map(|n| crate::plan::WorkflowStep {
                    technique: "six_hats".into(),
                    local_step: n,
                    cumulative_step: n,
                    description: "d".into(),
                    expected_duration: "5m".into(),
                    risk_considerations: vec![],
                })
                .collect(),
            parallel_plans: vec![],
        }
    }

    fn status(progress: f64, next_step_needed: bool) -> CompletionStatus {
        CompletionStatus {
            overall_progress: progress,
            next_step_needed,
            critical_gaps_identified: vec![],
            executed_techniques: vec![],
            skipped_techniques: vec![],
        }
    }

    #[test]
    fn strict_blocks_below_minimum_threshold() {
        let gatekeeper = CompletionGatekeeper::new(EnforcementLevel::Strict, 0.60, 0.80);
        let response = gatekeeper.check(&status(0.33, false), 6).unwrap();
        assert!(response.blocked);
        assert_eq!((response.completion_status.overall_progress * 100.0).round() as i32, 33);
        assert!(response.required_actions[0].contains("Complete 4 more steps"));
    }

    #[test]
    fn none_level_never_blocks() {
        let gatekeeper = CompletionGatekeeper::new(EnforcementLevel::None, 0.60, 0.80);
        assert!(gatekeeper.check(&status(0.0, false), 6).is_none());
    }

    #[test]
    fn next_step_needed_short_circuits_every_level() {
        let gatekeeper = CompletionGatekeeper::new(EnforcementLevel::Strict, 0.60, 0.80);
        assert!(gatekeeper.check(&status(0.0, true), 6).is_none());
    }

    #[test]
    fn synthesis_requires_every_technique_executed_or_skipped() {
        let gatekeeper = CompletionGatekeeper::new(EnforcementLevel::Standard, 0.60, 0.80);
        let mut s = status(1.0, false);
        assert!(!gatekeeper.can_proceed_to_synthesis(&plan(), &s));
        s.executed_techniques.push("six_hats".into());
        assert!(gatekeeper.can_proceed_to_synthesis(&plan(), &s));
    }
}
