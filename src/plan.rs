//! Plan compilation (§3.2 "Plan", §4.1 `planThinkingSession`).

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::technique::TechniqueRegistry;

/// Opaque plan identifier, allocated by the engine and immutable thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(#[serde(with = "uuid::serde::compact")] pub Uuid);

impl PlanId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlanId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque parallel-group identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParallelGroupId(#[serde(with = "uuid::serde::compact")] pub Uuid);

impl ParallelGroupId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ParallelGroupId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ParallelGroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    Quick,
    Thorough,
    Comprehensive,
}

impl Default for Timeframe {
    fn default() -> Self {
        Timeframe::Thorough
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Sequential,
    Parallel,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Sequential
    }
}

/// One entry in a plan's cumulative workflow (§3.2 "workflow").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub technique: String,
    pub local_step: u32,
    pub cumulative_step: u32,
    pub description: String,
    pub expected_duration: String,
    pub risk_considerations: Vec<String>,
}

/// A single technique's slice of a parallel plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelPlan {
    pub plan_id: PlanId,
    pub techniques: Vec<String>,
    pub workflow: Vec<WorkflowStep>,
    pub can_execute_independently: bool,
    pub dependencies: Vec<PlanId>,
}

/// `{planId, problem, techniques[], mode, workflow[]}` (§3.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: PlanId,
    pub problem: String,
    pub techniques: Vec<String>,
    pub mode: ExecutionMode,
    pub workflow: Vec<WorkflowStep>,
    pub parallel_plans: Vec<ParallelPlan>,
}

impl Plan {
    pub fn total_steps(&self) -> u32 {
        self.workflow.len() as u32
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanRequest {
    pub problem: String,
    pub techniques: Vec<String>,
    pub objectives: Vec<String>,
    pub constraints: Vec<String>,
    pub timeframe: Option<Timeframe>,
    pub include_options: Option<bool>,
    pub execution_mode: Option<ExecutionMode>,
}

/// Compiles `(problem, techniques, mode)` into an ordered step list, or a
/// set of parallel plans with dependencies, per §3.2/§4.1.
pub struct PlanCompiler<'a> {
    registry: &'a TechniqueRegistry,
}

impl<'a> PlanCompiler<'a> {
    pub fn new(registry: &'a TechniqueRegistry) -> Self {
        Self { registry }
    }

    pub fn compile(&self, req: &PlanRequest) -> EngineResult<Plan> {
        if req.problem.trim().is_empty() {
            return Err(EngineError::InvalidInput("problem must not be empty".into()));
        }
        if req.techniques.is_empty() {
            return Err(EngineError::InvalidInput(
                "techniques must not be empty".into(),
            ));
        }
        for t in &req.techniques {
            if !self.registry.contains(t) {
                return Err(EngineError::InvalidTechnique(t.clone()));
            }
        }

        let mode = req.execution_mode.unwrap_or_default();
        let plan_id = PlanId::new();
        let workflow = self.build_workflow(&req.techniques)?;

        let parallel_plans = if mode == ExecutionMode::Parallel {
            self.build_parallel_plans(&req.techniques)?
        } else {
            Vec::new()
        };

        Ok(Plan {
            plan_id,
            problem: req.problem.clone(),
            techniques: req.techniques.clone(),
            mode,
            workflow,
            parallel_plans,
        })
    }

    /// Build the cumulative, strictly monotonic workflow (§3.2).
    fn build_workflow(&self, techniques: &[String]) -> EngineResult<Vec<WorkflowStep>> {
        let mut workflow = Vec::new();
        let mut cumulative = 0u32;
        for technique in techniques {
            let handler = self.registry.get(technique)?;
            for local_step in 1..=handler.total_steps() {
                cumulative += 1;
                let info = handler.step_info(local_step)?;
                workflow.push(WorkflowStep {
                    technique: technique.clone(),
                    local_step,
                    cumulative_step: cumulative,
                    description: info.description,
                    expected_duration: "5-10 minutes".to_string(),
                    risk_considerations: Vec::new(),
                });
            }
        }
        Ok(workflow)
    }

    /// One independent `ParallelPlan` per technique, each its own cumulative
    /// step sequence. Dependencies are empty unless the caller supplies a
    /// convergence technique, in which case it depends on every other plan.
    fn build_parallel_plans(&self, techniques: &[String]) -> EngineResult<Vec<ParallelPlan>> {
        let mut plans = Vec::new();
        let mut ids = HashMap::new();
        for technique in techniques {
            ids.insert(technique.clone(), PlanId::new());
        }

        for technique in techniques {
            let workflow = self.build_workflow(std::slice::from_ref(technique))?;
            let is_convergence = technique == "convergence";
            let dependencies = if is_convergence {
                ids.iter()
                    .filter(|(t, _)| *t != technique)
                    .map(|(_, id)| *id)
                    .collect()
            } else {
                Vec::new()
            };
            plans.push(ParallelPlan {
                plan_id: ids[technique],
                techniques: vec![technique.clone()],
                workflow,
                can_execute_independently: dependencies.is_empty(),
                dependencies,
            });
        }

        assert_acyclic(&plans)?;
        Ok(plans)
    }
}

/// Rejects cyclic dependency graphs at planning time (§3.2).
fn assert_acyclic(plans: &[ParallelPlan]) -> EngineResult<()> {
    let by_id: HashMap<PlanId, &ParallelPlan> = plans.iter().map(|p| (p.plan_id, p)).collect();

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }
    let mut marks: HashMap<PlanId, Mark> = HashMap::new();

    fn visit(
        id: PlanId,
        by_id: &HashMap<PlanId, &ParallelPlan>,
        marks: &mut HashMap<PlanId, Mark>,
        stack: &mut HashSet<PlanId>,
    ) -> EngineResult<()> {
        if marks.get(&id) == Some(&Mark::Done) {
            return Ok(());
        }
        if !stack.insert(id) {
            return Err(EngineError::InvalidInput(format!(
                "cyclic dependency detected at plan {id}"
            )));
        }
        if let Some(plan) = by_id.get(&id) {
            for dep in &plan.dependencies {
                visit(*dep, by_id, marks, stack)?;
            }
        }
        stack.remove(&id);
        marks.insert(id, Mark::Done);
        Ok(())
    }

    for plan in plans {
        let mut stack = HashSet::new();
        visit(plan.plan_id, &by_id, &mut marks, &mut stack)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::technique::TechniqueRegistry;

    #[test]
    fn sequential_plan_has_monotonic_cumulative_steps() {
        let registry = TechniqueRegistry::with_builtins();
        let compiler = PlanCompiler::new(&registry);
        let plan = compiler
            .compile(&PlanRequest {
                problem: "Foster innovation in risk-averse team".into(),
                techniques: vec!["six_hats".into()],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(plan.workflow.len(), 6);
        for (i, step) in plan.workflow.iter().enumerate() {
            assert_eq!(step.cumulative_step, (i + 1) as u32);
        }
    }

    #[test]
    fn unknown_technique_rejected() {
        let registry = TechniqueRegistry::with_builtins();
        let compiler = PlanCompiler::new(&registry);
        let err = compiler
            .compile(&PlanRequest {
                problem: "x".into(),
                techniques: vec!["does_not_exist".into()],
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_TECHNIQUE");
    }

    #[test]
    fn empty_problem_rejected() {
        let registry = TechniqueRegistry::with_builtins();
        let compiler = PlanCompiler::new(&registry);
        let err = compiler
            .compile(&PlanRequest {
                problem: "".into(),
                techniques: vec!["six_hats".into()],
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }
}
