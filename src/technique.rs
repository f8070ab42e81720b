//! `TechniqueRegistry` port (§4.3).
//!
//! A technique handler is a small, stateless, deterministic table of step
//! names and guidance strings. Real content (six hats, SCAMPER, TRIZ, ...)
//! lives outside this crate — the registry here is the seam an embedding
//! application plugs handlers into. Two handlers (`six_hats`, `convergence`)
//! ship for tests and as a worked example of the trait contract.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{EngineError, EngineResult};

/// Per-step descriptive metadata a handler returns for a local step.
#[derive(Debug, Clone)]
pub struct StepInfo {
    pub name: String,
    pub focus: String,
    pub emoji: String,
    pub description: String,
}

/// A technique implementation: stateless, deterministic given its inputs.
pub trait TechniqueHandler: Send + Sync {
    fn id(&self) -> &'static str;
    fn name(&self) -> &'static str;
    fn emoji(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn total_steps(&self) -> u32;

    fn step_info(&self, local_step: u32) -> EngineResult<StepInfo>;
    fn step_guidance(&self, local_step: u32, problem: &str) -> EngineResult<String>;

    /// Structural validation of a step's input payload. Returning `Ok(false)`
    /// (rather than `Err`) records the step but flags it as invalid per the
    /// execute pipeline's step 5 (over-long-step backwards-compat behavior).
    fn validate_step(&self, local_step: u32, data: &Value) -> EngineResult<bool>;

    /// Deterministic insight extraction from accumulated free-text outputs.
    fn extract_insights(&self, history_outputs: &[String]) -> Vec<String>;

    /// Extra prompt-template context for this local step (opaque to us).
    fn prompt_context(&self, local_step: u32) -> HashMap<String, Value>;
}

/// Lookup of handler by technique id.
#[derive(Clone, Default)]
pub struct TechniqueRegistry {
    handlers: HashMap<String, Arc<dyn TechniqueHandler>>,
}

impl TechniqueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the two handlers this crate ships.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register(Arc::new(SixHatsHandler));
        reg.register(Arc::new(ConvergenceHandler));
        reg
    }

    pub fn register(&mut self, handler: Arc<dyn TechniqueHandler>) {
        self.handlers.insert(handler.id().to_string(), handler);
    }

    pub fn get(&self, technique: &str) -> EngineResult<Arc<dyn TechniqueHandler>> {
        self.handlers
            .get(technique)
            .cloned()
            .ok_or_else(|| EngineError::TechniqueNotFound(technique.to_string()))
    }

    pub fn contains(&self, technique: &str) -> bool {
        self.handlers.contains_key(technique)
    }

    pub fn step_count(&self, technique: &str) -> EngineResult<u32> {
        Ok(self.get(technique)?.total_steps())
    }

    pub fn ids(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

/// Six Thinking Hats, a 6-step sequential technique (+ optional blue-hat close).
pub struct SixHatsHandler;

const HAT_NAMES: [&str; 6] = ["blue", "white", "red", "black", "yellow", "green"];

impl TechniqueHandler for SixHatsHandler {
    fn id(&self) -> &'static str {
        "six_hats"
    }
    fn name(&self) -> &'static str {
        "Six Thinking Hats"
    }
    fn emoji(&self) -> &'static str {
        "🎩"
    }
    fn description(&self) -> &'static str {
        "Parallel thinking across six perspectives: process, facts, feelings, caution, benefits, creativity."
    }
    fn total_steps(&self) -> u32 {
        6
    }

    fn step_info(&self, local_step: u32) -> EngineResult<StepInfo> {
        let idx = (local_step as usize).checked_sub(1).ok_or_else(|| {
            EngineError::InvalidStep(format!("six_hats step must be >= 1, got {local_step}"))
        })?;
        let hat = HAT_NAMES
            .get(idx)
            .ok_or_else(|| EngineError::InvalidStep(format!("six_hats has no step {local_step}")))?;
        Ok(StepInfo {
            name: format!("{hat} hat"),
            focus: hat.to_string(),
            emoji: "🎩".to_string(),
            description: format!("Think from the {hat} hat's perspective."),
        })
    }

    fn step_guidance(&self, local_step: u32, problem: &str) -> EngineResult<String> {
        let info = self.step_info(local_step)?;
        Ok(format!(
            "Wearing the {} hat, consider: {}",
            info.focus, problem
        ))
    }

    fn validate_step(&self, local_step: u32, data: &Value) -> EngineResult<bool> {
        if local_step == 3 {
            // red hat: must not be a stringified JSON blob (recurring client bug, §4.2 step 1).
            if let Some(s) = data.get("output").and_then(Value::as_str) {
                if s.trim_start().starts_with('{') || s.trim_start().starts_with('[') {
                    return Ok(false);
                }
            }
        }
        Ok(local_step >= 1 && local_step <= self.total_steps())
    }

    fn extract_insights(&self, history_outputs: &[String]) -> Vec<String> {
        history_outputs
            .iter()
            .filter(|o| !o.trim().is_empty())
            .cloned()
            .collect()
    }

    fn prompt_context(&self, local_step: u32) -> HashMap<String, Value> {
        let mut ctx = HashMap::new();
        if let Ok(hat) = self.step_info(local_step).map(|i| i.focus) {
            ctx.insert("hat_color".to_string(), Value::String(hat));
        }
        ctx
    }
}

/// Synthetic single-step technique invoked to converge parallel results
/// (§4.2 "Convergence"). Its step count is always 1: synthesis happens in
/// one shot, fed by `ConvergenceExecutor`'s normalized context.
pub struct ConvergenceHandler;

impl TechniqueHandler for ConvergenceHandler {
    fn id(&self) -> &'static str {
        "convergence"
    }
    fn name(&self) -> &'static str {
        "Convergence"
    }
    fn emoji(&self) -> &'static str {
        "🔀"
    }
    fn description(&self) -> &'static str {
        "Synthesize the outputs of several parallel thinking sessions into one."
    }
    fn total_steps(&self) -> u32 {
        1
    }

    fn step_info(&self, local_step: u32) -> EngineResult<StepInfo> {
        if local_step != 1 {
            return Err(EngineError::InvalidStep(format!(
                "convergence has no step {local_step}"
            )));
        }
        Ok(StepInfo {
            name: "synthesize".to_string(),
            focus: "synthesis".to_string(),
            emoji: "🔀".to_string(),
            description: "Merge parallel results into a single synthesized view.".to_string(),
        })
    }

    fn step_guidance(&self, _local_step: u32, problem: &str) -> EngineResult<String> {
        Ok(format!(
            "Synthesize the parallel results for: {problem}"
        ))
    }

    fn validate_step(&self, local_step: u32, data: &Value) -> EngineResult<bool> {
        if local_step != 1 {
            return Ok(false);
        }
        Ok(data.get("parallelResults").map(Value::is_array).unwrap_or(false))
    }

    fn extract_insights(&self, history_outputs: &[String]) -> Vec<String> {
        history_outputs.to_vec()
    }

    fn prompt_context(&self, _local_step: u32) -> HashMap<String, Value> {
        HashMap::new()
    }
}

impl fmt::Debug for dyn TechniqueHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TechniqueHandler").field("id", &self.id()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_technique_is_structured_error() {
        let reg = TechniqueRegistry::with_builtins();
        let err = reg.get("nonexistent").unwrap_err();
        assert_eq!(err.code(), "TECHNIQUE_NOT_FOUND");
    }

    #[test]
    fn six_hats_has_six_steps() {
        let reg = TechniqueRegistry::with_builtins();
        assert_eq!(reg.step_count("six_hats").unwrap(), 6);
    }

    #[test]
    fn six_hats_rejects_stringified_json_on_red_hat() {
        let handler = SixHatsHandler;
        let data = serde_json::json!({ "output": "[\"x\",\"y\"]" });
        assert!(!handler.validate_step(3, &data).unwrap());
    }
}
