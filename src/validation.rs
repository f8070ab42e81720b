//! `ValidationStrategies` (§4.2 step 1): schema/shape checks performed
//! before any state mutation, independent of technique-handler logic.

use serde_json::Value;

use crate::error::{EngineError, EngineResult};

/// Wire shape of an `executeThinkingStep` request, pre-validation.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ExecuteStepRequest {
    pub plan_id: String,
    pub technique: String,
    pub problem: String,
    pub current_step: u32,
    pub total_steps: u32,
    pub output: Value,
    pub next_step_needed: bool,
    pub session_id: Option<String>,
    pub path_impact: Option<Value>,
    pub nine_windows_matrix: Option<Value>,
    pub parallel_results: Option<Value>,
    pub is_revision: Option<bool>,
    pub revises_step: Option<u32>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct DiscoverRequest {
    pub problem: String,
    pub context: Option<String>,
    pub preferred_outcome: Option<String>,
    pub constraints: Vec<String>,
    pub current_flexibility: Option<f64>,
}

pub struct ValidationStrategies;

impl ValidationStrategies {
    /// §4.2 step 1: required fields, type/range checks, technique-specific
    /// structural checks that catch recurring client bugs (stringified JSON
    /// where an object was expected).
    pub fn execute(req: &ExecuteStepRequest) -> EngineResult<()> {
        if req.plan_id.trim().is_empty() {
            return Err(EngineError::InvalidInput("planId must not be empty".into()));
        }
        if req.technique.trim().is_empty() {
            return Err(EngineError::InvalidInput("technique must not be empty".into()));
        }
        if req.problem.trim().is_empty() {
            return Err(EngineError::InvalidInput("problem must not be empty".into()));
        }
        if req.current_step == 0 {
            return Err(EngineError::InvalidInput("currentStep must be >= 1".into()));
        }
        if req.current_step > req.total_steps {
            return Err(EngineError::InvalidInput(format!(
                "currentStep {} exceeds totalSteps {}",
                req.current_step, req.total_steps
            )));
        }
        if let Some(session_id) = &req.session_id {
            crate::session::SessionId::parse(session_id)?;
        }
        if let Some(path_impact) = &req.path_impact {
            Self::reject_stringified_json(path_impact, "pathImpact")?;
            if !path_impact.is_object() {
                return Err(EngineError::InvalidInput("pathImpact must be an object".into()));
            }
        }
        if let Some(matrix) = &req.nine_windows_matrix {
            if !matrix.is_array() {
                return Err(EngineError::InvalidInput(
                    "nineWindowsMatrix must be an array".into(),
                ));
            }
        }
        if req.technique == "convergence" {
            match &req.parallel_results {
                Some(Value::Array(items)) if !items.is_empty() => {}
                _ => {
                    return Err(EngineError::InvalidInput(
                        "convergence requires a non-empty parallelResults array".into(),
                    ))
                }
            }
        }
        if req.is_revision == Some(true) && req.revises_step.is_none() {
            return Err(EngineError::InvalidInput(
                "isRevision=true requires revisesStep".into(),
            ));
        }
        Ok(())
    }

    pub fn discover(req: &DiscoverRequest) -> EngineResult<()> {
        if req.problem.trim().is_empty() {
            return Err(EngineError::InvalidInput("problem must not be empty".into()));
        }
        if let Some(flexibility) = req.current_flexibility {
            if !(0.0..=1.0).contains(&flexibility) {
                return Err(EngineError::InvalidInput(
                    "currentFlexibility must be in [0,1]".into(),
                ));
            }
        }
        Ok(())
    }

    /// A recurring client bug: JSON-encoding a value client-side and sending
    /// the resulting string where a structured object is expected.
    fn reject_stringified_json(value: &Value, field: &str) -> EngineResult<()> {
        if let Value::String(s) = value {
            let trimmed = s.trim_start();
            if trimmed.starts_with('{') || trimmed.starts_with('[') {
                return Err(EngineError::InvalidInput(format!(
                    "{field} must not be a stringified JSON blob"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_request() -> ExecuteStepRequest {
        ExecuteStepRequest {
            plan_id: "p1".into(),
            technique: "six_hats".into(),
            problem: "foster innovation".into(),
            current_step: 1,
            total_steps: 6,
            output: json!("some output"),
            next_step_needed: true,
            session_id: None,
            path_impact: None,
            nine_windows_matrix: None,
            parallel_results: None,
            is_revision: None,
            revises_step: None,
        }
    }

    #[test]
    fn valid_request_passes() {
        assert!(ValidationStrategies::execute(&base_request()).is_ok());
    }

    #[test]
    fn stringified_path_impact_is_rejected() {
        let mut req = base_request();
        req.path_impact = Some(json!("{\"reversibilityCost\":0.2}"));
        let err = ValidationStrategies::execute(&req).unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[test]
    fn nine_windows_matrix_must_be_array() {
        let mut req = base_request();
        req.nine_windows_matrix = Some(json!({"not": "an array"}));
        let err = ValidationStrategies::execute(&req).unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[test]
    fn convergence_requires_parallel_results() {
        let mut req = base_request();
        req.technique = "convergence".into();
        req.parallel_results = None;
        let err = ValidationStrategies::execute(&req).unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[test]
    fn current_step_exceeding_total_is_rejected() {
        let mut req = base_request();
        req.current_step = 7;
        let err = ValidationStrategies::execute(&req).unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }
}
