//! `ConvergenceExecutor` (§4.8): validates and merges parallel session
//! results into one synthesized context before the convergence step runs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, EngineResult};
use crate::technique::TechniqueRegistry;

/// One member of `parallelResults[]`, as received over the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct ParallelResult {
    pub plan_id: String,
    pub technique: String,
    pub insights: Value,
    pub results: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct RejectedMember {
    pub plan_id: String,
    pub reason: String,
}

/// Output of convergence validation/merge: a single synthesized context
/// plus a record of any members dropped along the way.
#[derive(Debug, Clone, Serialize)]
pub struct ConvergedContext {
    pub merged_insights: Vec<String>,
    pub metrics_rollup: std::collections::HashMap<String, Value>,
    pub accepted: Vec<String>,
    pub rejected: Vec<RejectedMember>,
}

pub struct ConvergenceExecutor<'a> {
    registry: &'a TechniqueRegistry,
}

impl<'a> ConvergenceExecutor<'a> {
    pub fn new(registry: &'a TechniqueRegistry) -> Self {
        Self { registry }
    }

    /// Validate and merge. Malformed members are excluded and recorded
    /// rather than aborting the whole convergence, as long as at least one
    /// member validates (§4.8).
    pub fn converge(&self, parallel_results: &[ParallelResult]) -> EngineResult<ConvergedContext> {
        if parallel_results.is_empty() {
            return Err(EngineError::InvalidInput(
                "parallelResults must not be empty".into(),
            ));
        }

        let mut merged_insights = Vec::new();
        let mut metrics_rollup = std::collections::HashMap::new();
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();

        for member in parallel_results {
            match self.validate_member(member) {
                Ok(insights) => {
                    for insight in insights {
                        if !merged_insights.contains(&insight) {
                            merged_insights.push(insight);
                        }
                    }
                    if let Value::Object(map) = strip_non_serializable(&member.results) {
                        for (k, v) in map {
                            metrics_rollup.insert(k, v);
                        }
                    }
                    accepted.push(member.plan_id.clone());
                }
                Err(reason) => rejected.push(RejectedMember {
                    plan_id: member.plan_id.clone(),
                    reason,
                }),
            }
        }

        if accepted.is_empty() {
            return Err(EngineError::InvalidInput(format!(
                "no valid parallel results: {}",
                rejected
                    .iter()
                    .map(|r| format!("{}: {}", r.plan_id, r.reason))
                    .collect::<Vec<_>>()
                    .join("; ")
            )));
        }

        Ok(ConvergedContext {
            merged_insights,
            metrics_rollup,
            accepted,
            rejected,
        })
    }

    fn validate_member(&self, member: &ParallelResult) -> Result<Vec<String>, String> {
        if member.plan_id.trim().is_empty() {
            return Err("planId is empty".to_string());
        }
        if !self.registry.contains(&member.technique) {
            return Err(format!("unknown technique {}", member.technique));
        }
        let Value::Array(items) = &member.insights else {
            return Err("insights must be an array of strings".to_string());
        };
        let mut insights = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::String(s) => {
                    // reject stringified JSON masquerading as a plain insight
                    let trimmed = s.trim_start();
                    if trimmed.starts_with('{') || trimmed.starts_with('[') {
                        return Err("insights entry looks like stringified JSON".to_string());
                    }
                    insights.push(s.clone());
                }
                _ => return Err("insights entries must be strings".to_string()),
            }
        }
        if !member.results.is_object() && !member.results.is_null() {
            return Err("results must be a plain record".to_string());
        }
        Ok(insights)
    }
}

/// Functions/symbols don't exist in JSON, so "non-serializable members"
/// degrades to stripping null-typed and empty-key entries defensively.
fn strip_non_serializable(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let cleaned: serde_json::Map<String, Value> = map
                .iter()
                .filter(|(k, v)| !k.is_empty() && !v.is_null())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            Value::Object(cleaned)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_member(plan_id: &str) -> ParallelResult {
        ParallelResult {
            plan_id: plan_id.to_string(),
            technique: "six_hats".into(),
            insights: json!(["widen the market", "reduce scope"]),
            results: json!({"score": 0.8}),
        }
    }

    #[test]
    fn merges_insights_deduplicated_in_first_occurrence_order() {
        let registry = TechniqueRegistry::with_builtins();
        let executor = ConvergenceExecutor::new(&registry);
        let mut b = valid_member("p2");
        b.insights = json!(["reduce scope", "new insight"]);
        let result = executor.converge(&[valid_member("p1"), b]).unwrap();
        assert_eq!(
            result.merged_insights,
            vec!["widen the market", "reduce scope", "new insight"]
        );
    }

    #[test]
    fn malformed_member_excluded_but_convergence_still_runs() {
        let registry = TechniqueRegistry::with_builtins();
        let executor = ConvergenceExecutor::new(&registry);
        let mut bad = valid_member("p2");
        bad.insights = json!(["{\"not\":\"an insight\"}"]);
        let result = executor.converge(&[valid_member("p1"), bad]).unwrap();
        assert_eq!(result.accepted, vec!["p1".to_string()]);
        assert_eq!(result.rejected.len(), 1);
        assert_eq!(result.rejected[0].plan_id, "p2");
    }

    #[test]
    fn all_malformed_members_is_an_error() {
        let registry = TechniqueRegistry::with_builtins();
        let executor = ConvergenceExecutor::new(&registry);
        let mut bad = valid_member("p1");
        bad.technique = "nonexistent".into();
        let err = executor.converge(&[bad]).unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[test]
    fn empty_parallel_results_rejected() {
        let registry = TechniqueRegistry::with_builtins();
        let executor = ConvergenceExecutor::new(&registry);
        let err = executor.converge(&[]).unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }
}
