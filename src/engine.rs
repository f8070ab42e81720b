//! `WorkflowEngine`: the top-level orchestrator tying every subsystem
//! together behind the three (plus one multiplexed) RPC-style operations
//! described in §6. The progress/sync/timeout/escape subsystems are wired
//! through `executeThinkingStep`'s pipeline (§4.2, §4.5, §4.6, §4.7) rather
//! than left as standalone units only reachable from their own tests.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::completion::{CompletionGatekeeper, CompletionStatus};
use crate::config::EngineConfig;
use crate::convergence::{ConvergenceExecutor, ParallelResult};
use crate::ergodicity::escape::{EscapeContext, EscapeResult, EscapeVelocitySystem, Protocol};
use crate::ergodicity::warning::{EarlyWarningSystem, RiskAssessment, Severity};
use crate::error::{EngineError, EngineResult, ErrorEnvelope};
use crate::events::{Event, EventBus};
use crate::path_memory::PathEventInput;
use crate::persistence::{ExportFormat, PersistenceAdapter};
use crate::plan::{ExecutionMode, ParallelGroupId, Plan, PlanCompiler, PlanId, PlanRequest};
use crate::progress::{ProgressCoordinator, ProgressState};
use crate::session::{HistoryEntry, Session, SessionId, SessionRegistry};
use crate::sync_context::{SessionSynchronizer, SyncMode};
use crate::technique::TechniqueRegistry;
use crate::telemetry::{EventPriority, Telemetry, TelemetryEvent};
use crate::timeout::SessionTimeoutMonitor;
use crate::validation::{DiscoverRequest, ExecuteStepRequest, ValidationStrategies};

#[derive(Debug, Clone, Serialize)]
pub struct TechniqueRecommendation {
    pub technique: String,
    pub name: String,
    pub emoji: String,
    pub description: String,
}

/// Best protocol available at a given flexibility reading, surfaced to
/// callers so they can plan ahead of an actual escape (§4.1, §4.6).
#[derive(Debug, Clone, Serialize)]
pub struct EscapeVelocityAnalysis {
    pub current_flexibility: f64,
    pub recommended_protocol: Option<Protocol>,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoverResponse {
    pub recommendations: Vec<TechniqueRecommendation>,
    pub reasoning: String,
    pub suggested_workflow: Option<Vec<String>>,
    pub flexibility_warning: Option<String>,
    pub generated_options: Option<Vec<String>>,
    pub escape_velocity_analysis: Option<EscapeVelocityAnalysis>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecuteStepResponse {
    pub session_id: SessionId,
    pub current_step: u32,
    pub next_step_guidance: Option<String>,
    pub insights: Option<Vec<String>>,
    pub metrics: Option<HashMap<String, f64>>,
    pub early_warning_state: Option<RiskAssessment>,
    pub path_impact: Option<Value>,
    pub blocked: Option<crate::completion::BlockedResponse>,
    pub escape_result: Option<EscapeResult>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum SessionOperation {
    Save { session_id: String },
    Load { session_id: String },
    List,
    Delete { session_id: String },
    Export { session_id: String, format: ExportFormat },
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SessionOperationResponse {
    Saved { session_id: String },
    Loaded { session: Session },
    Listed { session_ids: Vec<String> },
    Deleted { session_id: String },
    Exported { content: String },
}

/// Ties the technique registry, plan compiler, session registry, progress
/// coordinator, timeout monitor, and persistence/telemetry ports together.
pub struct WorkflowEngine {
    config: EngineConfig,
    registry: TechniqueRegistry,
    plans: dashmap::DashMap<PlanId, Plan>,
    sessions: SessionRegistry,
    events: Arc<EventBus>,
    progress: ProgressCoordinator,
    sync: SessionSynchronizer,
    timeouts: SessionTimeoutMonitor,
    persistence: Arc<dyn PersistenceAdapter>,
    telemetry: Arc<dyn Telemetry>,
}

impl WorkflowEngine {
    pub fn new(
        config: EngineConfig,
        persistence: Arc<dyn PersistenceAdapter>,
        telemetry: Arc<dyn Telemetry>,
    ) -> EngineResult<Self> {
        config.validate()?;
        let events = Arc::new(EventBus::new());
        Ok(Self {
            sessions: SessionRegistry::new(&config.sessions),
            progress: ProgressCoordinator::new(events.clone()),
            timeouts: SessionTimeoutMonitor::new(events.clone()),
            sync: SessionSynchronizer::new(),
            registry: TechniqueRegistry::with_builtins(),
            plans: dashmap::DashMap::new(),
            events,
            config,
            persistence,
            telemetry,
        })
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    /// `discoverTechniques` (§6).
    pub fn discover_techniques(&self, req: DiscoverRequest) -> EngineResult<DiscoverResponse> {
        ValidationStrategies::discover(&req)?;

        let recommendations: Vec<TechniqueRecommendation> = self
            .registry
            .ids()
            .into_iter()
            .filter(|id| *id != "convergence")
            .filter_map(|id| self.registry.get(id).ok().map(|h| TechniqueRecommendation {
                technique: h.id().to_string(),
                name: h.name().to_string(),
                emoji: h.emoji().to_string(),
                description: h.description().to_string(),
            }))
            .collect();

        let flexibility_warning = req.current_flexibility.and_then(|f| {
            if f < 0.30 {
                Some(format!(
                    "Current flexibility {f:.2} is low; consider an escape protocol before committing to a technique"
                ))
            } else {
                None
            }
        });

        let generated_options = flexibility_warning.as_ref().map(|_| {
            vec![
                "Introduce a parallel exploratory technique before committing".to_string(),
                "Schedule an explicit escape-protocol checkpoint".to_string(),
            ]
        });

        let escape_velocity_analysis = req.current_flexibility.map(|flexibility| {
            let recommended = Protocol::ALL.into_iter().find(|p| flexibility >= p.flexibility_floor());
            let rationale = match recommended {
                Some(p) => format!(
                    "{p:?} is the weakest protocol available at flexibility {flexibility:.2}"
                ),
                None => "no escape protocol is available at this flexibility level".to_string(),
            };
            EscapeVelocityAnalysis {
                current_flexibility: flexibility,
                recommended_protocol: recommended,
                rationale,
            }
        });

        Ok(DiscoverResponse {
            reasoning: format!(
                "Matched {} registered technique(s) against the stated problem.",
                recommendations.len()
            ),
            suggested_workflow: Some(recommendations.iter().map(|r| r.technique.clone()).collect()),
            recommendations,
            flexibility_warning,
            generated_options,
            escape_velocity_analysis,
        })
    }

    /// `planThinkingSession` (§6).
    pub fn plan_thinking_session(&self, req: PlanRequest) -> EngineResult<Plan> {
        let compiler = PlanCompiler::new(&self.registry);
        let plan = compiler.compile(&req)?;
        self.plans.insert(plan.plan_id, plan.clone());
        info!(plan_id = %plan.plan_id, steps = plan.total_steps(), "compiled plan");
        Ok(plan)
    }

    /// `executeThinkingStep` (§6, pipeline in §4.2).
    pub async fn execute_thinking_step(&self, req: ExecuteStepRequest) -> EngineResult<ExecuteStepResponse> {
        // 1. schema validation
        ValidationStrategies::execute(&req)?;

        // 2. plan lookup
        let plan_uuid = Uuid::parse_str(&req.plan_id)
            .map_err(|_| EngineError::PlanNotFound(req.plan_id.clone()))?;
        let plan_id = PlanId(plan_uuid);
        let plan = self
            .plans
            .get(&plan_id)
            .ok_or_else(|| EngineError::PlanNotFound(req.plan_id.clone()))?
            .clone();
        if !plan.techniques.contains(&req.technique) {
            return Err(EngineError::TechniqueMismatch {
                plan_id: req.plan_id.clone(),
                technique: req.technique.clone(),
            });
        }

        // Parallel-mode plans share one progress/sync group keyed by the
        // plan's own id, since every session executing it belongs together.
        let group_id = (plan.mode == ExecutionMode::Parallel).then(|| ParallelGroupId(plan.plan_id.0));

        // 3. session acquisition
        let session_id = match &req.session_id {
            Some(raw) => SessionId::parse(raw)?,
            None => SessionId::generate(),
        };
        if !self.sessions.contains(&session_id) {
            let mut session = Session::new(
                session_id.clone(),
                Some(plan_id),
                req.technique.clone(),
                req.problem.clone(),
            );
            session.parallel_group_id = group_id;
            self.sessions.insert(session)?;
            self.progress.register(session_id.clone(), req.total_steps);
            if let Some(group_id) = group_id {
                self.progress.add_to_group(group_id, session_id.clone());
                self.sync.init_group(group_id, SyncMode::Immediate);
            }
            self.timeouts.start_execution_timer(
                session_id.clone(),
                self.config.timeouts.preset(crate::plan::Timeframe::default()),
            );
        }
        let session_handle = self.sessions.get(&session_id)?;

        self.progress
            .transition(&session_id, group_id, ProgressState::InProgress, vec![])
            .await;

        // 4. local-step translation
        let preceding: u32 = plan
            .techniques
            .iter()
            .take_while(|t| **t != req.technique)
            .map(|t| self.registry.get(t).map(|h| h.total_steps()).unwrap_or(0))
            .sum();
        let local_step = req.current_step.saturating_sub(preceding);

        // 5. handler validation (non-fatal: recorded, flagged via warning event)
        let handler = self.registry.get(&req.technique)?;
        let step_data = serde_json::json!({
            "output": req.output,
            "parallelResults": req.parallel_results,
        });
        let step_valid = handler.validate_step(local_step, &step_data).unwrap_or(false);
        if !step_valid {
            warn!(session_id = %session_id, local_step, "step failed handler validation; recording anyway");
        }

        let gatekeeper = CompletionGatekeeper::new(
            self.config.enforcement.level,
            self.config.enforcement.minimum_completion_threshold,
            self.config.enforcement.require_confirmation_threshold,
        );

        // Convergence: every other technique must have executed or been
        // explicitly skipped before synthesis proceeds (§4.9), then merge
        // parallel results before the handler runs.
        let mut convergence_insights: Option<Vec<String>> = None;
        if req.technique == "convergence" {
            let (executed, skipped) = self.executed_techniques_for_plan(plan_id);
            let synthesis_status = CompletionStatus {
                overall_progress: req.current_step as f64 / req.total_steps.max(1) as f64,
                next_step_needed: req.next_step_needed,
                critical_gaps_identified: Vec::new(),
                executed_techniques: executed,
                skipped_techniques: skipped,
            };
            if !gatekeeper.can_proceed_to_synthesis(&plan, &synthesis_status) {
                return Ok(ExecuteStepResponse {
                    session_id,
                    current_step: req.current_step,
                    next_step_guidance: None,
                    insights: None,
                    metrics: None,
                    early_warning_state: None,
                    path_impact: None,
                    escape_result: None,
                    blocked: Some(crate::completion::BlockedResponse {
                        blocked: true,
                        title: "Convergence blocked".to_string(),
                        reason: "every technique in the plan must execute or be explicitly skipped before convergence".to_string(),
                        completion_status: synthesis_status,
                        required_actions: vec![
                            "Run the remaining parallel sessions before requesting convergence".to_string(),
                        ],
                        suggestions: vec!["Mark any intentionally-omitted technique as skipped".to_string()],
                        override_flag: None,
                    }),
                });
            }

            if let Some(Value::Array(items)) = &req.parallel_results {
                let parsed: Vec<ParallelResult> = items
                    .iter()
                    .filter_map(|v| serde_json::from_value(v.clone()).ok())
                    .collect();
                let executor = ConvergenceExecutor::new(&self.registry);
                let converged = executor.converge(&parsed)?;
                convergence_insights = Some(converged.merged_insights);
            }
        }

        // 6. gatekeeper check (early termination)
        let completed_estimate = req.current_step as f64 / req.total_steps.max(1) as f64;
        let status = CompletionStatus {
            overall_progress: completed_estimate,
            next_step_needed: req.next_step_needed,
            critical_gaps_identified: Vec::new(),
            executed_techniques: plan.techniques.clone(),
            skipped_techniques: Vec::new(),
        };
        if let Some(blocked) = gatekeeper.check(&status, plan.total_steps()) {
            if blocked.blocked {
                self.telemetry.record(TelemetryEvent {
                    name: "completion_blocked".to_string(),
                    priority: EventPriority::Normal,
                    payload: serde_json::to_value(&blocked).unwrap_or(Value::Null),
                });
                return Ok(ExecuteStepResponse {
                    session_id,
                    current_step: req.current_step,
                    next_step_guidance: None,
                    insights: None,
                    metrics: None,
                    early_warning_state: None,
                    path_impact: None,
                    escape_result: None,
                    blocked: Some(blocked),
                });
            }
        }

        // 7. ergodicity recording + history append
        let (insights, early_warning, path_impact_out, escape_result) = {
            let mut session = session_handle.lock();
            session.touch();

            let path_impact = req.path_impact.clone();
            let (opened, closed, reversibility, commitment) = Self::derive_path_fields(&path_impact);
            session.path_memory.record(PathEventInput {
                technique: req.technique.clone(),
                step: local_step,
                decision: format!("step {} output recorded", req.current_step),
                options_opened: opened,
                options_closed: closed,
                reversibility_cost: reversibility,
                commitment_level: commitment,
                constraints_created: Vec::new(),
                revises_step: req.revises_step.map(|s| s as usize),
            })?;

            session.history.push(HistoryEntry {
                step: req.current_step,
                timestamp: chrono::Utc::now(),
                input: step_data.clone(),
                output: req.output.clone(),
                insights: convergence_insights.clone(),
                is_revision: req.is_revision,
                revises_step: req.revises_step,
            });

            let outputs: Vec<String> = session
                .history
                .iter()
                .filter_map(|h| h.output.as_str().map(str::to_string))
                .collect();
            let mut insights = convergence_insights.clone().unwrap_or_default();
            insights.extend(handler.extract_insights(&outputs));
            session.insights.extend(insights.iter().cloned());

            if !req.next_step_needed {
                session.complete().ok();
            }

            // 8. early-warning evaluation, escalating to an automatic escape
            // protocol when the compound risk reaches Critical (§4.5, §4.6).
            let assessment = EarlyWarningSystem::assess(&session);
            let escape_result = if assessment.overall_severity == Severity::Critical {
                let escape_ctx = EscapeContext {
                    current_flexibility: session.path_memory.snapshot().flexibility_score,
                    trigger_reason: "critical early-warning assessment".to_string(),
                    user_approval: false,
                    automatic_mode: true,
                    escape_force_needed: 1,
                };
                EscapeVelocitySystem::execute_automatic(&mut session.path_memory, &escape_ctx).ok()
            } else {
                None
            };
            let early_warning = if assessment.overall_severity >= Severity::Warning {
                Some(assessment)
            } else {
                None
            };

            (insights, early_warning, path_impact, escape_result)
        };

        self.events.emit(Event::Progress {
            session_id: session_id.clone(),
        });

        if let Some(group_id) = group_id {
            self.sync
                .publish_update(
                    group_id,
                    session_id.as_str(),
                    req.current_step,
                    insights.clone(),
                    Vec::new(),
                    HashMap::new(),
                    !req.next_step_needed,
                )
                .await;
        }

        if !req.next_step_needed {
            self.progress
                .transition(&session_id, group_id, ProgressState::Completed, vec![])
                .await;
            self.timeouts.cancel_execution_timer(&session_id);
        }

        // 9. response assembly
        Ok(ExecuteStepResponse {
            session_id,
            current_step: req.current_step,
            next_step_guidance: Some(handler.step_guidance(local_step, &req.problem)?),
            insights: if insights.is_empty() { None } else { Some(insights) },
            metrics: None,
            early_warning_state: early_warning,
            path_impact: path_impact_out,
            blocked: None,
            escape_result,
        })
    }

    /// Techniques with at least one recorded step, across every session
    /// tracked for `plan_id` — the input `can_proceed_to_synthesis` needs
    /// (§4.9). Skipped techniques have no tracking mechanism yet, so that
    /// half of the pair is always empty.
    fn executed_techniques_for_plan(&self, plan_id: PlanId) -> (Vec<String>, Vec<String>) {
        let mut executed = Vec::new();
        for id in self.sessions.ids() {
            if let Ok(handle) = self.sessions.get(&id) {
                let session = handle.lock();
                if session.plan_id == Some(plan_id)
                    && !session.history.is_empty()
                    && !executed.contains(&session.technique)
                {
                    executed.push(session.technique.clone());
                }
            }
        }
        (executed, Vec::new())
    }

    fn derive_path_fields(path_impact: &Option<Value>) -> (Vec<String>, Vec<String>, f64, f64) {
        let Some(value) = path_impact else {
            return (Vec::new(), Vec::new(), 0.3, 0.3);
        };
        let strings = |key: &str| -> Vec<String> {
            value
                .get(key)
                .and_then(Value::as_array)
                .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default()
        };
        let number = |key: &str, default: f64| -> f64 {
            value.get(key).and_then(Value::as_f64).unwrap_or(default).clamp(0.0, 1.0)
        };
        (
            strings("optionsOpened"),
            strings("optionsClosed"),
            number("reversibilityCost", 0.3),
            number("commitmentLevel", 0.3),
        )
    }

    /// `sessionOperation` (§6): save|load|list|delete|export.
    pub async fn session_operation(
        &self,
        op: SessionOperation,
    ) -> EngineResult<SessionOperationResponse> {
        match op {
            SessionOperation::Save { session_id } => {
                let id = SessionId::parse(&session_id)?;
                let handle = self.sessions.get(&id)?;
                let snapshot = handle.lock().clone();
                self.persistence.save(&snapshot).await?;
                Ok(SessionOperationResponse::Saved { session_id: id.to_string() })
            }
            SessionOperation::Load { session_id } => {
                let id = SessionId::parse(&session_id)?;
                let session = self.persistence.load(&id).await?;
                self.sessions.insert(session.clone())?;
                Ok(SessionOperationResponse::Loaded { session })
            }
            SessionOperation::List => {
                let ids = self.persistence.list().await?;
                Ok(SessionOperationResponse::Listed {
                    session_ids: ids.into_iter().map(|id| id.to_string()).collect(),
                })
            }
            SessionOperation::Delete { session_id } => {
                let id = SessionId::parse(&session_id)?;
                self.persistence.delete(&id).await?;
                self.sessions.remove(&id);
                Ok(SessionOperationResponse::Deleted { session_id: id.to_string() })
            }
            SessionOperation::Export { session_id, format } => {
                let id = SessionId::parse(&session_id)?;
                let content = self.persistence.export(&id, format).await?;
                Ok(SessionOperationResponse::Exported { content })
            }
        }
    }

    pub fn stop(&self) {
        self.timeouts.stop_monitoring();
    }
}

/// Converts any [`EngineError`] into the RPC-boundary envelope (§7): no
/// exception ever escapes uncaught.
pub fn into_envelope(err: &EngineError) -> serde_json::Value {
    let envelope = ErrorEnvelope::from(err);
    serde_json::json!({ "error": envelope, "isError": true })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::FsPersistence;
    use crate::telemetry::BufferedTelemetry;

    fn engine() -> WorkflowEngine {
        let dir = std::env::temp_dir().join(format!("lateral-engine-test-{}", Uuid::new_v4()));
        let persistence = Arc::new(FsPersistence::new(dir));
        let telemetry = Arc::new(BufferedTelemetry::new(crate::config::TelemetryConfig::default()));
        WorkflowEngine::new(EngineConfig::default(), persistence, telemetry).unwrap()
    }

    fn base_step_req(plan_id: String) -> ExecuteStepRequest {
        ExecuteStepRequest {
            plan_id,
            technique: "six_hats".into(),
            problem: "Foster innovation in risk-averse team".into(),
            current_step: 1,
            total_steps: 6,
            output: Value::String("process overview".into()),
            next_step_needed: true,
            session_id: None,
            path_impact: None,
            nine_windows_matrix: None,
            parallel_results: None,
            is_revision: None,
            revises_step: None,
        }
    }

    #[tokio::test]
    async fn happy_path_discover_plan_execute() {
        let engine = engine();
        let discovered = engine
            .discover_techniques(DiscoverRequest {
                problem: "Foster innovation in risk-averse team".into(),
                ..Default::default()
            })
            .unwrap();
        assert!(!discovered.recommendations.is_empty());

        let plan = engine
            .plan_thinking_session(PlanRequest {
                problem: "Foster innovation in risk-averse team".into(),
                techniques: vec!["six_hats".into()],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(plan.total_steps(), 6);

        let response = engine
            .execute_thinking_step(base_step_req(plan.plan_id.to_string()))
            .await
            .unwrap();
        assert_eq!(response.current_step, 1);
        assert!(!response.next_step_guidance.unwrap().is_empty());
        assert!(response.blocked.is_none());
    }

    #[tokio::test]
    async fn wrong_plan_id_is_plan_not_found() {
        let engine = engine();
        let err = engine
            .execute_thinking_step(base_step_req("nope".into()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PLAN_NOT_FOUND");
        assert!(err.to_string().contains("planThinkingSession"));
    }

    #[tokio::test]
    async fn strict_enforcement_blocks_early_termination() {
        let mut config = EngineConfig::default();
        config.enforcement.level = crate::config::EnforcementLevel::Strict;
        config.enforcement.minimum_completion_threshold = 0.60;
        let dir = std::env::temp_dir().join(format!("lateral-engine-test-{}", Uuid::new_v4()));
        let persistence = Arc::new(FsPersistence::new(dir));
        let telemetry = Arc::new(BufferedTelemetry::new(crate::config::TelemetryConfig::default()));
        let engine = WorkflowEngine::new(config, persistence, telemetry).unwrap();

        let plan = engine
            .plan_thinking_session(PlanRequest {
                problem: "p".into(),
                techniques: vec!["six_hats".into()],
                ..Default::default()
            })
            .unwrap();

        let mut req = base_step_req(plan.plan_id.to_string());
        req.current_step = 2;
        req.next_step_needed = false;
        let response = engine.execute_thinking_step(req).await.unwrap();
        let blocked = response.blocked.unwrap();
        assert!(blocked.blocked);
        assert_eq!(
            (blocked.completion_status.overall_progress * 100.0).round() as i32,
            33
        );
    }

    #[tokio::test]
    async fn convergence_blocked_until_other_techniques_execute() {
        let engine = engine();
        let plan = engine
            .plan_thinking_session(PlanRequest {
                problem: "p".into(),
                techniques: vec!["six_hats".into(), "convergence".into()],
                ..Default::default()
            })
            .unwrap();

        let response = engine
            .execute_thinking_step(ExecuteStepRequest {
                plan_id: plan.plan_id.to_string(),
                technique: "convergence".into(),
                problem: "p".into(),
                current_step: plan.total_steps(),
                total_steps: plan.total_steps(),
                output: Value::Null,
                next_step_needed: false,
                session_id: None,
                path_impact: None,
                nine_windows_matrix: None,
                parallel_results: Some(serde_json::json!([
                    {"planId": "p1", "technique": "six_hats", "insights": ["x"], "results": {}}
                ])),
                is_revision: None,
                revises_step: None,
            })
            .await
            .unwrap();
        assert!(response.blocked.unwrap().blocked);
    }

    #[tokio::test]
    async fn parallel_mode_session_publishes_shared_context() {
        let engine = engine();
        let plan = engine
            .plan_thinking_session(PlanRequest {
                problem: "p".into(),
                techniques: vec!["six_hats".into()],
                execution_mode: Some(ExecutionMode::Parallel),
                ..Default::default()
            })
            .unwrap();

        let mut req = base_step_req(plan.plan_id.to_string());
        req.output = Value::String("blue hat framing".into());
        engine.execute_thinking_step(req).await.unwrap();

        let group_id = ParallelGroupId(plan.plan_id.0);
        let shared = engine.sync.get_shared_context(group_id).await;
        assert!(!shared.shared_insights.is_empty());
        assert_eq!(shared.sync_mode, SyncMode::Immediate);
    }

    #[tokio::test]
    async fn critical_risk_triggers_automatic_escape() {
        let engine = engine();
        let plan = engine
            .plan_thinking_session(PlanRequest {
                problem: "p".into(),
                techniques: vec!["six_hats".into()],
                ..Default::default()
            })
            .unwrap();

        let mut req = base_step_req(plan.plan_id.to_string());
        req.path_impact = Some(serde_json::json!({
            "optionsOpened": [],
            "optionsClosed": ["a", "b", "c", "d", "e"],
            "reversibilityCost": 0.9,
            "commitmentLevel": 0.9,
        }));
        let response = engine.execute_thinking_step(req).await.unwrap();

        assert_eq!(
            response.early_warning_state.as_ref().map(|a| a.overall_severity),
            Some(Severity::Critical)
        );
        assert!(response.escape_result.is_some());
    }
}
