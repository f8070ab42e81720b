//! `EarlyWarningSystem`: independent sensors over a session's path memory (§4.5).

use serde::{Deserialize, Serialize};

use crate::path_memory::PathMemory;
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Safe,
    Caution,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensor {
    Resource,
    Cognitive,
    TechnicalDebt,
    OptionClosure,
    Reversibility,
}

/// `{rawValue, indicators[], distanceToBarrier, severity}` for one sensor (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorReading {
    pub sensor: Sensor,
    pub raw_value: f64,
    pub indicators: Vec<String>,
    pub distance_to_barrier: f64,
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    Continue,
    Monitor,
    Pivot,
    Escape,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub sensors: Vec<SensorReading>,
    pub overall_severity: Severity,
    pub compound_risk: bool,
    pub recommended_action: RecommendedAction,
}

const QUICK_FIX_KEYWORDS: [&str; 6] = ["hack", "workaround", "quick fix", "temporary", "bandaid", "patch"];

fn severity_for(raw_value: f64, distance_to_barrier: f64) -> Severity {
    if raw_value > 0.85 || distance_to_barrier < 0.15 {
        Severity::Critical
    } else if raw_value > 0.70 {
        Severity::Warning
    } else if raw_value > 0.50 {
        Severity::Caution
    } else {
        Severity::Safe
    }
}

/// Independent sensors whose readings are aggregated by worst-case plus a
/// compound-risk upgrade rule (§4.5).
pub struct EarlyWarningSystem;

impl EarlyWarningSystem {
    pub fn assess(session: &Session) -> RiskAssessment {
        let memory = &session.path_memory;
        let sensors = vec![
            Self::resource(session),
            Self::cognitive(session, memory),
            Self::technical_debt(memory),
            Self::option_closure(memory),
            Self::reversibility(memory),
        ];

        let warning_count = sensors.iter().filter(|s| s.severity == Severity::Warning).count();
        let compound_risk = warning_count >= 2;

        let overall_severity = if compound_risk {
            Severity::Critical
        } else {
            sensors
                .iter()
                .map(|s| s.severity)
                .max()
                .unwrap_or(Severity::Safe)
        };

        let recommended_action = match overall_severity {
            Severity::Safe => RecommendedAction::Continue,
            Severity::Caution => RecommendedAction::Monitor,
            Severity::Warning => RecommendedAction::Pivot,
            Severity::Critical => RecommendedAction::Escape,
        };

        RiskAssessment {
            sensors,
            overall_severity,
            compound_risk,
            recommended_action,
        }
    }

    /// Session duration and step rate.
    fn resource(session: &Session) -> SensorReading {
        let elapsed = (session.last_activity_time - session.start_time)
            .num_seconds()
            .max(0) as f64;
        let steps = session.history.len().max(1) as f64;
        let minutes = (elapsed / 60.0).max(0.01);
        let step_rate = steps / minutes;
        // slower than one step every ~5 minutes is a resource drain signal
        let raw_value = (1.0 / (step_rate + 0.2)).clamp(0.0, 1.0);
        let mut indicators = Vec::new();
        if step_rate < 0.3 {
            indicators.push(format!("low step rate: {step_rate:.2}/min"));
        }
        let distance = (1.0 - raw_value).max(0.0);
        SensorReading {
            sensor: Sensor::Resource,
            raw_value,
            severity: severity_for(raw_value, distance),
            distance_to_barrier: distance,
            indicators,
        }
    }

    /// Technique diversity, decision repetition, assumption-questioning rate.
    fn cognitive(session: &Session, memory: &PathMemory) -> SensorReading {
        let mut decisions: Vec<&str> = memory.events().iter().map(|e| e.decision.as_str()).collect();
        let total = decisions.len().max(1) as f64;
        decisions.sort_unstable();
        decisions.dedup();
        let repetition = 1.0 - (decisions.len() as f64 / total);

        let questioning = memory
            .events()
            .iter()
            .filter(|e| e.decision.to_lowercase().contains("assum"))
            .count() as f64
            / total;

        let raw_value = (repetition * 0.7 + (1.0 - questioning).min(1.0) * 0.3).clamp(0.0, 1.0);
        let mut indicators = Vec::new();
        if repetition > 0.5 {
            indicators.push("high decision repetition".to_string());
        }
        if questioning < 0.1 && memory.len() > 3 {
            indicators.push("low assumption-questioning rate".to_string());
        }
        let distance = (1.0 - raw_value).max(0.0);
        SensorReading {
            sensor: Sensor::Cognitive,
            raw_value,
            severity: severity_for(raw_value, distance),
            distance_to_barrier: distance,
            indicators: {
                let _ = session;
                indicators
            },
        }
    }

    /// Quick-fix keyword density and option-closure coupling.
    fn technical_debt(memory: &PathMemory) -> SensorReading {
        let total = memory.len().max(1) as f64;
        let quick_fix_hits = memory
            .events()
            .iter()
            .filter(|e| {
                let lower = e.decision.to_lowercase();
                QUICK_FIX_KEYWORDS.iter().any(|kw| lower.contains(kw))
            })
            .count() as f64;
        let closure_coupling = memory
            .events()
            .iter()
            .filter(|e| !e.options_closed.is_empty() && !e.constraints_created.is_empty())
            .count() as f64
            / total;

        let raw_value = ((quick_fix_hits / total) * 0.6 + closure_coupling * 0.4).clamp(0.0, 1.0);
        let mut indicators = Vec::new();
        if quick_fix_hits > 0.0 {
            indicators.push(format!("{} quick-fix markers in decision log", quick_fix_hits as u32));
        }
        let distance = (1.0 - raw_value).max(0.0);
        SensorReading {
            sensor: Sensor::TechnicalDebt,
            raw_value,
            severity: severity_for(raw_value, distance),
            distance_to_barrier: distance,
            indicators,
        }
    }

    /// Rate of `optionsClosed` across the log.
    fn option_closure(memory: &PathMemory) -> SensorReading {
        let total = memory.len().max(1) as f64;
        let closed: f64 = memory.events().iter().map(|e| e.options_closed.len() as f64).sum();
        let opened: f64 = memory.events().iter().map(|e| e.options_opened.len() as f64).sum();
        let raw_value = if closed + opened == 0.0 {
            0.0
        } else {
            (closed / (closed + opened)).clamp(0.0, 1.0)
        };
        let mut indicators = Vec::new();
        if raw_value > 0.7 {
            indicators.push("options closing faster than opening".to_string());
        }
        let distance = memory.snapshot().flexibility_score;
        SensorReading {
            sensor: Sensor::OptionClosure,
            raw_value,
            severity: severity_for(raw_value, distance),
            distance_to_barrier: distance,
            indicators: {
                let _ = total;
                indicators
            },
        }
    }

    /// Mean reversibility cost.
    fn reversibility(memory: &PathMemory) -> SensorReading {
        let events = memory.events();
        let raw_value = if events.is_empty() {
            0.0
        } else {
            events.iter().map(|e| e.reversibility_cost).sum::<f64>() / events.len() as f64
        };
        let distance = memory.snapshot().reversibility_index;
        let mut indicators = Vec::new();
        if raw_value > 0.7 {
            indicators.push("recent decisions carry high reversibility cost".to_string());
        }
        SensorReading {
            sensor: Sensor::Reversibility,
            raw_value,
            severity: severity_for(raw_value, distance),
            distance_to_barrier: distance,
            indicators,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path_memory::PathEventInput;
    use crate::session::SessionId;

    fn session_with_events(n: usize, closed_only: bool) -> Session {
        let mut session = Session::new(SessionId::parse("s1").unwrap(), None, "six_hats".into(), "p".into());
        for i in 0..n {
            session
                .path_memory
                .record(PathEventInput {
                    technique: "six_hats".into(),
                    step: i as u32,
                    decision: "narrow the scope further".into(),
                    options_opened: if closed_only { vec![] } else { vec![format!("opt{i}")] },
                    options_closed: vec![format!("closed{i}")],
                    reversibility_cost: 0.9,
                    commitment_level: 0.8,
                    constraints_created: vec!["must ship by friday".into()],
                    revises_step: None,
                })
                .unwrap();
        }
        session
    }

    #[test]
    fn safe_session_recommends_continue() {
        let session = Session::new(SessionId::parse("s1").unwrap(), None, "six_hats".into(), "p".into());
        let assessment = EarlyWarningSystem::assess(&session);
        assert_eq!(assessment.overall_severity, Severity::Safe);
        assert_eq!(assessment.recommended_action, RecommendedAction::Continue);
    }

    #[test]
    fn heavy_closure_and_high_cost_escalates_severity() {
        let session = session_with_events(8, true);
        let assessment = EarlyWarningSystem::assess(&session);
        assert!(assessment.overall_severity >= Severity::Warning);
    }
}
