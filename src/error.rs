//! Error taxonomy for the engine.
//!
//! Every fallible operation returns [`EngineError`]; handlers and adapters
//! produce structured variants and the engine converts them to response
//! envelopes at the RPC boundary (see [`crate::engine::into_envelope`]).
//! No variant here is meant to escape as a panic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// The taxonomy kind a given [`EngineError`] belongs to (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorLayer {
    Validation,
    Workflow,
    State,
    System,
    Gatekeeper,
    Ergodicity,
}

/// Comprehensive error type for the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Shape/type/range/technique-structural validation failure.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A technique id is not known to the registry.
    #[error("unknown technique: {0}")]
    TechniqueNotFound(String),

    /// `planThinkingSession` referenced an unknown technique id.
    #[error("invalid technique: {0}")]
    InvalidTechnique(String),

    /// `executeThinkingStep` referenced a `planId` the registry has never seen.
    #[error("plan not found: {0} — call planThinkingSession first")]
    PlanNotFound(String),

    /// `input.technique` is not among the plan's techniques.
    #[error("technique {technique} is not part of plan {plan_id}")]
    TechniqueMismatch { plan_id: String, technique: String },

    /// Step input failed handler-level structural validation.
    #[error("invalid step: {0}")]
    InvalidStep(String),

    /// Referenced session id is unknown or has expired.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Referenced session id does not match the required format.
    #[error("invalid session id: {0}")]
    InvalidSessionId(String),

    /// Attempted transition is illegal from the current state.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition { from: String, to: String },

    /// The session registry is full and nothing is evictable.
    #[error("maximum tracked sessions exceeded")]
    MaxSessionsExceeded,

    /// A parallel group id is unknown.
    #[error("parallel group not found: {0}")]
    GroupNotFound(String),

    /// Persistence I/O failure.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Any other system-level failure (timeouts, memory pressure).
    #[error("system error: {0}")]
    System(String),

    /// Early termination was refused by the completion gatekeeper. Carried
    /// as data in a successful response (`blocked: true`) in normal flow;
    /// available as an error for callers with no response context.
    #[error("blocked: {0}")]
    Blocked(String),

    /// Requested escape protocol's flexibility floor was not met.
    #[error("insufficient flexibility: need >= {required:.2}, have {actual:.2}")]
    InsufficientFlexibility { required: f64, actual: f64 },

    /// Internal invariant violation — should never surface to a caller.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// The taxonomy layer this error belongs to (§7).
    pub fn layer(&self) -> ErrorLayer {
        match self {
            EngineError::InvalidInput(_)
            | EngineError::InvalidStep(_)
            | EngineError::InvalidSessionId(_) => ErrorLayer::Validation,
            EngineError::TechniqueNotFound(_)
            | EngineError::InvalidTechnique(_)
            | EngineError::PlanNotFound(_)
            | EngineError::TechniqueMismatch { .. } => ErrorLayer::Workflow,
            EngineError::SessionNotFound(_)
            | EngineError::InvalidStateTransition { .. }
            | EngineError::GroupNotFound(_) => ErrorLayer::State,
            EngineError::MaxSessionsExceeded
            | EngineError::Persistence(_)
            | EngineError::System(_)
            | EngineError::Internal(_) => ErrorLayer::System,
            EngineError::Blocked(_) => ErrorLayer::Gatekeeper,
            EngineError::InsufficientFlexibility { .. } => ErrorLayer::Ergodicity,
        }
    }

    /// A short machine-readable code, stable across versions.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidInput(_) => "INVALID_INPUT",
            EngineError::TechniqueNotFound(_) => "TECHNIQUE_NOT_FOUND",
            EngineError::InvalidTechnique(_) => "INVALID_TECHNIQUE",
            EngineError::PlanNotFound(_) => "PLAN_NOT_FOUND",
            EngineError::TechniqueMismatch { .. } => "TECHNIQUE_MISMATCH",
            EngineError::InvalidStep(_) => "INVALID_STEP",
            EngineError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            EngineError::InvalidSessionId(_) => "INVALID_SESSION_ID",
            EngineError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            EngineError::MaxSessionsExceeded => "MAX_SESSIONS_EXCEEDED",
            EngineError::GroupNotFound(_) => "GROUP_NOT_FOUND",
            EngineError::Persistence(_) => "PERSISTENCE_ERROR",
            EngineError::System(_) => "SYSTEM_ERROR",
            EngineError::Blocked(_) => "BLOCKED_ACTION",
            EngineError::InsufficientFlexibility { .. } => "INSUFFICIENT_FLEXIBILITY",
            EngineError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// `{error:{code, message, details, layer, timestamp}, isError:true}` — the
/// envelope every RPC boundary converts an [`EngineError`] into, so that no
/// exception ever escapes (§7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub layer: ErrorLayer,
    pub timestamp: DateTime<Utc>,
}

impl From<&EngineError> for ErrorEnvelope {
    fn from(err: &EngineError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            details: None,
            layer: err.layer(),
            timestamp: Utc::now(),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Persistence(err.to_string())
    }
}
