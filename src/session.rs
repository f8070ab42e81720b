//! `Session` and `SessionRegistry` (§3.2, §5 backpressure).

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::error::{EngineError, EngineResult};
use crate::path_memory::PathMemory;
use crate::plan::{ParallelGroupId, PlanId};

/// Session identifier: `[A-Za-z0-9_.-]{1,64}` (§3.1 "session-id format").
/// The filesystem-safety rule (no traversal, no separators) is a separate,
/// stricter check applied by the persistence layer, not here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    pub fn parse(raw: &str) -> EngineResult<Self> {
        if raw.is_empty() || raw.len() > 64 {
            return Err(EngineError::InvalidSessionId(format!(
                "session id must be 1-64 characters, got {}",
                raw.len()
            )));
        }
        if !raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.')
        {
            return Err(EngineError::InvalidSessionId(format!(
                "session id {raw:?} contains characters outside [A-Za-z0-9_.-]"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn generate() -> Self {
        Self(format!("sess_{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SessionId {
    type Error = EngineError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One recorded step in a session's history (§3.2 "HistoryEntry").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub step: u32,
    pub timestamp: DateTime<Utc>,
    pub input: serde_json::Value,
    pub output: serde_json::Value,
    pub insights: Option<Vec<String>>,
    pub is_revision: Option<bool>,
    pub revises_step: Option<u32>,
}

/// Lifecycle state of a session, mirroring the progress state machine (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Waiting,
    Suspended,
    Completed,
    Failed,
}

/// A single thinking session (§3.2 "Session").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub plan_id: Option<PlanId>,
    pub technique: String,
    pub problem: String,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    pub last_activity_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub history: Vec<HistoryEntry>,
    pub branches: HashMap<String, Vec<HistoryEntry>>,
    pub insights: Vec<String>,
    pub path_memory: PathMemory,
    pub parallel_group_id: Option<ParallelGroupId>,
}

impl Session {
    pub fn new(session_id: SessionId, plan_id: Option<PlanId>, technique: String, problem: String) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            plan_id,
            technique,
            problem,
            status: SessionStatus::Active,
            start_time: now,
            last_activity_time: now,
            end_time: None,
            history: Vec::new(),
            branches: HashMap::new(),
            insights: Vec::new(),
            path_memory: PathMemory::new(),
            parallel_group_id: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity_time = Utc::now();
    }

    /// `active|waiting -> completed` only; any other source state is illegal.
    pub fn complete(&mut self) -> EngineResult<()> {
        self.transition(SessionStatus::Completed)
    }

    /// `active|waiting -> failed` — failure can interrupt any non-terminal state.
    pub fn fail(&mut self) -> EngineResult<()> {
        self.transition(SessionStatus::Failed)
    }

    pub fn suspend(&mut self) -> EngineResult<()> {
        self.transition(SessionStatus::Suspended)
    }

    pub fn resume(&mut self) -> EngineResult<()> {
        self.transition(SessionStatus::Active)
    }

    pub fn wait(&mut self) -> EngineResult<()> {
        self.transition(SessionStatus::Waiting)
    }

    fn transition(&mut self, to: SessionStatus) -> EngineResult<()> {
        use SessionStatus::*;
        let allowed = matches!(
            (self.status, to),
            (Active, Waiting)
                | (Active, Suspended)
                | (Active, Completed)
                | (Active, Failed)
                | (Waiting, Active)
                | (Waiting, Completed)
                | (Waiting, Failed)
                | (Suspended, Active)
                | (Suspended, Failed)
        );
        if !allowed {
            return Err(EngineError::InvalidStateTransition {
                from: format!("{:?}", self.status),
                to: format!("{to:?}"),
            });
        }
        self.status = to;
        self.last_activity_time = Utc::now();
        if matches!(to, Completed | Failed) {
            self.end_time = Some(Utc::now());
        }
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, SessionStatus::Completed | SessionStatus::Failed)
    }
}

/// Concurrent session store with LRU-based idle eviction under `max_tracked_sessions`
/// backpressure (§5). Active members of a parallel group are never evicted.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Mutex<Session>>>,
    recency: Mutex<LruCache<SessionId, ()>>,
    max_tracked: usize,
}

impl SessionRegistry {
    pub fn new(config: &SessionConfig) -> Self {
        let cap = NonZeroUsize::new(config.max_tracked_sessions.max(1)).unwrap();
        Self {
            sessions: DashMap::new(),
            recency: Mutex::new(LruCache::new(cap)),
            max_tracked: config.max_tracked_sessions,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn insert(&self, session: Session) -> EngineResult<()> {
        let id = session.session_id.clone();
        if self.sessions.len() >= self.max_tracked && !self.sessions.contains_key(&id) {
            self.evict_one()?;
        }
        self.sessions.insert(id.clone(), Arc::new(Mutex::new(session)));
        self.recency.lock().put(id, ());
        Ok(())
    }

    pub fn get(&self, id: &SessionId) -> EngineResult<Arc<Mutex<Session>>> {
        self.recency.lock().get(id);
        self.sessions
            .get(id)
            .map(|entry| entry.clone())
            .ok_or_else(|| EngineError::SessionNotFound(id.to_string()))
    }

    pub fn remove(&self, id: &SessionId) -> Option<Arc<Mutex<Session>>> {
        self.recency.lock().pop(id);
        self.sessions.remove(id).map(|(_, v)| v)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// Evict the least-recently-used idle, non-grouped session. Errors with
    /// `MaxSessionsExceeded` when nothing is evictable (every tracked
    /// session is an active parallel-group member).
    fn evict_one(&self) -> EngineResult<()> {
        let candidate = {
            let recency = self.recency.lock();
            recency
                .iter()
                .rev()
                .map(|(id, _)| id.clone())
                .find(|id| {
                    self.sessions
                        .get(id)
                        .map(|s| {
                            let s = s.lock();
                            s.parallel_group_id.is_none() || s.is_terminal()
                        })
                        .unwrap_or(true)
                })
        };
        match candidate {
            Some(id) => {
                self.remove(&id);
                Ok(())
            }
            None => Err(EngineError::MaxSessionsExceeded),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_ids() {
        assert!(SessionId::parse("has space").is_err());
        assert!(SessionId::parse("").is_err());
        assert!(SessionId::parse("../etc/passwd").is_err());
        assert!(SessionId::parse(&"a".repeat(65)).is_err());
        assert!(SessionId::parse(&"a".repeat(64)).is_ok());
        assert!(SessionId::parse("ok_id-12").is_ok());
        assert!(SessionId::parse("session.1").is_ok());
    }

    #[test]
    fn complete_from_active_succeeds_but_twice_fails() {
        let mut session = Session::new(
            SessionId::parse("s1").unwrap(),
            None,
            "six_hats".into(),
            "p".into(),
        );
        session.complete().unwrap();
        let err = session.complete().unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE_TRANSITION");
    }

    #[test]
    fn registry_evicts_lru_idle_session_under_pressure() {
        let config = SessionConfig {
            max_tracked_sessions: 2,
            idle_expiry_secs: 3600,
        };
        let registry = SessionRegistry::new(&config);
        registry
            .insert(Session::new(
                SessionId::parse("s1").unwrap(),
                None,
                "six_hats".into(),
                "p".into(),
            ))
            .unwrap();
        registry
            .insert(Session::new(
                SessionId::parse("s2").unwrap(),
                None,
                "six_hats".into(),
                "p".into(),
            ))
            .unwrap();
        registry
            .insert(Session::new(
                SessionId::parse("s3").unwrap(),
                None,
                "six_hats".into(),
                "p".into(),
            ))
            .unwrap();
        assert_eq!(registry.len(), 2);
        assert!(!registry.contains(&SessionId::parse("s1").unwrap()));
    }

    #[test]
    fn registry_refuses_to_evict_active_group_members() {
        let config = SessionConfig {
            max_tracked_sessions: 1,
            idle_expiry_secs: 3600,
        };
        let registry = SessionRegistry::new(&config);
        let mut grouped = Session::new(
            SessionId::parse("s1").unwrap(),
            None,
            "six_hats".into(),
            "p".into(),
        );
        grouped.parallel_group_id = Some(ParallelGroupId::new());
        registry.insert(grouped).unwrap();

        let err = registry
            .insert(Session::new(
                SessionId::parse("s2").unwrap(),
                None,
                "six_hats".into(),
                "p".into(),
            ))
            .unwrap_err();
        assert_eq!(err.code(), "MAX_SESSIONS_EXCEEDED");
    }
}
