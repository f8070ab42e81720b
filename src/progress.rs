//! `ProgressCoordinator` (§4.7).
//!
//! Per-session updates are serialized via a per-session lock keyed in a map
//! that is pruned after each release, so the lock table never grows
//! unbounded (§5 "Locks are keyed by sessionId").

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::events::{Event, EventBus};
use crate::plan::ParallelGroupId;
use crate::session::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressState {
    Pending,
    InProgress,
    Waiting,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub session_id: SessionId,
    pub state: ProgressState,
    pub dependencies: Vec<SessionId>,
    pub steps_completed: u32,
    pub total_steps: u32,
}

impl ProgressRecord {
    fn new(session_id: SessionId, total_steps: u32) -> Self {
        Self {
            session_id,
            state: ProgressState::Pending,
            dependencies: Vec::new(),
            steps_completed: 0,
            total_steps,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GroupAggregate {
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
    pub waiting: u32,
    pub in_progress: u32,
    pub overall_progress: f64,
}

/// Tracks per-session and per-group progress state, serializing writes per
/// session while leaving cross-session reads lock-free (§5).
pub struct ProgressCoordinator {
    records: DashMap<SessionId, ProgressRecord>,
    groups: DashMap<ParallelGroupId, Vec<SessionId>>,
    locks: DashMap<SessionId, Arc<Mutex<()>>>,
    events: Arc<EventBus>,
}

impl ProgressCoordinator {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            records: DashMap::new(),
            groups: DashMap::new(),
            locks: DashMap::new(),
            events,
        }
    }

    pub fn register(&self, session_id: SessionId, total_steps: u32) {
        self.records
            .insert(session_id.clone(), ProgressRecord::new(session_id, total_steps));
    }

    pub fn add_to_group(&self, group_id: ParallelGroupId, session_id: SessionId) {
        self.groups.entry(group_id).or_default().push(session_id);
    }

    fn lock_for(&self, session_id: &SessionId) -> Arc<Mutex<()>> {
        self.locks
            .entry(session_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn prune_lock(&self, session_id: &SessionId) {
        // Only drop the map entry once nobody else holds the Arc.
        if let Some(entry) = self.locks.get(session_id) {
            if Arc::strong_count(&entry) == 1 {
                drop(entry);
                self.locks.remove(session_id);
            }
        }
    }

    /// Apply a state transition, serialized per session. Rejected
    /// transitions are no-ops that return `false` rather than erroring
    /// (§4.7 "Rejected transitions are no-ops with a warning event").
    pub async fn transition(
        &self,
        session_id: &SessionId,
        group_id: Option<ParallelGroupId>,
        to: ProgressState,
        dependencies: Vec<SessionId>,
    ) -> bool {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let applied = {
            let mut record = match self.records.get_mut(session_id) {
                Some(r) => r,
                None => return false,
            };
            if Self::allowed(record.state, to) {
                record.state = to;
                if to == ProgressState::Waiting {
                    record.dependencies = dependencies;
                } else if to != ProgressState::Waiting {
                    record.dependencies.clear();
                }
                if to == ProgressState::Completed {
                    record.steps_completed = record.total_steps;
                }
                true
            } else {
                false
            }
        };

        drop(_guard);
        self.prune_lock(session_id);

        if applied {
            self.events.emit(Event::Progress {
                session_id: session_id.clone(),
            });
            if let Some(group_id) = group_id {
                self.events.emit(Event::ProgressForGroup {
                    group_id,
                    session_id: session_id.clone(),
                });
                if to == ProgressState::Waiting && self.check_deadlock(group_id) {
                    self.events.emit(Event::Deadlock { group_id });
                }
            }
        }
        applied
    }

    fn allowed(from: ProgressState, to: ProgressState) -> bool {
        use ProgressState::*;
        matches!(
            (from, to),
            (Pending, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Waiting)
                | (Waiting, InProgress)
                | (Waiting, Failed)
                | (Pending, Failed)
        )
    }

    pub fn record(&self, session_id: &SessionId) -> Option<ProgressRecord> {
        self.records.get(session_id).map(|r| r.clone())
    }

    /// `{total, completed, failed, waiting, inProgress, overallProgress}` (§4.7).
    pub fn group_aggregate(&self, group_id: ParallelGroupId) -> Option<GroupAggregate> {
        let members = self.groups.get(&group_id)?;
        let mut agg = GroupAggregate {
            total: members.len() as u32,
            completed: 0,
            failed: 0,
            waiting: 0,
            in_progress: 0,
            overall_progress: 0.0,
        };
        let mut progress_sum = 0.0;
        for id in members.iter() {
            if let Some(record) = self.records.get(id) {
                match record.state {
                    ProgressState::Completed => agg.completed += 1,
                    ProgressState::Failed => agg.failed += 1,
                    ProgressState::Waiting => agg.waiting += 1,
                    ProgressState::InProgress => agg.in_progress += 1,
                    ProgressState::Pending => {}
                }
                if record.total_steps > 0 {
                    progress_sum += record.steps_completed as f64 / record.total_steps as f64;
                }
            }
        }
        if agg.total > 0 {
            agg.overall_progress = progress_sum / agg.total as f64;
        }
        Some(agg)
    }

    /// A group is deadlocked iff every member is in `{waiting, pending}`
    /// and at least one member is `waiting` (§4.7).
    fn check_deadlock(&self, group_id: ParallelGroupId) -> bool {
        let members = match self.groups.get(&group_id) {
            Some(m) => m,
            None => return false,
        };
        let mut any_waiting = false;
        for id in members.iter() {
            match self.records.get(id).map(|r| r.state) {
                Some(ProgressState::Waiting) => any_waiting = true,
                Some(ProgressState::Pending) => {}
                _ => return false,
            }
        }
        any_waiting
    }

    /// Remove a group's records and purge its group-scoped listeners —
    /// mandatory per §5 to avoid listener leaks.
    pub fn clear_group_progress(&self, group_id: ParallelGroupId) -> usize {
        if let Some((_, members)) = self.groups.remove(&group_id) {
            for id in members {
                self.records.remove(&id);
            }
        }
        self.events.clear_group_listeners(group_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ParallelGroupId;

    fn sid(s: &str) -> SessionId {
        SessionId::parse(s).unwrap()
    }

    #[tokio::test]
    async fn pending_to_in_progress_then_completed() {
        let events = Arc::new(EventBus::new());
        let coordinator = ProgressCoordinator::new(events);
        coordinator.register(sid("s1"), 6);
        assert!(coordinator.transition(&sid("s1"), None, ProgressState::InProgress, vec![]).await);
        assert!(coordinator.transition(&sid("s1"), None, ProgressState::Completed, vec![]).await);
        assert_eq!(coordinator.record(&sid("s1")).unwrap().state, ProgressState::Completed);
    }

    #[tokio::test]
    async fn completed_to_anything_is_rejected() {
        let events = Arc::new(EventBus::new());
        let coordinator = ProgressCoordinator::new(events);
        coordinator.register(sid("s1"), 1);
        coordinator.transition(&sid("s1"), None, ProgressState::InProgress, vec![]).await;
        coordinator.transition(&sid("s1"), None, ProgressState::Completed, vec![]).await;
        let applied = coordinator
            .transition(&sid("s1"), None, ProgressState::InProgress, vec![])
            .await;
        assert!(!applied);
    }

    #[tokio::test]
    async fn mutual_waiting_triggers_deadlock_event() {
        let events = Arc::new(EventBus::new());
        let coordinator = ProgressCoordinator::new(events.clone());
        let group = ParallelGroupId::new();
        let (_id, mut rx) = events.subscribe_group(group);

        coordinator.register(sid("a"), 1);
        coordinator.register(sid("b"), 1);
        coordinator.add_to_group(group, sid("a"));
        coordinator.add_to_group(group, sid("b"));

        coordinator
            .transition(&sid("a"), Some(group), ProgressState::InProgress, vec![])
            .await;
        coordinator
            .transition(&sid("a"), Some(group), ProgressState::Waiting, vec![sid("b")])
            .await;
        coordinator
            .transition(&sid("b"), Some(group), ProgressState::Waiting, vec![sid("a")])
            .await;

        let mut saw_deadlock = false;
        while let Ok(evt) = rx.try_recv() {
            if matches!(evt, Event::Deadlock { .. }) {
                saw_deadlock = true;
            }
        }
        assert!(saw_deadlock);
    }

    #[tokio::test]
    async fn clear_group_progress_drops_listeners() {
        let events = Arc::new(EventBus::new());
        let coordinator = ProgressCoordinator::new(events.clone());
        let group = ParallelGroupId::new();
        let (_id, _rx) = events.subscribe_group(group);
        assert_eq!(events.group_listener_count(group), 1);
        coordinator.clear_group_progress(group);
        assert_eq!(events.group_listener_count(group), 0);
    }
}
