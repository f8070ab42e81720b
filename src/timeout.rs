//! `SessionTimeoutMonitor` (§4.10).
//!
//! Each session gets up to two independent timers: an execution timer
//! (fires `timeout-warning` at 80% and `timeout` at 100%) and, while
//! `waiting`, a dependency-wait timer. A progress-stale interval is re-armed
//! by the caller each time activity is observed.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::events::{Event, EventBus};
use crate::session::SessionId;

struct ExecutionTimer {
    handle: JoinHandle<()>,
    deadline: Arc<Mutex<Instant>>,
}

/// Tracks and fires timeout-related events for active sessions.
pub struct SessionTimeoutMonitor {
    events: Arc<EventBus>,
    execution_timers: DashMap<SessionId, ExecutionTimer>,
    dependency_timers: DashMap<SessionId, JoinHandle<()>>,
    stale_timers: DashMap<SessionId, JoinHandle<()>>,
}

impl SessionTimeoutMonitor {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            events,
            execution_timers: DashMap::new(),
            dependency_timers: DashMap::new(),
            stale_timers: DashMap::new(),
        }
    }

    /// Arm the execution timer: `timeout-warning` at 80% of `duration`,
    /// `timeout` at 100%.
    pub fn start_execution_timer(&self, session_id: SessionId, duration: Duration) {
        self.cancel_execution_timer(&session_id);
        let deadline = Arc::new(Mutex::new(Instant::now() + duration));
        let events = self.events.clone();
        let sid = session_id.clone();
        let deadline_clone = deadline.clone();
        let handle = tokio::spawn(async move {
            loop {
                let target = *deadline_clone.lock().await;
                let warning_at = target - duration.mul_f64(0.20);
                let now = Instant::now();
                if now < warning_at {
                    tokio::time::sleep(warning_at - now).await;
                    continue;
                }
                events.emit(Event::TimeoutWarning {
                    session_id: sid.clone(),
                });
                let now = Instant::now();
                let target = *deadline_clone.lock().await;
                if now < target {
                    tokio::time::sleep(target - now).await;
                }
                if Instant::now() >= *deadline_clone.lock().await {
                    events.emit(Event::Timeout {
                        session_id: sid.clone(),
                    });
                    break;
                }
            }
        });
        self.execution_timers
            .insert(session_id, ExecutionTimer { handle, deadline });
    }

    /// Rebind the execution deadline to `original + delta`. No-op on an
    /// unknown or already-fired session (§4.10 "idempotent").
    pub async fn extend_timeout(&self, session_id: &SessionId, delta: Duration) {
        if let Some(timer) = self.execution_timers.get(session_id) {
            let mut deadline = timer.deadline.lock().await;
            *deadline += delta;
        }
    }

    pub fn start_dependency_timer(&self, session_id: SessionId, duration: Duration) {
        self.cancel_dependency_timer(&session_id);
        let events = self.events.clone();
        let sid = session_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            events.emit(Event::DependencyTimeout { session_id: sid });
        });
        self.dependency_timers.insert(session_id, handle);
    }

    pub fn cancel_dependency_timer(&self, session_id: &SessionId) {
        if let Some((_, handle)) = self.dependency_timers.remove(session_id) {
            handle.abort();
        }
    }

    pub fn start_stale_timer(&self, session_id: SessionId, interval: Duration) {
        self.cancel_stale_timer(&session_id);
        let events = self.events.clone();
        let sid = session_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            events.emit(Event::ProgressStale { session_id: sid });
        });
        self.stale_timers.insert(session_id, handle);
    }

    pub fn cancel_stale_timer(&self, session_id: &SessionId) {
        if let Some((_, handle)) = self.stale_timers.remove(session_id) {
            handle.abort();
        }
    }

    pub fn cancel_execution_timer(&self, session_id: &SessionId) {
        if let Some((_, timer)) = self.execution_timers.remove(session_id) {
            timer.handle.abort();
        }
    }

    /// Clear every timer for every session, deterministically (§4.10).
    pub fn stop_monitoring(&self) {
        for entry in self.execution_timers.iter() {
            entry.handle.abort();
        }
        self.execution_timers.clear();
        for entry in self.dependency_timers.iter() {
            entry.abort();
        }
        self.dependency_timers.clear();
        for entry in self.stale_timers.iter() {
            entry.abort();
        }
        self.stale_timers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn timeout_warning_then_timeout_fire_in_order() {
        let events = Arc::new(EventBus::new());
        let monitor = SessionTimeoutMonitor::new(events.clone());
        let session_id = SessionId::parse("s1").unwrap();
        let (_id, mut rx) = events.subscribe();

        monitor.start_execution_timer(session_id.clone(), Duration::from_millis(50));

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert!(matches!(first, Event::TimeoutWarning { .. }));
        let second = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert!(matches!(second, Event::Timeout { .. }));

        monitor.stop_monitoring();
    }

    #[tokio::test]
    async fn extend_timeout_on_unknown_session_is_noop() {
        let events = Arc::new(EventBus::new());
        let monitor = SessionTimeoutMonitor::new(events);
        monitor
            .extend_timeout(&SessionId::parse("ghost").unwrap(), Duration::from_secs(10))
            .await;
    }

    #[tokio::test]
    async fn stop_monitoring_prevents_further_events() {
        let events = Arc::new(EventBus::new());
        let monitor = SessionTimeoutMonitor::new(events.clone());
        let session_id = SessionId::parse("s1").unwrap();
        let (_id, mut rx) = events.subscribe();
        monitor.start_execution_timer(session_id, Duration::from_millis(500));
        monitor.stop_monitoring();
        let res = tokio::time::timeout(Duration::from_millis(700), rx.recv()).await;
        assert!(res.is_err(), "no events should fire after stop_monitoring");
    }
}
