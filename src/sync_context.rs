//! `SessionSynchronizer` and `SharedContext` (§5 "SharedContext").
//!
//! Writes are serialized per group behind a tokio mutex; the publication
//! policy (when a write becomes visible to readers) depends on `SyncMode`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::plan::ParallelGroupId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    #[default]
    Immediate,
    StepAligned,
    OnCompletion,
}

/// `{sharedInsights[], sharedThemes{}, metricsRollup, lastUpdate, syncMode}` (§3.2).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SharedContext {
    pub shared_insights: Vec<String>,
    pub shared_themes: HashMap<String, u32>,
    pub metrics_rollup: HashMap<String, f64>,
    pub last_update: Option<DateTime<Utc>>,
    pub sync_mode: SyncMode,
}

struct GroupState {
    published: SharedContext,
    staged: SharedContext,
    mode: SyncMode,
    min_step: u32,
    steps: HashMap<String, u32>,
}

impl GroupState {
    fn new(mode: SyncMode) -> Self {
        Self {
            published: SharedContext {
                sync_mode: mode,
                ..Default::default()
            },
            staged: SharedContext {
                sync_mode: mode,
                ..Default::default()
            },
            mode,
            min_step: 0,
            steps: HashMap::new(),
        }
    }
}

/// Keeps one [`SharedContext`] per parallel group, publishing staged writes
/// according to the group's sync mode (§5).
pub struct SessionSynchronizer {
    groups: DashMap<ParallelGroupId, Arc<Mutex<GroupState>>>,
}

impl Default for SessionSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionSynchronizer {
    pub fn new() -> Self {
        Self {
            groups: DashMap::new(),
        }
    }

    pub fn init_group(&self, group_id: ParallelGroupId, mode: SyncMode) {
        self.groups
            .entry(group_id)
            .or_insert_with(|| Arc::new(Mutex::new(GroupState::new(mode))));
    }

    fn state_for(&self, group_id: ParallelGroupId) -> Option<Arc<Mutex<GroupState>>> {
        self.groups.get(&group_id).map(|e| e.clone())
    }

    /// Merge an update from `session_id` at `step` into the group's context,
    /// publishing it per the configured `SyncMode`.
    pub async fn publish_update(
        &self,
        group_id: ParallelGroupId,
        session_id: &str,
        step: u32,
        insights: Vec<String>,
        themes: Vec<String>,
        metrics: HashMap<String, f64>,
        group_terminal: bool,
    ) {
        let state = match self.state_for(group_id) {
            Some(s) => s,
            None => return,
        };
        let mut state = state.lock().await;

        for insight in insights {
            if !state.staged.shared_insights.contains(&insight) {
                state.staged.shared_insights.push(insight);
            }
        }
        for theme in themes {
            *state.staged.shared_themes.entry(theme).or_insert(0) += 1;
        }
        for (k, v) in metrics {
            state.staged.metrics_rollup.insert(k, v);
        }
        state.staged.last_update = Some(Utc::now());
        state.steps.insert(session_id.to_string(), step);

        match state.mode {
            SyncMode::Immediate => {
                state.published = state.staged.clone();
            }
            SyncMode::StepAligned => {
                let min_step = state.steps.values().copied().min().unwrap_or(0);
                if min_step > state.min_step || (min_step == state.min_step && min_step == 0) {
                    state.min_step = min_step;
                    state.published = state.staged.clone();
                }
            }
            SyncMode::OnCompletion => {
                if group_terminal {
                    state.published = state.staged.clone();
                }
            }
        }
    }

    /// Readers observe the most recently published, internally coherent
    /// snapshot — never a partially-applied staged write.
    pub async fn get_shared_context(&self, group_id: ParallelGroupId) -> SharedContext {
        match self.state_for(group_id) {
            Some(state) => state.lock().await.published.clone(),
            None => SharedContext::default(),
        }
    }

    pub fn remove_group(&self, group_id: ParallelGroupId) {
        self.groups.remove(&group_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn immediate_mode_publishes_every_write() {
        let sync = SessionSynchronizer::new();
        let group = ParallelGroupId::new();
        sync.init_group(group, SyncMode::Immediate);
        sync.publish_update(group, "s1", 1, vec!["insight-a".into()], vec![], HashMap::new(), false)
            .await;
        let ctx = sync.get_shared_context(group).await;
        assert_eq!(ctx.shared_insights, vec!["insight-a".to_string()]);
    }

    #[tokio::test]
    async fn on_completion_mode_withholds_until_terminal() {
        let sync = SessionSynchronizer::new();
        let group = ParallelGroupId::new();
        sync.init_group(group, SyncMode::OnCompletion);
        sync.publish_update(group, "s1", 1, vec!["x".into()], vec![], HashMap::new(), false)
            .await;
        assert!(sync.get_shared_context(group).await.shared_insights.is_empty());
        sync.publish_update(group, "s1", 2, vec!["y".into()], vec![], HashMap::new(), true)
            .await;
        assert_eq!(
            sync.get_shared_context(group).await.shared_insights,
            vec!["x".to_string(), "y".to_string()]
        );
    }
}
