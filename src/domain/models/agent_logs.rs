//! Structured agent log artifact.
//!
//! The worker appends structured entries per phase (`planning`, `coding`,
//! `validation`). Planning happens before the worktree exists, so its log
//! lives in the primary spec directory; coding and validation run inside the
//! isolated worktree and land in its mirror copy. `merged` reconciles the
//! two locations.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of one logged phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl Default for PhaseStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// Log of a single phase: status plus opaque structured entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseLog {
    #[serde(default)]
    pub status: PhaseStatus,
    #[serde(default)]
    pub entries: Vec<serde_json::Value>,
}

impl PhaseLog {
    /// Whether this copy carries anything worth preferring over another.
    pub fn has_data(&self) -> bool {
        !self.entries.is_empty() || self.status != PhaseStatus::Pending
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseLogs {
    #[serde(default)]
    pub planning: PhaseLog,
    #[serde(default)]
    pub coding: PhaseLog,
    #[serde(default)]
    pub validation: PhaseLog,
}

/// The on-disk structured log artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLogs {
    pub spec_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub phases: PhaseLogs,
}

impl AgentLogs {
    pub const FILE_NAME: &'static str = "agent_logs.json";

    pub fn path_in(spec_dir: &Path) -> PathBuf {
        spec_dir.join(Self::FILE_NAME)
    }

    /// Reconcile the primary and worktree copies.
    ///
    /// `planning` is always taken from the primary copy when one exists.
    /// `coding` and `validation` come from the worktree copy whenever it has
    /// recorded anything, falling back to the primary otherwise.
    pub fn merged(primary: Option<Self>, worktree: Option<Self>) -> Option<Self> {
        match (primary, worktree) {
            (None, None) => None,
            (Some(p), None) => Some(p),
            (None, Some(w)) => Some(w),
            (Some(p), Some(w)) => {
                let mut out = p.clone();
                if w.phases.coding.has_data() {
                    out.phases.coding = w.phases.coding.clone();
                }
                if w.phases.validation.has_data() {
                    out.phases.validation = w.phases.validation.clone();
                }
                out.updated_at = p.updated_at.max(w.updated_at);
                Some(out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn logs(spec_id: &str) -> AgentLogs {
        AgentLogs {
            spec_id: spec_id.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            phases: PhaseLogs::default(),
        }
    }

    #[test]
    fn test_planning_always_from_primary() {
        let mut primary = logs("t1");
        primary.phases.planning.status = PhaseStatus::Completed;
        primary.phases.planning.entries = vec![json!({"step": "plan"})];

        let mut worktree = logs("t1");
        worktree.phases.planning.status = PhaseStatus::InProgress;
        worktree.phases.planning.entries = vec![json!({"step": "stale"})];

        let merged = AgentLogs::merged(Some(primary), Some(worktree)).unwrap();
        assert_eq!(merged.phases.planning.status, PhaseStatus::Completed);
        assert_eq!(merged.phases.planning.entries.len(), 1);
        assert_eq!(merged.phases.planning.entries[0]["step"], "plan");
    }

    #[test]
    fn test_coding_prefers_worktree_when_it_has_data() {
        let mut primary = logs("t1");
        primary.phases.coding.entries = vec![json!({"n": 1})];

        let mut worktree = logs("t1");
        worktree.phases.coding.status = PhaseStatus::InProgress;
        worktree.phases.coding.entries = vec![json!({"n": 1}), json!({"n": 2})];

        let merged = AgentLogs::merged(Some(primary), Some(worktree)).unwrap();
        assert_eq!(merged.phases.coding.entries.len(), 2);
        assert_eq!(merged.phases.coding.status, PhaseStatus::InProgress);
    }

    #[test]
    fn test_coding_falls_back_to_primary_when_worktree_empty() {
        let mut primary = logs("t1");
        primary.phases.coding.status = PhaseStatus::Completed;
        primary.phases.coding.entries = vec![json!({"n": 1})];

        let worktree = logs("t1");

        let merged = AgentLogs::merged(Some(primary), Some(worktree)).unwrap();
        assert_eq!(merged.phases.coding.status, PhaseStatus::Completed);
        assert_eq!(merged.phases.coding.entries.len(), 1);
    }

    #[test]
    fn test_single_sided_merge() {
        assert!(AgentLogs::merged(None, None).is_none());
        let only = AgentLogs::merged(Some(logs("t1")), None).unwrap();
        assert_eq!(only.spec_id, "t1");
        let only = AgentLogs::merged(None, Some(logs("t2"))).unwrap();
        assert_eq!(only.spec_id, "t2");
    }
}
