//! Plan artifact model.
//!
//! The plan file is the authoritative on-disk record of a task: its status,
//! the phased chunk breakdown the worker executes, the QA sign-off verdict,
//! and the merge bookkeeping (`parent_branch`, `merged_at`). The worker
//! process and this engine both write it; the in-memory view is always a
//! projection of this file plus the running-process flag.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::models::task::{ReviewReason, TaskStatus};

/// Status of a single plan chunk (subtask).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl Default for ChunkStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl ChunkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One unit of work inside a phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub status: ChunkStatus,
}

/// A named group of chunks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Phase {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub chunks: Vec<Chunk>,
}

/// QA sign-off verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QaStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaSignoff {
    pub status: QaStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// The on-disk plan artifact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanFile {
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub phases: Vec<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qa_signoff: Option<QaSignoff>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_at: Option<DateTime<Utc>>,
}

impl PlanFile {
    pub const FILE_NAME: &'static str = "implementation_plan.json";

    pub fn path_in(spec_dir: &Path) -> PathBuf {
        spec_dir.join(Self::FILE_NAME)
    }

    /// Read the plan from a spec directory.
    pub async fn load(spec_dir: &Path) -> OrchestratorResult<Self> {
        let path = Self::path_in(spec_dir);
        let bytes = tokio::fs::read(&path).await?;
        serde_json::from_slice(&bytes).map_err(|e| OrchestratorError::Artifact {
            spec_id: spec_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            message: format!("invalid plan file {}: {e}", path.display()),
        })
    }

    /// Read the plan, or start from an empty one when the worker has not
    /// written it yet.
    pub async fn load_or_default(spec_dir: &Path) -> OrchestratorResult<Self> {
        match tokio::fs::read(Self::path_in(spec_dir)).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| OrchestratorError::Artifact {
                spec_id: spec_dir
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                message: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, spec_dir: &Path) -> OrchestratorResult<()> {
        tokio::fs::create_dir_all(spec_dir).await?;
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(Self::path_in(spec_dir), json).await?;
        Ok(())
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.phases.iter().flat_map(|p| p.chunks.iter())
    }

    pub fn qa_approved(&self) -> bool {
        self.qa_signoff
            .as_ref()
            .is_some_and(|qa| qa.status == QaStatus::Approved)
    }

    /// Record the branch the task was started from. First start wins; a
    /// restart never overwrites it.
    pub fn record_parent_branch(&mut self, branch: &str) -> bool {
        if self.parent_branch.is_some() {
            return false;
        }
        self.parent_branch = Some(branch.to_string());
        true
    }

    /// Mark the task merged: status `done`, `merged_at` set once.
    pub fn mark_merged(&mut self) {
        self.status = TaskStatus::Done;
        if self.merged_at.is_none() {
            self.merged_at = Some(Utc::now());
        }
    }

    /// Effective status of the task (spec projection): a running process
    /// always wins; otherwise failures, then completion + QA, then whatever
    /// the artifact says.
    pub fn derived_status(&self, process_running: bool) -> (TaskStatus, Option<ReviewReason>) {
        if process_running {
            return (TaskStatus::InProgress, None);
        }
        if self.chunks().any(|c| c.status == ChunkStatus::Failed) {
            return (TaskStatus::HumanReview, Some(ReviewReason::Errors));
        }
        let mut chunks = self.chunks().peekable();
        if chunks.peek().is_some() && chunks.all(|c| c.status == ChunkStatus::Completed) {
            if self.qa_approved() {
                return (TaskStatus::HumanReview, Some(ReviewReason::Completed));
            }
            return (TaskStatus::AiReview, None);
        }
        (self.status, None)
    }

    /// Final status after the worker exits.
    ///
    /// Nonzero (or signal-killed) exits return the task to the backlog for
    /// retry. A clean exit derives from the recorded chunks: failures need a
    /// human, completed-and-approved work needs a human, anything else gets
    /// another automated pass.
    pub fn status_after_exit(&self, code: Option<i32>) -> (TaskStatus, Option<ReviewReason>) {
        if code != Some(0) {
            return (TaskStatus::Backlog, None);
        }
        if self.chunks().any(|c| c.status == ChunkStatus::Failed) {
            return (TaskStatus::HumanReview, Some(ReviewReason::Errors));
        }
        let mut chunks = self.chunks().peekable();
        if chunks.peek().is_some()
            && chunks.all(|c| c.status == ChunkStatus::Completed)
            && self.qa_approved()
        {
            return (TaskStatus::HumanReview, Some(ReviewReason::Completed));
        }
        (TaskStatus::AiReview, None)
    }
}
