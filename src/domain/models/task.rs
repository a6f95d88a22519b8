//! Task status model.
//!
//! The effective status of a task is a projection: the on-disk plan artifact
//! plus the registry's knowledge of whether a worker process is currently
//! running for that spec id.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a task.
///
/// `Stopped` only ever appears in broadcast events (manual stop); it is
/// never derived from the plan artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not started, or returned for retry after a failed run
    Backlog,
    /// A worker process is executing (or the artifact says so)
    InProgress,
    /// Completed without QA approval, needs another automated pass
    AiReview,
    /// Ready for a human: either approved work or recorded errors
    HumanReview,
    /// Merged into the base branch
    Done,
    /// Manually stopped
    Stopped,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Backlog
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::InProgress => "in_progress",
            Self::AiReview => "ai_review",
            Self::HumanReview => "human_review",
            Self::Done => "done",
            Self::Stopped => "stopped",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "backlog" => Some(Self::Backlog),
            "in_progress" => Some(Self::InProgress),
            "ai_review" => Some(Self::AiReview),
            "human_review" => Some(Self::HumanReview),
            "done" => Some(Self::Done),
            "stopped" => Some(Self::Stopped),
            _ => None,
        }
    }

    /// `Done` is the only terminal state; it is reached exclusively through
    /// the merge engine.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a task landed in `HumanReview`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewReason {
    /// At least one subtask failed
    Errors,
    /// All subtasks completed and QA signed off
    Completed,
}

impl ReviewReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Errors => "errors",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for ReviewReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
