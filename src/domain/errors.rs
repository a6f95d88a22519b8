//! Domain errors for the autoclaude orchestration engine.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the orchestration services.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Task not found: no spec directory for '{0}'")]
    TaskNotFound(String),

    #[error("Project not found: {}", .0.display())]
    ProjectNotFound(PathBuf),

    #[error("Failed to spawn worker '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Merge of '{branch}' has unresolved conflicts in: {}", .files.join(", "))]
    MergeConflict { branch: String, files: Vec<String> },

    #[error("git {op} failed: {message}")]
    Git { op: String, message: String },

    #[error("git {op} timed out after {timeout_secs}s")]
    GitTimeout { op: String, timeout_secs: u64 },

    #[error("Invalid branch name '{name}': {reason}")]
    InvalidBranchName { name: String, reason: String },

    #[error("Artifact error for spec '{spec_id}': {message}")]
    Artifact { spec_id: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
