//! Worktree merge engine.
//!
//! Integrates a task's isolated worktree branch (`auto-claude/<id>`) back
//! into the project's base branch with automated conflict handling, a stash
//! safety net for uncommitted changes, and idempotent cleanup. All merge and
//! discard operations against one project are serialized through a
//! per-project lock; previews and diffs are read-only and lock-free.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::models::agent_logs::AgentLogs;
use crate::domain::models::config::PathsConfig;
use crate::domain::models::plan::PlanFile;
use crate::domain::models::task::TaskStatus;
use crate::services::event_bus::{EventBus, TaskEventPayload};
use crate::services::git::{validate_branch_name, FileDiff, GitCli};

/// Status files both the base checkout and the worktree write while a task
/// runs. Conflicts limited to these are auto-resolved by taking the feature
/// branch's copy.
const TRANSIENT_STATUS_FILES: [&str; 2] = [PlanFile::FILE_NAME, AgentLogs::FILE_NAME];

/// Result of a completed (or already-complete) merge.
#[derive(Debug, Clone, Serialize)]
pub struct MergeOutcome {
    pub message: String,
    /// `None` when the branch was already contained in the base
    pub merge_commit: Option<String>,
}

/// Read-only summary of what a merge would integrate.
#[derive(Debug, Clone, Serialize)]
pub struct MergePreview {
    pub branch: String,
    pub base_branch: String,
    pub commit_count: usize,
    pub changed_file_count: usize,
}

/// Result of discarding a task's worktree and branch.
#[derive(Debug, Clone, Serialize)]
pub struct DiscardOutcome {
    pub removed_worktree: bool,
    pub deleted_branch: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConflictClass {
    Transient,
    Submodule,
    Other,
}

/// Performs worktree-to-base merges for tasks.
pub struct MergeEngine {
    paths: PathsConfig,
    events: Arc<EventBus>,
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl MergeEngine {
    pub fn new(paths: PathsConfig, events: Arc<EventBus>) -> Self {
        Self {
            paths,
            events,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Merge the task's feature branch into the resolved base branch.
    ///
    /// Base resolution order: explicit `target_branch`, the plan artifact's
    /// `parent_branch`, the currently checked-out branch, then a
    /// `main`/`master` fallback. The operation is idempotent: a branch with
    /// no commits beyond the base just marks the plan `done` again.
    #[instrument(skip(self, project), fields(project = %project.display()))]
    pub async fn merge(
        &self,
        task_id: &str,
        project: &Path,
        target_branch: Option<&str>,
    ) -> OrchestratorResult<MergeOutcome> {
        if !project.is_dir() {
            return Err(OrchestratorError::ProjectNotFound(project.to_path_buf()));
        }
        let lock = self.project_lock(project).await;
        let _guard = lock.lock().await;

        let git = GitCli::new(project);
        let branch = self.paths.branch_name(task_id);
        validate_branch_name(&branch)?;
        if let Some(target) = target_branch {
            validate_branch_name(target)?;
        }
        if !git.branch_exists(&branch).await? {
            return Err(OrchestratorError::Git {
                op: "merge".to_string(),
                message: format!("feature branch '{branch}' does not exist"),
            });
        }

        let spec_dir = self.paths.spec_dir(project, task_id);
        let base = self.resolve_base_branch(&git, &spec_dir, target_branch).await?;

        if git.current_branch().await?.as_deref() != Some(base.as_str()) {
            git.checkout(&base).await?;
        }

        if git.commits_ahead(&base, &branch).await?.is_empty() {
            info!(task_id, %branch, %base, "branch already contained in base");
            self.finalize(task_id, &spec_dir).await?;
            return Ok(MergeOutcome {
                message: format!("'{branch}' is already merged into '{base}'"),
                merge_commit: None,
            });
        }

        // A merge left half-done by an earlier crash would wedge everything
        // below.
        git.merge_abort().await;

        git.ensure_excluded(&self.paths.worktrees_exclude_pattern())
            .await?;

        let stashed = if self.has_unrelated_changes(&git).await? {
            git.stash_push("autoclaude: pre-merge snapshot").await?;
            true
        } else {
            false
        };

        if let Err(e) = self.remove_untracked_spec_copy(&git, project, task_id).await {
            if stashed {
                Self::restore_stash(&git).await;
            }
            return Err(e);
        }

        if let Err(merge_err) = git.merge(&branch).await {
            let conflicts = git.conflicting_paths().await?;
            if conflicts.is_empty() {
                // Not a content conflict; propagate the git failure as-is.
                git.merge_abort().await;
                if stashed {
                    Self::restore_stash(&git).await;
                }
                return Err(merge_err);
            }

            let classes = self.classify_conflicts(&git, &conflicts).await?;
            if classes.iter().any(|(_, c)| *c == ConflictClass::Other) {
                // Leave the merge in place for manual inspection, but never
                // leave the stash dangling.
                warn!(task_id, ?conflicts, "merge requires manual resolution");
                if stashed {
                    Self::restore_stash(&git).await;
                }
                return Err(OrchestratorError::MergeConflict {
                    branch,
                    files: conflicts,
                });
            }

            for (path, class) in &classes {
                match class {
                    ConflictClass::Transient => git.checkout_theirs(path).await?,
                    ConflictClass::Submodule => git.checkout_ours(path).await?,
                    ConflictClass::Other => unreachable!("filtered above"),
                }
                git.add(path).await?;
            }
            git.commit_merge().await?;
            info!(task_id, resolved = conflicts.len(), "auto-resolved conflicts");
        }

        if stashed {
            Self::restore_stash(&git).await;
        }

        self.finalize(task_id, &spec_dir).await?;
        let commit = git.head_commit().await?;
        info!(task_id, %branch, %base, %commit, "merge completed");
        Ok(MergeOutcome {
            message: format!("Merged '{branch}' into '{base}'"),
            merge_commit: Some(commit),
        })
    }

    /// Remove the task's worktree directory and force-delete its branch.
    /// Both are idempotent no-ops when the target does not exist.
    #[instrument(skip(self, project), fields(project = %project.display()))]
    pub async fn discard(
        &self,
        task_id: &str,
        project: &Path,
    ) -> OrchestratorResult<DiscardOutcome> {
        if !project.is_dir() {
            return Err(OrchestratorError::ProjectNotFound(project.to_path_buf()));
        }
        let lock = self.project_lock(project).await;
        let _guard = lock.lock().await;

        let git = GitCli::new(project);
        let branch = self.paths.branch_name(task_id);
        validate_branch_name(&branch)?;

        let worktree_dir = self.paths.worktree_dir(project, task_id);
        let removed_worktree = git.worktree_remove_force(&worktree_dir).await?;
        let deleted_branch = git.branch_delete_force(&branch).await?;

        info!(task_id, removed_worktree, deleted_branch, "worktree discarded");
        Ok(DiscardOutcome {
            removed_worktree,
            deleted_branch,
        })
    }

    /// Report what a merge would do. Never stashes, checks out, or writes.
    pub async fn merge_preview(
        &self,
        task_id: &str,
        project: &Path,
    ) -> OrchestratorResult<MergePreview> {
        if !project.is_dir() {
            return Err(OrchestratorError::ProjectNotFound(project.to_path_buf()));
        }
        let git = GitCli::new(project);
        let branch = self.paths.branch_name(task_id);
        validate_branch_name(&branch)?;
        if !git.branch_exists(&branch).await? {
            return Err(OrchestratorError::Git {
                op: "merge preview".to_string(),
                message: format!("feature branch '{branch}' does not exist"),
            });
        }

        let spec_dir = self.paths.spec_dir(project, task_id);
        let base = self.resolve_base_branch(&git, &spec_dir, None).await?;
        let commit_count = git.commits_ahead(&base, &branch).await?.len();
        let changed_file_count = git.changed_files(&base, &branch).await?.len();

        Ok(MergePreview {
            branch,
            base_branch: base,
            commit_count,
            changed_file_count,
        })
    }

    /// Per-file change stats between the resolved base and the feature
    /// branch. Read-only.
    pub async fn worktree_diff(
        &self,
        task_id: &str,
        project: &Path,
    ) -> OrchestratorResult<Vec<FileDiff>> {
        if !project.is_dir() {
            return Err(OrchestratorError::ProjectNotFound(project.to_path_buf()));
        }
        let git = GitCli::new(project);
        let branch = self.paths.branch_name(task_id);
        validate_branch_name(&branch)?;

        let spec_dir = self.paths.spec_dir(project, task_id);
        let base = self.resolve_base_branch(&git, &spec_dir, None).await?;
        git.diff_numstat(&base, &branch).await
    }

    async fn project_lock(&self, project: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(project.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn resolve_base_branch(
        &self,
        git: &GitCli,
        spec_dir: &Path,
        target_branch: Option<&str>,
    ) -> OrchestratorResult<String> {
        if let Some(target) = target_branch {
            return Ok(target.to_string());
        }
        if let Ok(plan) = PlanFile::load(spec_dir).await {
            if let Some(parent) = plan.parent_branch {
                validate_branch_name(&parent)?;
                return Ok(parent);
            }
        }
        if let Some(current) = git.current_branch().await? {
            return Ok(current);
        }
        for candidate in ["main", "master"] {
            if git.branch_exists(candidate).await? {
                return Ok(candidate.to_string());
            }
        }
        Err(OrchestratorError::Git {
            op: "resolve base branch".to_string(),
            message: "no base branch could be resolved".to_string(),
        })
    }

    /// Whether the working tree has tracked modifications outside the
    /// worktrees storage area.
    async fn has_unrelated_changes(&self, git: &GitCli) -> OrchestratorResult<bool> {
        let exclude_prefix = self.paths.worktrees_exclude_pattern();
        let status = git.status_porcelain().await?;
        Ok(status.lines().any(|line| {
            if line.len() < 4 || line.starts_with("??") {
                return false;
            }
            !line[3..].starts_with(&exclude_prefix)
        }))
    }

    /// Delete an untracked local copy of the task's spec directory; the
    /// merge reintroduces the committed version.
    async fn remove_untracked_spec_copy(
        &self,
        git: &GitCli,
        project: &Path,
        task_id: &str,
    ) -> OrchestratorResult<()> {
        let spec_dir = self.paths.spec_dir(project, task_id);
        if !spec_dir.exists() {
            return Ok(());
        }
        let rel = spec_dir.strip_prefix(project).unwrap_or(&spec_dir);
        if !git.has_tracked_files_under(rel).await? {
            tokio::fs::remove_dir_all(&spec_dir).await?;
        }
        Ok(())
    }

    async fn classify_conflicts(
        &self,
        git: &GitCli,
        conflicts: &[String],
    ) -> OrchestratorResult<Vec<(String, ConflictClass)>> {
        let mut classes = Vec::with_capacity(conflicts.len());
        for path in conflicts {
            let class = if is_transient_status_file(path) {
                ConflictClass::Transient
            } else if git.is_submodule(path).await? {
                ConflictClass::Submodule
            } else {
                ConflictClass::Other
            };
            classes.push((path.clone(), class));
        }
        Ok(classes)
    }

    /// Pop the safety stash; when popping conflicts with the merge result,
    /// drop it rather than leave the repository half-merged, half-stashed.
    async fn restore_stash(git: &GitCli) {
        if let Err(e) = git.stash_pop().await {
            warn!(error = %e, "stash pop conflicted; dropping stash");
            git.stash_drop().await;
        }
    }

    async fn finalize(&self, task_id: &str, spec_dir: &Path) -> OrchestratorResult<()> {
        let mut plan = PlanFile::load_or_default(spec_dir).await?;
        plan.mark_merged();
        plan.save(spec_dir).await?;
        self.events.publish(
            task_id,
            TaskEventPayload::StatusChange {
                status: TaskStatus::Done,
            },
        );
        Ok(())
    }
}

fn is_transient_status_file(path: &str) -> bool {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| TRANSIENT_STATUS_FILES.contains(&name))
}
