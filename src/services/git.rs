//! Git command runner.
//!
//! All repository operations go through the git CLI, bounded by per-class
//! timeouts so a wedged subprocess cannot block the orchestration loop
//! indefinitely. Failures carry the underlying command's stderr text.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::domain::errors::{OrchestratorError, OrchestratorResult};

/// Timeout for fast metadata queries (rev-parse, show-ref, status).
const QUERY_TIMEOUT: Duration = Duration::from_secs(5);
/// Timeout for tree-mutating operations (checkout, merge, stash, commit).
const MUTATE_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for worktree removal, which can touch many files.
const WORKTREE_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-file change stats from `diff --numstat`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FileDiff {
    pub path: String,
    /// `None` for binary files
    pub additions: Option<u64>,
    pub deletions: Option<u64>,
}

struct GitOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

/// Thin runner over the git CLI, rooted at one repository.
#[derive(Debug, Clone)]
pub struct GitCli {
    repo: PathBuf,
}

impl GitCli {
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self { repo: repo.into() }
    }

    pub fn repo(&self) -> &Path {
        &self.repo
    }

    async fn run_raw(
        &self,
        op: &str,
        args: &[&str],
        timeout: Duration,
    ) -> OrchestratorResult<GitOutput> {
        debug!(op, ?args, repo = %self.repo.display(), "running git");
        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(&self.repo)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| OrchestratorError::GitTimeout {
                op: op.to_string(),
                timeout_secs: timeout.as_secs(),
            })?
            .map_err(|e| OrchestratorError::Git {
                op: op.to_string(),
                message: format!("failed to run git: {e}"),
            })?;

        Ok(GitOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run a git command, failing on nonzero exit with the stderr text.
    async fn run(&self, op: &str, args: &[&str], timeout: Duration) -> OrchestratorResult<String> {
        let out = self.run_raw(op, args, timeout).await?;
        if out.success {
            Ok(out.stdout)
        } else {
            let message = if out.stderr.trim().is_empty() {
                out.stdout.trim().to_string()
            } else {
                out.stderr.trim().to_string()
            };
            Err(OrchestratorError::Git {
                op: op.to_string(),
                message,
            })
        }
    }

    /// Currently checked-out branch, or `None` when HEAD is detached.
    pub async fn current_branch(&self) -> OrchestratorResult<Option<String>> {
        let out = self
            .run(
                "rev-parse",
                &["rev-parse", "--abbrev-ref", "HEAD"],
                QUERY_TIMEOUT,
            )
            .await?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            Ok(None)
        } else {
            Ok(Some(name))
        }
    }

    pub async fn head_commit(&self) -> OrchestratorResult<String> {
        let out = self
            .run("rev-parse", &["rev-parse", "HEAD"], QUERY_TIMEOUT)
            .await?;
        Ok(out.trim().to_string())
    }

    pub async fn branch_exists(&self, name: &str) -> OrchestratorResult<bool> {
        let refname = format!("refs/heads/{name}");
        let out = self
            .run_raw(
                "show-ref",
                &["show-ref", "--verify", "--quiet", &refname],
                QUERY_TIMEOUT,
            )
            .await?;
        Ok(out.success)
    }

    pub async fn checkout(&self, branch: &str) -> OrchestratorResult<()> {
        self.run("checkout", &["checkout", branch], MUTATE_TIMEOUT)
            .await?;
        Ok(())
    }

    /// Commits on `branch` not reachable from `base`, one line per commit.
    pub async fn commits_ahead(&self, base: &str, branch: &str) -> OrchestratorResult<Vec<String>> {
        let range = format!("{base}..{branch}");
        let out = self
            .run("log", &["log", &range, "--oneline"], MUTATE_TIMEOUT)
            .await?;
        Ok(out.lines().map(str::to_string).collect())
    }

    /// Files changed on `branch` relative to the merge base with `base`.
    pub async fn changed_files(&self, base: &str, branch: &str) -> OrchestratorResult<Vec<String>> {
        let range = format!("{base}...{branch}");
        let out = self
            .run("diff", &["diff", "--name-only", &range], MUTATE_TIMEOUT)
            .await?;
        Ok(out
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub async fn diff_numstat(&self, base: &str, branch: &str) -> OrchestratorResult<Vec<FileDiff>> {
        let range = format!("{base}...{branch}");
        let out = self
            .run("diff", &["diff", "--numstat", &range], MUTATE_TIMEOUT)
            .await?;
        Ok(out
            .lines()
            .filter_map(|line| {
                let mut parts = line.splitn(3, '\t');
                let additions = parts.next()?;
                let deletions = parts.next()?;
                let path = parts.next()?;
                Some(FileDiff {
                    path: path.to_string(),
                    additions: additions.parse().ok(),
                    deletions: deletions.parse().ok(),
                })
            })
            .collect())
    }

    pub async fn merge(&self, branch: &str) -> OrchestratorResult<()> {
        self.run("merge", &["merge", branch, "--no-edit"], MUTATE_TIMEOUT)
            .await?;
        Ok(())
    }

    /// Abort any merge in progress; quietly does nothing when there is none.
    pub async fn merge_abort(&self) {
        let _ = self
            .run_raw("merge --abort", &["merge", "--abort"], MUTATE_TIMEOUT)
            .await;
    }

    pub async fn status_porcelain(&self) -> OrchestratorResult<String> {
        self.run("status", &["status", "--porcelain"], QUERY_TIMEOUT)
            .await
    }

    /// Paths currently in a conflicted state.
    pub async fn conflicting_paths(&self) -> OrchestratorResult<Vec<String>> {
        let out = self.status_porcelain().await?;
        Ok(out
            .lines()
            .filter_map(|line| {
                if line.len() < 4 {
                    return None;
                }
                let xy = &line[..2];
                let conflicted = matches!(xy, "DD" | "AU" | "UD" | "UA" | "DU" | "AA" | "UU");
                conflicted.then(|| line[3..].to_string())
            })
            .collect())
    }

    /// Whether a conflicted path is a submodule (gitlink mode 160000 in any
    /// index stage).
    pub async fn is_submodule(&self, path: &str) -> OrchestratorResult<bool> {
        let out = self
            .run("ls-files", &["ls-files", "-s", "--", path], QUERY_TIMEOUT)
            .await?;
        Ok(out.lines().any(|l| l.starts_with("160000 ")))
    }

    pub async fn checkout_theirs(&self, path: &str) -> OrchestratorResult<()> {
        self.run(
            "checkout --theirs",
            &["checkout", "--theirs", "--", path],
            MUTATE_TIMEOUT,
        )
        .await?;
        Ok(())
    }

    pub async fn checkout_ours(&self, path: &str) -> OrchestratorResult<()> {
        self.run(
            "checkout --ours",
            &["checkout", "--ours", "--", path],
            MUTATE_TIMEOUT,
        )
        .await?;
        Ok(())
    }

    pub async fn add(&self, path: &str) -> OrchestratorResult<()> {
        self.run("add", &["add", "--", path], MUTATE_TIMEOUT).await?;
        Ok(())
    }

    /// Complete an in-progress merge with the prepared merge message.
    pub async fn commit_merge(&self) -> OrchestratorResult<()> {
        self.run("commit", &["commit", "--no-edit"], MUTATE_TIMEOUT)
            .await?;
        Ok(())
    }

    /// Stash tracked modifications. Untracked files are deliberately left
    /// in place: the merge never touches them, and popping them back over a
    /// merge result would conflict.
    pub async fn stash_push(&self, message: &str) -> OrchestratorResult<()> {
        self.run(
            "stash push",
            &["stash", "push", "-m", message],
            MUTATE_TIMEOUT,
        )
        .await?;
        Ok(())
    }

    pub async fn stash_pop(&self) -> OrchestratorResult<()> {
        self.run("stash pop", &["stash", "pop"], MUTATE_TIMEOUT)
            .await?;
        Ok(())
    }

    pub async fn stash_drop(&self) {
        let _ = self
            .run_raw("stash drop", &["stash", "drop"], MUTATE_TIMEOUT)
            .await;
    }

    /// Force-remove a worktree. Returns `false` when there was nothing to
    /// remove.
    pub async fn worktree_remove_force(&self, path: &Path) -> OrchestratorResult<bool> {
        if !path.exists() {
            // Clean up any stale registration left behind
            let _ = self
                .run_raw("worktree prune", &["worktree", "prune"], QUERY_TIMEOUT)
                .await;
            return Ok(false);
        }
        let path_str = path.to_string_lossy();
        let out = self
            .run_raw(
                "worktree remove",
                &["worktree", "remove", "--force", path_str.as_ref()],
                WORKTREE_TIMEOUT,
            )
            .await?;
        if out.success {
            return Ok(true);
        }
        if out.stderr.contains("is not a working tree") {
            return Ok(false);
        }
        Err(OrchestratorError::Git {
            op: "worktree remove".to_string(),
            message: out.stderr.trim().to_string(),
        })
    }

    /// Force-delete a branch. Returns `false` when it did not exist.
    pub async fn branch_delete_force(&self, name: &str) -> OrchestratorResult<bool> {
        let out = self
            .run_raw("branch -D", &["branch", "-D", name], QUERY_TIMEOUT)
            .await?;
        if out.success {
            return Ok(true);
        }
        if out.stderr.contains("not found") {
            return Ok(false);
        }
        Err(OrchestratorError::Git {
            op: "branch -D".to_string(),
            message: out.stderr.trim().to_string(),
        })
    }

    /// Whether any tracked file lives under `dir`.
    pub async fn has_tracked_files_under(&self, dir: &Path) -> OrchestratorResult<bool> {
        let dir_str = dir.to_string_lossy();
        let out = self
            .run("ls-files", &["ls-files", "--", dir_str.as_ref()], QUERY_TIMEOUT)
            .await?;
        Ok(!out.trim().is_empty())
    }

    /// Make sure `pattern` is listed in `.git/info/exclude` so the path
    /// never shows up as untracked.
    pub async fn ensure_excluded(&self, pattern: &str) -> OrchestratorResult<()> {
        let git_dir = self.repo.join(".git");
        if !git_dir.is_dir() {
            // Worktree or bare checkout; exclusion only applies to the main
            // repository layout.
            return Ok(());
        }
        let exclude = git_dir.join("info").join("exclude");
        let existing = match tokio::fs::read_to_string(&exclude).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        if existing.lines().any(|l| l.trim() == pattern) {
            return Ok(());
        }
        if let Some(parent) = exclude.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut updated = existing;
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str(pattern);
        updated.push('\n');
        tokio::fs::write(&exclude, updated).await?;
        Ok(())
    }
}

/// Validates a git branch name to prevent command injection.
///
/// Rejects names that could be interpreted as git flags or otherwise subvert
/// git command execution. Follows `git check-ref-format` rules.
pub fn validate_branch_name(name: &str) -> OrchestratorResult<()> {
    let invalid = |reason: &str| OrchestratorError::InvalidBranchName {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    if name.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if name.starts_with('-') {
        return Err(invalid("must not start with '-'"));
    }
    if name.contains("..") {
        return Err(invalid("must not contain '..'"));
    }
    for ch in name.chars() {
        if ch.is_ascii_control() || matches!(ch, ' ' | '~' | '^' | ':' | '?' | '*' | '[' | '\\') {
            return Err(invalid("contains a disallowed character"));
        }
    }
    if name.ends_with(".lock") {
        return Err(invalid("must not end with '.lock'"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_branch_name_rejects_flag_injection() {
        assert!(validate_branch_name("-Xours").is_err());
        assert!(validate_branch_name("--strategy=recursive").is_err());
        assert!(validate_branch_name("--allow-unrelated-histories").is_err());
    }

    #[test]
    fn test_validate_branch_name_rejects_bad_refs() {
        assert!(validate_branch_name("").is_err());
        assert!(validate_branch_name("main..evil").is_err());
        assert!(validate_branch_name("branch name").is_err());
        assert!(validate_branch_name("branch~1").is_err());
        assert!(validate_branch_name("feature.lock").is_err());
    }

    #[test]
    fn test_validate_branch_name_accepts_valid_names() {
        assert!(validate_branch_name("main").is_ok());
        assert!(validate_branch_name("auto-claude/fix-login-flow").is_ok());
        assert!(validate_branch_name("release/1.0.0").is_ok());
    }
}
