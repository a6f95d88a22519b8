//! Worktree CLI commands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use crate::cli::output::{output, CommandOutput};
use crate::infrastructure::config::ConfigLoader;
use crate::services::event_bus::EventBus;
use crate::services::git::FileDiff;
use crate::services::merge_engine::MergeEngine;

#[derive(Args, Debug)]
pub struct WorktreeArgs {
    #[command(subcommand)]
    pub command: WorktreeCommands,
}

#[derive(Subcommand, Debug)]
pub enum WorktreeCommands {
    /// Merge a task's worktree branch back into the base branch
    Merge {
        /// Spec id
        spec_id: String,
        /// Project directory
        #[arg(short, long, default_value = ".")]
        project: PathBuf,
        /// Merge into this branch instead of the recorded parent branch
        #[arg(short, long)]
        target_branch: Option<String>,
    },
    /// Remove a task's worktree and force-delete its branch
    Discard {
        /// Spec id
        spec_id: String,
        /// Project directory
        #[arg(short, long, default_value = ".")]
        project: PathBuf,
    },
    /// Show what a merge would integrate, without touching anything
    Preview {
        /// Spec id
        spec_id: String,
        /// Project directory
        #[arg(short, long, default_value = ".")]
        project: PathBuf,
    },
    /// Per-file change stats between the base branch and the task branch
    Diff {
        /// Spec id
        spec_id: String,
        /// Project directory
        #[arg(short, long, default_value = ".")]
        project: PathBuf,
    },
}

pub async fn execute(args: WorktreeArgs, json: bool) -> Result<()> {
    let config = ConfigLoader::load()?;
    let engine = MergeEngine::new(config.paths.clone(), Arc::new(EventBus::default()));

    match args.command {
        WorktreeCommands::Merge {
            spec_id,
            project,
            target_branch,
        } => {
            let project = canonicalize(&project).await?;
            let outcome = engine
                .merge(&spec_id, &project, target_branch.as_deref())
                .await
                .context("merge failed")?;
            output(
                &MergeCmdOutput {
                    message: outcome.message,
                    merge_commit: outcome.merge_commit,
                },
                json,
            );
        }
        WorktreeCommands::Discard { spec_id, project } => {
            let project = canonicalize(&project).await?;
            let outcome = engine
                .discard(&spec_id, &project)
                .await
                .context("discard failed")?;
            output(
                &DiscardCmdOutput {
                    removed_worktree: outcome.removed_worktree,
                    deleted_branch: outcome.deleted_branch,
                },
                json,
            );
        }
        WorktreeCommands::Preview { spec_id, project } => {
            let project = canonicalize(&project).await?;
            let preview = engine
                .merge_preview(&spec_id, &project)
                .await
                .context("preview failed")?;
            output(
                &PreviewCmdOutput {
                    branch: preview.branch,
                    base_branch: preview.base_branch,
                    commit_count: preview.commit_count,
                    changed_file_count: preview.changed_file_count,
                },
                json,
            );
        }
        WorktreeCommands::Diff { spec_id, project } => {
            let project = canonicalize(&project).await?;
            let files = engine
                .worktree_diff(&spec_id, &project)
                .await
                .context("diff failed")?;
            output(&DiffCmdOutput { files }, json);
        }
    }
    Ok(())
}

async fn canonicalize(project: &PathBuf) -> Result<PathBuf> {
    tokio::fs::canonicalize(project)
        .await
        .with_context(|| format!("project directory {} not found", project.display()))
}

#[derive(Debug, serde::Serialize)]
struct MergeCmdOutput {
    message: String,
    merge_commit: Option<String>,
}

impl CommandOutput for MergeCmdOutput {
    fn to_human(&self) -> String {
        match &self.merge_commit {
            Some(commit) => format!("{} ({commit})", self.message),
            None => self.message.clone(),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, serde::Serialize)]
struct DiscardCmdOutput {
    removed_worktree: bool,
    deleted_branch: bool,
}

impl CommandOutput for DiscardCmdOutput {
    fn to_human(&self) -> String {
        match (self.removed_worktree, self.deleted_branch) {
            (false, false) => "Nothing to discard.".to_string(),
            (worktree, branch) => format!(
                "Discarded{}{}.",
                if worktree { " worktree" } else { "" },
                if branch { " branch" } else { "" }
            ),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, serde::Serialize)]
struct PreviewCmdOutput {
    branch: String,
    base_branch: String,
    commit_count: usize,
    changed_file_count: usize,
}

impl CommandOutput for PreviewCmdOutput {
    fn to_human(&self) -> String {
        format!(
            "{} -> {}: {} commit(s), {} changed file(s)",
            self.branch, self.base_branch, self.commit_count, self.changed_file_count
        )
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, serde::Serialize)]
struct DiffCmdOutput {
    files: Vec<FileDiff>,
}

impl CommandOutput for DiffCmdOutput {
    fn to_human(&self) -> String {
        if self.files.is_empty() {
            return "No changes.".to_string();
        }
        let mut table = comfy_table::Table::new();
        table.set_header(vec!["FILE", "+", "-"]);
        for file in &self.files {
            table.add_row(vec![
                file.path.clone(),
                file.additions.map_or_else(|| "-".to_string(), |n| n.to_string()),
                file.deletions.map_or_else(|| "-".to_string(), |n| n.to_string()),
            ]);
        }
        table.to_string()
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}
