//! Command-line interface.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "autoclaude",
    version,
    about = "Task execution and worktree merge orchestration for autonomous coding agents"
)]
pub struct Cli {
    /// Emit machine-readable JSON instead of human output
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run and inspect tasks
    Task(commands::task::TaskArgs),
    /// Merge, discard, and inspect task worktrees
    Worktree(commands::worktree::WorktreeArgs),
}

/// Print a top-level error and exit nonzero.
pub fn handle_error(err: anyhow::Error, json: bool) {
    if json {
        let payload = serde_json::json!({ "error": format!("{err:#}") });
        eprintln!("{payload}");
    } else {
        eprintln!("{} {err:#}", console::style("error:").red().bold());
    }
    std::process::exit(1);
}
