//! Task CLI commands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use console::style;

use crate::cli::output::{output, truncate, CommandOutput};
use crate::domain::models::plan::PlanFile;
use crate::infrastructure::config::ConfigLoader;
use crate::services::event_bus::{EventBus, EventBusConfig, TaskEvent, TaskEventPayload};
use crate::services::task_registry::{StartOptions, TaskRegistry};

#[derive(Args, Debug)]
pub struct TaskArgs {
    #[command(subcommand)]
    pub command: TaskCommands,
}

#[derive(Subcommand, Debug)]
pub enum TaskCommands {
    /// Start the worker for a spec and stream its events until it exits
    Run {
        /// Spec id (also the worktree branch suffix)
        spec_id: String,
        /// Project directory
        #[arg(short, long, default_value = ".")]
        project: PathBuf,
        /// Pass --force to the worker
        #[arg(long)]
        force: bool,
    },
    /// Show a spec's status as recorded on disk
    Status {
        /// Spec id
        spec_id: String,
        /// Project directory
        #[arg(short, long, default_value = ".")]
        project: PathBuf,
    },
}

pub async fn execute(args: TaskArgs, json: bool) -> Result<()> {
    match args.command {
        TaskCommands::Run {
            spec_id,
            project,
            force,
        } => run(&spec_id, &project, force, json).await,
        TaskCommands::Status { spec_id, project } => status(&spec_id, &project, json).await,
    }
}

async fn run(spec_id: &str, project: &PathBuf, force: bool, json: bool) -> Result<()> {
    let config = ConfigLoader::load()?;
    let project = tokio::fs::canonicalize(project)
        .await
        .with_context(|| format!("project directory {} not found", project.display()))?;

    let events = Arc::new(EventBus::new(EventBusConfig {
        channel_capacity: config.events.channel_capacity,
    }));
    let registry = TaskRegistry::new(&config, events.clone());
    let mut rx = events.subscribe();

    registry
        .start(spec_id, &project, StartOptions { force })
        .await
        .context("failed to start task")?;

    let mut exited = false;
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    render_event(&event, json);
                    match event.payload {
                        TaskEventPayload::Exit { .. } => exited = true,
                        // The exit-derived status change is the last event of
                        // a run.
                        TaskEventPayload::StatusChange { .. } if exited => break,
                        _ => {}
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    if !json {
                        eprintln!("{} skipped {skipped} events", style("warning:").yellow());
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                registry.stop(spec_id).await?;
                if !json {
                    println!("{} task stopped", style("interrupted:").yellow().bold());
                }
                break;
            }
        }
    }
    Ok(())
}

fn render_event(event: &TaskEvent, json: bool) {
    if json {
        println!("{}", serde_json::to_string(event).unwrap_or_default());
        return;
    }
    let ts = style(event.timestamp.format("%H:%M:%S").to_string()).dim();
    match &event.payload {
        TaskEventPayload::Log { line } => println!("{ts} {line}"),
        TaskEventPayload::ExecutionProgress { phase, status } => {
            println!("{ts} {} {phase}: {status}", style("phase").cyan());
        }
        TaskEventPayload::Exit { code } => {
            let rendered = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
            println!("{ts} {} exit code {rendered}", style("exit").magenta());
        }
        TaskEventPayload::StatusChange { status } => {
            println!("{ts} {} {status}", style("status").green().bold());
        }
        TaskEventPayload::LogsChanged { logs } => {
            println!(
                "{ts} {} planning={:?} coding={:?} validation={:?}",
                style("logs").blue(),
                logs.phases.planning.status,
                logs.phases.coding.status,
                logs.phases.validation.status,
            );
        }
    }
}

#[derive(Debug, serde::Serialize)]
struct ChunkOutput {
    id: String,
    description: String,
    status: String,
}

#[derive(Debug, serde::Serialize)]
struct TaskStatusOutput {
    spec_id: String,
    status: String,
    review_reason: Option<String>,
    parent_branch: Option<String>,
    merged_at: Option<String>,
    chunks: Vec<ChunkOutput>,
}

impl CommandOutput for TaskStatusOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Spec: {}", self.spec_id),
            match &self.review_reason {
                Some(reason) => format!("Status: {} ({reason})", self.status),
                None => format!("Status: {}", self.status),
            },
        ];
        if let Some(ref branch) = self.parent_branch {
            lines.push(format!("Parent branch: {branch}"));
        }
        if let Some(ref merged) = self.merged_at {
            lines.push(format!("Merged at: {merged}"));
        }
        if !self.chunks.is_empty() {
            let mut table = comfy_table::Table::new();
            table.set_header(vec!["CHUNK", "STATUS", "DESCRIPTION"]);
            for chunk in &self.chunks {
                table.add_row(vec![
                    chunk.id.clone(),
                    chunk.status.clone(),
                    truncate(&chunk.description, 60),
                ]);
            }
            lines.push(table.to_string());
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

async fn status(spec_id: &str, project: &PathBuf, json: bool) -> Result<()> {
    let config = ConfigLoader::load()?;
    let spec_dir = config.paths.spec_dir(project, spec_id);
    let plan = PlanFile::load(&spec_dir)
        .await
        .with_context(|| format!("no plan artifact for spec '{spec_id}'"))?;

    // CLI invocations have no in-process registry, so this is the pure
    // on-disk projection.
    let (status, reason) = plan.derived_status(false);
    let out = TaskStatusOutput {
        spec_id: spec_id.to_string(),
        status: status.to_string(),
        review_reason: reason.map(|r| r.to_string()),
        parent_branch: plan.parent_branch.clone(),
        merged_at: plan.merged_at.map(|t| t.to_rfc3339()),
        chunks: plan
            .chunks()
            .map(|c| ChunkOutput {
                id: c.id.clone(),
                description: c.description.clone(),
                status: c.status.as_str().to_string(),
            })
            .collect(),
    };
    output(&out, json);
    Ok(())
}
