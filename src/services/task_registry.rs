//! Task registry.
//!
//! Authoritative in-memory index of active tasks. Composes the process
//! supervisor and the status watcher: `start` spawns the worker and begins
//! watching its artifacts, `stop` tears both down, `status` answers from
//! memory only.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::models::config::{Config, PathsConfig, WorkerConfig};
use crate::domain::models::plan::PlanFile;
use crate::domain::models::task::TaskStatus;
use crate::services::event_bus::{EventBus, TaskEventPayload};
use crate::services::git::GitCli;
use crate::services::process_supervisor::{ProcessSupervisor, WorkerCommand};
use crate::services::status_watcher::StatusWatcher;

/// Options for starting a task.
#[derive(Debug, Clone, Copy, Default)]
pub struct StartOptions {
    /// Pass `--force` to the worker
    pub force: bool,
}

/// Orchestrates task execution: one worker process and one artifact watcher
/// per task id.
pub struct TaskRegistry {
    worker: WorkerConfig,
    paths: PathsConfig,
    events: Arc<EventBus>,
    supervisor: Arc<ProcessSupervisor>,
    watcher: Arc<StatusWatcher>,
}

impl TaskRegistry {
    pub fn new(config: &Config, events: Arc<EventBus>) -> Self {
        let watcher = Arc::new(StatusWatcher::new(
            events.clone(),
            Duration::from_millis(config.watcher.poll_interval_ms),
        ));
        let supervisor = Arc::new(ProcessSupervisor::new(events.clone(), watcher.clone()));
        Self {
            worker: config.worker.clone(),
            paths: config.paths.clone(),
            events,
            supervisor,
            watcher,
        }
    }

    /// Start (or restart) the worker for a task.
    ///
    /// An already-running worker for the same id is terminated first, not an
    /// error. Observers get a `status_change → in_progress` before the
    /// process produces any output, so a start request is never silently
    /// dropped.
    #[instrument(skip(self, project), fields(project = %project.display()))]
    pub async fn start(
        &self,
        task_id: &str,
        project: &Path,
        options: StartOptions,
    ) -> OrchestratorResult<()> {
        if !project.is_dir() {
            return Err(OrchestratorError::ProjectNotFound(project.to_path_buf()));
        }
        let spec_dir = self.paths.spec_dir(project, task_id);
        if !spec_dir.is_dir() {
            return Err(OrchestratorError::TaskNotFound(task_id.to_string()));
        }

        if self.supervisor.kill(task_id).await {
            info!(task_id, "terminated previous worker before restart");
        }

        self.events.publish(
            task_id,
            TaskEventPayload::StatusChange {
                status: TaskStatus::InProgress,
            },
        );

        let mut plan = PlanFile::load_or_default(&spec_dir).await?;
        plan.status = TaskStatus::InProgress;
        if plan.parent_branch.is_none() {
            match GitCli::new(project).current_branch().await {
                Ok(Some(branch)) => {
                    plan.record_parent_branch(&branch);
                }
                Ok(None) => {}
                Err(e) => warn!(task_id, error = %e, "could not record parent branch"),
            }
        }
        plan.save(&spec_dir).await?;

        let command = self.worker_command(task_id, options.force);
        self.supervisor
            .spawn(task_id, project, &spec_dir, command)
            .await?;

        self.watcher
            .watch(
                task_id,
                spec_dir,
                self.paths.worktree_spec_dir(project, task_id),
            )
            .await;

        Ok(())
    }

    /// Stop the worker for a task.
    ///
    /// A no-op success when nothing is running: observers only hear
    /// `stopped` when a handle or watcher was actually torn down.
    #[instrument(skip(self))]
    pub async fn stop(&self, task_id: &str) -> OrchestratorResult<()> {
        let killed = self.supervisor.kill(task_id).await;
        let unwatched = self.watcher.unwatch(task_id).await;
        if killed || unwatched {
            self.events.publish(
                task_id,
                TaskEventPayload::StatusChange {
                    status: TaskStatus::Stopped,
                },
            );
        }
        Ok(())
    }

    /// Whether a worker handle is currently registered. In-memory only; no
    /// disk reads.
    pub async fn is_running(&self, task_id: &str) -> bool {
        self.supervisor.is_running(task_id).await
    }

    /// Number of live worker handles.
    pub async fn running_count(&self) -> usize {
        self.supervisor.running_count().await
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    fn worker_command(&self, task_id: &str, force: bool) -> WorkerCommand {
        let mut args = vec![
            self.worker.entrypoint.clone(),
            "--spec".to_string(),
            task_id.to_string(),
            "--auto-continue".to_string(),
        ];
        if force {
            args.push("--force".to_string());
        }
        args.extend(self.worker.extra_args.iter().cloned());

        WorkerCommand {
            program: self.worker.runtime.clone(),
            args,
            env: vec![("AUTOCLAUDE_SPEC_ID".to_string(), task_id.to_string())],
        }
    }
}
