//! Worker process supervisor.
//!
//! Owns the lifecycle of one external worker process per task: spawn with
//! piped, unbuffered output, publish every output line as an event, detect
//! phase markers, and reconcile the plan artifact when the process exits.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::models::plan::PlanFile;
use crate::services::event_bus::{EventBus, PhaseProgress, TaskEventPayload};
use crate::services::status_watcher::StatusWatcher;

/// Marker the worker prints on stdout when entering a phase, followed by a
/// JSON payload `{"phase": ...}`.
pub const PHASE_START_MARKER: &str = "[phase-start]";
/// Marker printed when leaving a phase, payload `{"phase": ..., "success": ...}`.
pub const PHASE_END_MARKER: &str = "[phase-end]";

/// Grace period between SIGTERM and SIGKILL on manual stop.
const KILL_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct PhaseMarkerPayload {
    phase: String,
    #[serde(default)]
    success: Option<bool>,
}

/// Resolved invocation of the external worker.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

struct TaskHandle {
    generation: u64,
    pid: Option<u32>,
    #[allow(dead_code)]
    workdir: PathBuf,
}

/// Supervises at most one worker process per task id.
pub struct ProcessSupervisor {
    events: Arc<EventBus>,
    watcher: Arc<StatusWatcher>,
    children: Arc<RwLock<HashMap<String, TaskHandle>>>,
    generation: AtomicU64,
}

impl ProcessSupervisor {
    pub fn new(events: Arc<EventBus>, watcher: Arc<StatusWatcher>) -> Self {
        Self {
            events,
            watcher,
            children: Arc::new(RwLock::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Launch the worker for a task.
    ///
    /// The handle is registered before any stream handler is attached, so a
    /// status query immediately after spawn is consistent. A missing
    /// executable is terminal for this start attempt; it is reported, never
    /// retried.
    pub async fn spawn(
        &self,
        task_id: &str,
        workdir: &Path,
        spec_dir: &Path,
        command: WorkerCommand,
    ) -> OrchestratorResult<()> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(workdir)
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &command.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| OrchestratorError::Spawn {
            program: command.program.clone(),
            source: e,
        })?;

        let pid = child.id();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst);

        {
            let mut children = self.children.write().await;
            children.insert(
                task_id.to_string(),
                TaskHandle {
                    generation,
                    pid,
                    workdir: workdir.to_path_buf(),
                },
            );
        }

        info!(task_id, pid, program = %command.program, "worker spawned");

        let stdout = child.stdout.take().ok_or_else(|| OrchestratorError::Spawn {
            program: command.program.clone(),
            source: std::io::Error::other("failed to capture stdout"),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| OrchestratorError::Spawn {
            program: command.program.clone(),
            source: std::io::Error::other("failed to capture stderr"),
        })?;

        let events = self.events.clone();
        let stderr_task_id = task_id.to_string();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                events.publish(&stderr_task_id, TaskEventPayload::Log { line });
            }
        });

        let events = self.events.clone();
        let watcher = self.watcher.clone();
        let children = self.children.clone();
        let task_id = task_id.to_string();
        let spec_dir = spec_dir.to_path_buf();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match parse_phase_marker(&line) {
                    Some(Ok((phase, status))) => {
                        events.publish(
                            &task_id,
                            TaskEventPayload::ExecutionProgress { phase, status },
                        );
                    }
                    Some(Err(e)) => {
                        debug!(task_id, error = %e, "ignoring malformed phase marker");
                    }
                    None => {}
                }
                events.publish(&task_id, TaskEventPayload::Log { line });
            }

            let _ = stderr_task.await;

            let code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!(task_id, error = %e, "failed to reap worker");
                    None
                }
            };

            // A stop or restart already unregistered this run; its exit is
            // no longer this task's exit.
            let current = {
                let mut children = children.write().await;
                let matches = children
                    .get(&task_id)
                    .is_some_and(|handle| handle.generation == generation);
                if matches {
                    children.remove(&task_id);
                }
                matches
            };
            if !current {
                debug!(task_id, code, "superseded worker exited");
                return;
            }

            let _ = watcher.unwatch(&task_id).await;

            let status = match PlanFile::load_or_default(&spec_dir).await {
                Ok(mut plan) => {
                    let (status, _) = plan.status_after_exit(code);
                    plan.status = status;
                    if let Err(e) = plan.save(&spec_dir).await {
                        warn!(task_id, error = %e, "failed to persist final status");
                    }
                    status
                }
                Err(e) => {
                    warn!(task_id, error = %e, "failed to read plan after exit");
                    PlanFile::default().status_after_exit(code).0
                }
            };

            info!(task_id, code, %status, "worker exited");
            events.publish(&task_id, TaskEventPayload::Exit { code });
            events.publish(&task_id, TaskEventPayload::StatusChange { status });
        });

        Ok(())
    }

    /// Terminate the worker for a task, if one is registered.
    ///
    /// The handle is removed regardless of whether the process had already
    /// exited, so a racing natural exit and manual stop cannot strand an
    /// entry. Returns whether a handle was present.
    pub async fn kill(&self, task_id: &str) -> bool {
        let handle = {
            let mut children = self.children.write().await;
            children.remove(task_id)
        };
        let Some(handle) = handle else {
            return false;
        };

        if let Some(pid) = handle.pid.and_then(|p| i32::try_from(p).ok()) {
            let pid = Pid::from_raw(pid);
            if signal::kill(pid, Signal::SIGTERM).is_ok() {
                tokio::spawn(async move {
                    tokio::time::sleep(KILL_GRACE).await;
                    if signal::kill(pid, None).is_ok() {
                        let _ = signal::kill(pid, Signal::SIGKILL);
                    }
                });
            }
        }
        info!(task_id, "worker terminated");
        true
    }

    /// Whether a handle is currently registered for this task.
    pub async fn is_running(&self, task_id: &str) -> bool {
        self.children.read().await.contains_key(task_id)
    }

    /// Number of registered handles.
    pub async fn running_count(&self) -> usize {
        self.children.read().await.len()
    }
}

/// Recognize a phase marker line.
///
/// Returns `None` for ordinary output, `Some(Err(_))` when the marker is
/// present but its JSON payload is malformed (callers log and move on), and
/// `Some(Ok(...))` for a valid marker.
fn parse_phase_marker(
    line: &str,
) -> Option<Result<(String, PhaseProgress), serde_json::Error>> {
    let trimmed = line.trim();
    if let Some(rest) = trimmed.strip_prefix(PHASE_START_MARKER) {
        Some(
            serde_json::from_str::<PhaseMarkerPayload>(rest.trim())
                .map(|p| (p.phase, PhaseProgress::Running)),
        )
    } else if let Some(rest) = trimmed.strip_prefix(PHASE_END_MARKER) {
        Some(serde_json::from_str::<PhaseMarkerPayload>(rest.trim()).map(|p| {
            let status = if p.success == Some(false) {
                PhaseProgress::Failed
            } else {
                PhaseProgress::Completed
            };
            (p.phase, status)
        }))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_phase_start_marker() {
        let parsed = parse_phase_marker(r#"[phase-start]{"phase":"coding"}"#);
        let (phase, status) = parsed.unwrap().unwrap();
        assert_eq!(phase, "coding");
        assert_eq!(status, PhaseProgress::Running);
    }

    #[test]
    fn test_parse_phase_end_marker_success() {
        let parsed = parse_phase_marker(r#"[phase-end]{"phase":"coding","success":true}"#);
        let (phase, status) = parsed.unwrap().unwrap();
        assert_eq!(phase, "coding");
        assert_eq!(status, PhaseProgress::Completed);
    }

    #[test]
    fn test_parse_phase_end_marker_failure() {
        let parsed = parse_phase_marker(r#"[phase-end]{"phase":"validation","success":false}"#);
        let (phase, status) = parsed.unwrap().unwrap();
        assert_eq!(phase, "validation");
        assert_eq!(status, PhaseProgress::Failed);
    }

    #[test]
    fn test_malformed_marker_payload_is_reported_not_fatal() {
        let parsed = parse_phase_marker("[phase-start]{not json");
        assert!(parsed.unwrap().is_err());
    }

    #[test]
    fn test_ordinary_lines_are_not_markers() {
        assert!(parse_phase_marker("building module foo").is_none());
        assert!(parse_phase_marker("").is_none());
    }
}
