//! Status reconciler.
//!
//! Polls a task's on-disk artifacts (structured logs and the plan file) in
//! both the primary spec directory and its worktree mirror, and republishes
//! externally-observed changes as events. This is how a worker that only
//! writes files — never speaking the broadcast protocol — still becomes
//! visible to observers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::domain::models::agent_logs::AgentLogs;
use crate::domain::models::plan::PlanFile;
use crate::domain::models::task::TaskStatus;
use crate::services::event_bus::{EventBus, TaskEventPayload};

struct WatcherEntry {
    handle: JoinHandle<()>,
}

/// Recurring artifact watcher, one entry per task id.
pub struct StatusWatcher {
    events: Arc<EventBus>,
    poll_interval: Duration,
    entries: Arc<RwLock<HashMap<String, WatcherEntry>>>,
}

impl StatusWatcher {
    pub fn new(events: Arc<EventBus>, poll_interval: Duration) -> Self {
        Self {
            events,
            poll_interval,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Begin watching a task's artifacts.
    ///
    /// Calling this again for the same id replaces the previous entry: the
    /// old timer is canceled, never accumulated.
    pub async fn watch(&self, task_id: &str, spec_dir: PathBuf, worktree_spec_dir: PathBuf) {
        let events = self.events.clone();
        let interval = self.poll_interval;
        let loop_task_id = task_id.to_string();
        let handle = tokio::spawn(async move {
            poll_loop(loop_task_id, spec_dir, worktree_spec_dir, events, interval).await;
        });

        let mut entries = self.entries.write().await;
        if let Some(old) = entries.insert(task_id.to_string(), WatcherEntry { handle }) {
            old.handle.abort();
        }
    }

    /// Stop watching; idempotent. Returns whether an entry was present.
    pub async fn unwatch(&self, task_id: &str) -> bool {
        let mut entries = self.entries.write().await;
        match entries.remove(task_id) {
            Some(entry) => {
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    pub async fn is_watching(&self, task_id: &str) -> bool {
        self.entries.read().await.contains_key(task_id)
    }
}

#[derive(Default)]
struct PollState {
    primed: bool,
    primary_logs: Option<Vec<u8>>,
    worktree_logs: Option<Vec<u8>>,
    last_status: Option<TaskStatus>,
}

async fn poll_loop(
    task_id: String,
    spec_dir: PathBuf,
    worktree_spec_dir: PathBuf,
    events: Arc<EventBus>,
    interval: Duration,
) {
    let mut state = PollState::default();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        poll_once(&task_id, &spec_dir, &worktree_spec_dir, &mut state, &events).await;
    }
}

async fn poll_once(
    task_id: &str,
    spec_dir: &Path,
    worktree_spec_dir: &Path,
    state: &mut PollState,
    events: &EventBus,
) {
    let primary_bytes = read_optional(&AgentLogs::path_in(spec_dir)).await;
    let worktree_bytes = read_optional(&AgentLogs::path_in(worktree_spec_dir)).await;

    let logs_changed =
        primary_bytes != state.primary_logs || worktree_bytes != state.worktree_logs;

    if logs_changed && state.primed {
        let primary = parse_optional_logs(task_id, primary_bytes.as_deref());
        let worktree = parse_optional_logs(task_id, worktree_bytes.as_deref());
        if let Some(logs) = AgentLogs::merged(primary, worktree) {
            events.publish(task_id, TaskEventPayload::LogsChanged { logs });
        }
    }
    state.primary_logs = primary_bytes;
    state.worktree_logs = worktree_bytes;

    // Status changes made directly on disk by the worker, independently of
    // the log comparison. The worktree copy wins while it exists.
    let status = match read_status(worktree_spec_dir).await {
        Some(status) => Some(status),
        None => read_status(spec_dir).await,
    };
    if let Some(status) = status {
        if state.primed && state.last_status.is_some_and(|last| last != status) {
            events.publish(task_id, TaskEventPayload::StatusChange { status });
        }
        state.last_status = Some(status);
    }

    state.primed = true;
}

async fn read_optional(path: &Path) -> Option<Vec<u8>> {
    tokio::fs::read(path).await.ok()
}

/// Parse one copy of the structured log artifact.
///
/// The outcome is explicit so the swallow path is testable; the caller
/// treats `Err` as "no data from this copy".
fn parse_logs(bytes: &[u8]) -> Result<AgentLogs, serde_json::Error> {
    serde_json::from_slice(bytes)
}

fn parse_optional_logs(task_id: &str, bytes: Option<&[u8]>) -> Option<AgentLogs> {
    match bytes.map(parse_logs) {
        Some(Ok(logs)) => Some(logs),
        Some(Err(e)) => {
            debug!(task_id, error = %e, "swallowing unparseable log artifact");
            None
        }
        None => None,
    }
}

async fn read_status(spec_dir: &Path) -> Option<TaskStatus> {
    let bytes = read_optional(&PlanFile::path_in(spec_dir)).await?;
    match serde_json::from_slice::<PlanFile>(&bytes) {
        Ok(plan) => Some(plan.status),
        Err(e) => {
            debug!(spec_dir = %spec_dir.display(), error = %e, "swallowing unparseable plan");
            None
        }
    }
}
