use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Main configuration structure for the orchestration engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Worker process invocation
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Project-relative artifact layout
    #[serde(default)]
    pub paths: PathsConfig,

    /// Artifact polling configuration
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Event broadcast configuration
    #[serde(default)]
    pub events: EventsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How the external worker process is launched.
///
/// The worker is invoked as
/// `<runtime> <entrypoint> --spec <id> --auto-continue [--force]` in the
/// project directory, with unbuffered output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WorkerConfig {
    /// Runtime executable (e.g. `python3`)
    #[serde(default = "default_runtime")]
    pub runtime: String,

    /// Entrypoint passed as the first argument
    #[serde(default = "default_entrypoint")]
    pub entrypoint: String,

    /// Extra arguments appended after the standard ones
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_runtime() -> String {
    "python3".to_string()
}

fn default_entrypoint() -> String {
    "run.py".to_string()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            runtime: default_runtime(),
            entrypoint: default_entrypoint(),
            extra_args: vec![],
        }
    }
}

/// Artifact layout rooted at `<project>/<data_dir>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PathsConfig {
    /// Per-project data directory holding specs and worktrees
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    ".autoclaude".to_string()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl PathsConfig {
    /// Branch a task's worktree is checked out on.
    pub fn branch_name(&self, spec_id: &str) -> String {
        format!("auto-claude/{spec_id}")
    }

    /// Primary spec directory for a task.
    pub fn spec_dir(&self, project: &Path, spec_id: &str) -> PathBuf {
        project.join(&self.data_dir).join("specs").join(spec_id)
    }

    /// Storage area for all task worktrees, relative to the project root.
    pub fn worktrees_root(&self, project: &Path) -> PathBuf {
        project.join(&self.data_dir).join("worktrees")
    }

    /// Relative worktrees path, used for version-control exclusion.
    pub fn worktrees_exclude_pattern(&self) -> String {
        format!("{}/worktrees/", self.data_dir)
    }

    /// Isolated worktree directory for a task.
    pub fn worktree_dir(&self, project: &Path, spec_id: &str) -> PathBuf {
        self.worktrees_root(project).join(spec_id)
    }

    /// Mirror of the spec directory inside the task's worktree.
    pub fn worktree_spec_dir(&self, project: &Path, spec_id: &str) -> PathBuf {
        self.worktree_dir(project, spec_id)
            .join(&self.data_dir)
            .join("specs")
            .join(spec_id)
    }
}

/// Artifact polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WatcherConfig {
    /// Poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

const fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Event broadcast configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EventsConfig {
    /// Broadcast channel capacity
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

const fn default_channel_capacity() -> usize {
    1024
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let paths = PathsConfig::default();
        let project = Path::new("/work/proj");

        assert_eq!(paths.branch_name("t1"), "auto-claude/t1");
        assert_eq!(
            paths.spec_dir(project, "t1"),
            PathBuf::from("/work/proj/.autoclaude/specs/t1")
        );
        assert_eq!(
            paths.worktree_spec_dir(project, "t1"),
            PathBuf::from("/work/proj/.autoclaude/worktrees/t1/.autoclaude/specs/t1")
        );
        assert_eq!(paths.worktrees_exclude_pattern(), ".autoclaude/worktrees/");
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.worker.runtime, "python3");
        assert_eq!(config.watcher.poll_interval_ms, 1000);
        assert_eq!(config.events.channel_capacity, 1024);
        assert_eq!(config.logging.level, "info");
    }
}
