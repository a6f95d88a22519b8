//! Domain models.

pub mod agent_logs;
pub mod config;
pub mod plan;
pub mod task;

pub use agent_logs::{AgentLogs, PhaseLog, PhaseLogs, PhaseStatus};
pub use config::{Config, EventsConfig, LoggingConfig, PathsConfig, WatcherConfig, WorkerConfig};
pub use plan::{Chunk, ChunkStatus, Phase, PlanFile, QaSignoff, QaStatus};
pub use task::{ReviewReason, TaskStatus};
