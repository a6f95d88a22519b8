//! Service layer: the orchestration components.

pub mod event_bus;
pub mod git;
pub mod merge_engine;
pub mod process_supervisor;
pub mod status_watcher;
pub mod task_registry;

pub use event_bus::{EventBus, EventBusConfig, TaskEvent, TaskEventPayload};
pub use git::{FileDiff, GitCli};
pub use merge_engine::{DiscardOutcome, MergeEngine, MergeOutcome, MergePreview};
pub use process_supervisor::{ProcessSupervisor, WorkerCommand};
pub use status_watcher::StatusWatcher;
pub use task_registry::{StartOptions, TaskRegistry};
