//! Autoclaude - Task Execution & Worktree Merge Orchestration
//!
//! Autoclaude supervises long-running external worker processes, reconciles
//! their on-disk status artifacts with in-memory state, streams progress to
//! subscribed observers, and merges each task's isolated git worktree back
//! into the project's base branch with automated conflict handling.
//!
//! # Architecture
//!
//! This crate follows a layered architecture:
//!
//! - **Domain Layer** (`domain`): Pure models and the error taxonomy
//! - **Service Layer** (`services`): Orchestration components — event bus,
//!   process supervisor, status watcher, task registry, merge engine
//! - **Infrastructure Layer** (`infrastructure`): Configuration loading
//! - **CLI Layer** (`cli`): Command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use autoclaude::services::{EventBus, StartOptions, TaskRegistry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = autoclaude::infrastructure::config::ConfigLoader::load()?;
//!     let events = Arc::new(EventBus::default());
//!     let registry = TaskRegistry::new(&config, events.clone());
//!     registry.start("fix-login", std::path::Path::new("."), StartOptions::default()).await?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{OrchestratorError, OrchestratorResult};
pub use domain::models::{
    AgentLogs, Chunk, ChunkStatus, Config, PlanFile, QaSignoff, QaStatus, ReviewReason, TaskStatus,
};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    EventBus, MergeEngine, MergeOutcome, MergePreview, StartOptions, StatusWatcher, TaskEvent,
    TaskEventPayload, TaskRegistry,
};
