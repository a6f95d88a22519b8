//! Event bus for fanning task lifecycle events out to observers.
//!
//! Broadcast-based with sequence numbering. Delivery is at-most-once:
//! events reach whoever is subscribed at publish time, with no buffering or
//! replay for late subscribers.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::models::agent_logs::AgentLogs;
use crate::domain::models::task::TaskStatus;

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonically increasing sequence number assigned at publish time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNumber(pub u64);

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Progress state of a worker phase, parsed from stream markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseProgress {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for PhaseProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Payload of a task event, one variant per broadcast topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TaskEventPayload {
    /// Verbatim stdout/stderr line from the worker
    Log { line: String },
    /// A phase marker was recognized in the worker's stream
    ExecutionProgress { phase: String, status: PhaseProgress },
    /// The worker process exited
    Exit { code: Option<i32> },
    /// The task's effective status changed
    StatusChange { status: TaskStatus },
    /// The structured log artifact changed on disk
    LogsChanged { logs: AgentLogs },
}

/// Event envelope delivered to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub id: EventId,
    pub sequence: SequenceNumber,
    pub timestamp: DateTime<Utc>,
    pub task_id: String,
    #[serde(flatten)]
    pub payload: TaskEventPayload,
}

/// Configuration for the event bus.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Channel capacity for the broadcast channel.
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

/// Central event bus for broadcasting task events to multiple consumers.
pub struct EventBus {
    sender: broadcast::Sender<TaskEvent>,
    sequence: AtomicU64,
}

impl EventBus {
    /// Create a new event bus with the given configuration.
    pub fn new(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity);
        Self {
            sender,
            sequence: AtomicU64::new(0),
        }
    }

    /// Publish an event for a task.
    ///
    /// Send errors are ignored: no subscribers is a normal condition.
    pub fn publish(&self, task_id: &str, payload: TaskEventPayload) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let event = TaskEvent {
            id: EventId::new(),
            sequence: SequenceNumber(seq),
            timestamp: Utc::now(),
            task_id: task_id.to_string(),
            payload,
        };
        let _ = self.sender.send(event);
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }

    /// Get the current sequence number.
    pub fn current_sequence(&self) -> SequenceNumber {
        SequenceNumber(self.sequence.load(Ordering::SeqCst))
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sequence_assignment() {
        let bus = EventBus::default();
        assert_eq!(bus.current_sequence().0, 0);

        let mut rx = bus.subscribe();

        bus.publish(
            "t1",
            TaskEventPayload::StatusChange {
                status: TaskStatus::InProgress,
            },
        );
        let event1 = rx.recv().await.unwrap();
        assert_eq!(event1.sequence.0, 0);
        assert_eq!(event1.task_id, "t1");

        bus.publish("t1", TaskEventPayload::Exit { code: Some(0) });
        let event2 = rx.recv().await.unwrap();
        assert_eq!(event2.sequence.0, 1);

        assert_eq!(bus.current_sequence().0, 2);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::default();
        bus.publish(
            "t1",
            TaskEventPayload::Log {
                line: "hello".to_string(),
            },
        );
        assert_eq!(bus.subscriber_count(), 0);
        // Sequence still advances
        assert_eq!(bus.current_sequence().0, 1);
    }

    #[test]
    fn test_event_serialization() {
        let event = TaskEvent {
            id: EventId::new(),
            sequence: SequenceNumber(7),
            timestamp: Utc::now(),
            task_id: "t1".to_string(),
            payload: TaskEventPayload::ExecutionProgress {
                phase: "coding".to_string(),
                status: PhaseProgress::Running,
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"execution_progress\""));
        assert!(json.contains("\"phase\":\"coding\""));
    }
}
