//! Observer pattern for exploration lifecycle events, grounded on the host
//! crate's `session::events` (a `SessionObserver` trait fanned out to
//! registered listeners) generalised from session events to exploration,
//! worktree, container and insight events.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::model::{ContainerStats, ExplorationStatus, WorktreeStatus};

#[derive(Debug, Clone)]
pub enum ExplorationEvent {
    Started { exploration_id: String, at: DateTime<Utc> },
    StatusChanged { exploration_id: String, from: ExplorationStatus, to: ExplorationStatus },
    WorktreeStatusChanged { exploration_id: String, worktree_index: u32, from: WorktreeStatus, to: WorktreeStatus },
    ContainerStarted { exploration_id: String, worktree_index: u32, container_id: String },
    ContainerStopped { exploration_id: String, worktree_index: u32 },
    /// Emitted once per monitoring poll while a container is running.
    ContainerStats { exploration_id: String, worktree_index: u32, stats: ContainerStats },
    InsightPublished { exploration_id: String, worktree_id: String, title: String },
    DecisionResolved { exploration_id: String, decision_id: String, chosen_option: u32 },
    Completed { exploration_id: String, at: DateTime<Utc>, success: bool },
}

impl fmt::Display for ExplorationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExplorationEvent::Started { exploration_id, .. } => {
                write!(f, "exploration {exploration_id} started")
            }
            ExplorationEvent::StatusChanged { exploration_id, from, to } => {
                write!(f, "exploration {exploration_id}: {from:?} -> {to:?}")
            }
            ExplorationEvent::WorktreeStatusChanged { exploration_id, worktree_index, from, to } => {
                write!(f, "exploration {exploration_id} worktree {worktree_index}: {from:?} -> {to:?}")
            }
            ExplorationEvent::ContainerStarted { exploration_id, worktree_index, container_id } => {
                write!(f, "exploration {exploration_id} worktree {worktree_index} container {container_id} started")
            }
            ExplorationEvent::ContainerStopped { exploration_id, worktree_index } => {
                write!(f, "exploration {exploration_id} worktree {worktree_index} container stopped")
            }
            ExplorationEvent::ContainerStats { exploration_id, worktree_index, stats } => {
                write!(
                    f,
                    "exploration {exploration_id} worktree {worktree_index} stats: cpu={:.1}% mem={:.0}MB",
                    stats.cpu_percent, stats.memory_mb
                )
            }
            ExplorationEvent::InsightPublished { exploration_id, worktree_id, title } => {
                write!(f, "exploration {exploration_id}: insight from {worktree_id}: {title}")
            }
            ExplorationEvent::DecisionResolved { exploration_id, decision_id, chosen_option } => {
                write!(f, "exploration {exploration_id}: decision {decision_id} resolved to option {chosen_option}")
            }
            ExplorationEvent::Completed { exploration_id, success, .. } => {
                write!(f, "exploration {exploration_id} completed (success={success})")
            }
        }
    }
}

#[async_trait::async_trait]
pub trait EventObserver: Send + Sync {
    async fn on_event(&self, event: &ExplorationEvent);
}

/// Logs every event at `info` via `tracing`. Always registered by default so
/// an exploration's lifecycle is visible in structured logs even with no
/// other observers attached.
pub struct TracingObserver;

#[async_trait::async_trait]
impl EventObserver for TracingObserver {
    async fn on_event(&self, event: &ExplorationEvent) {
        tracing::info!(%event, "exploration event");
    }
}

#[derive(Default)]
pub struct EventBus {
    observers: RwLock<Vec<Arc<dyn EventObserver>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, observer: Arc<dyn EventObserver>) {
        self.observers.write().await.push(observer);
    }

    pub async fn emit(&self, event: ExplorationEvent) {
        let observers = self.observers.read().await;
        for observer in observers.iter() {
            observer.on_event(&event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    struct RecordingObserver {
        events: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl EventObserver for RecordingObserver {
        async fn on_event(&self, event: &ExplorationEvent) {
            self.events.lock().await.push(event.to_string());
        }
    }

    #[tokio::test]
    async fn emitted_events_reach_all_registered_observers() {
        let bus = EventBus::new();
        let recorder = Arc::new(RecordingObserver { events: Mutex::new(Vec::new()) });
        bus.register(recorder.clone()).await;

        bus.emit(ExplorationEvent::StatusChanged {
            exploration_id: "exp-1".into(),
            from: ExplorationStatus::Pending,
            to: ExplorationStatus::Running,
        })
        .await;

        let events = recorder.events.lock().await;
        assert_eq!(events.len(), 1);
        assert!(events[0].contains("exp-1"));
    }

    #[tokio::test]
    async fn no_observers_is_a_no_op() {
        let bus = EventBus::new();
        bus.emit(ExplorationEvent::Started { exploration_id: "exp-1".into(), at: Utc::now() })
            .await;
    }
}
