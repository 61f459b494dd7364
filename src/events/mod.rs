//! Domain events and the in-process event bus.
//!
//! The workflow engine and the overdue reconciler publish [`DomainEvent`]s on
//! an [`EventBus`]. The bus hands every event to each attached [`EventSink`];
//! in the server the only sink is the SSE channel registry
//! (`crate::transport::ChannelRegistry`).
//!
//! On the wire an event is `{"type": "<event_type>", ...payload}`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::model::{Indicator, Task, User};

// ─────────────────────────────────────────────────────────────────────────────
// Event catalog
// ─────────────────────────────────────────────────────────────────────────────

/// A state change that connected clients should hear about.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    TaskCreated { task: Task },
    TaskUpdated { task: Task },
    TaskDeleted { task_id: Uuid },
    SubtaskCreated { task: Task },
    SubtaskUpdated { task: Task },
    IndicatorCreated { indicator: Indicator },
    IndicatorUpdated { indicator: Indicator },
    IndicatorDeleted { indicator_id: Uuid },
    UserCreated { user: User },
    UserUpdated { user: User },
    UserDeleted { user_id: String },
    TaskApproved(ReviewNotice),
    TaskRejected(ReviewNotice),
    SubtaskApproved(ReviewNotice),
    SubtaskRejected(ReviewNotice),
    MainTaskDeadlineSoon(DeadlineNotice),
    SubtaskDeadlineSoon(DeadlineNotice),
    IndicatorDeadlineSoon(DeadlineNotice),
    TaskOverdue(OverdueNotice),
    IndicatorOverdue(OverdueNotice),
    TasksIncompleteCount(CountNotice),
    TasksPendingApprovalCount(CountNotice),
}

/// Outcome of a review, addressed to whoever submitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReviewNotice {
    pub task_id: Uuid,
    pub content: String,
    pub reviewer: String,
    pub comment: String,
    /// User who submitted the reviewed work
    pub responsible: String,
}

/// An item whose deadline is close.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeadlineNotice {
    pub id: Uuid,
    pub title: String,
    pub end_date: DateTime<Utc>,
    pub days_left: i64,
}

/// An item past its deadline and not approved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OverdueNotice {
    pub id: Uuid,
    pub title: String,
    pub end_date: DateTime<Utc>,
    pub days_overdue: i64,
}

/// A per-user counter snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CountNotice {
    pub user_id: String,
    pub count: usize,
}

/// Type names of every event the server can publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    TaskCreated,
    TaskUpdated,
    TaskDeleted,
    SubtaskCreated,
    SubtaskUpdated,
    IndicatorCreated,
    IndicatorUpdated,
    IndicatorDeleted,
    UserCreated,
    UserUpdated,
    UserDeleted,
    TaskApproved,
    TaskRejected,
    SubtaskApproved,
    SubtaskRejected,
    MainTaskDeadlineSoon,
    SubtaskDeadlineSoon,
    IndicatorDeadlineSoon,
    TaskOverdue,
    IndicatorOverdue,
    TasksIncompleteCount,
    TasksPendingApprovalCount,
}

impl EventType {
    pub const ALL: [EventType; 22] = [
        Self::TaskCreated,
        Self::TaskUpdated,
        Self::TaskDeleted,
        Self::SubtaskCreated,
        Self::SubtaskUpdated,
        Self::IndicatorCreated,
        Self::IndicatorUpdated,
        Self::IndicatorDeleted,
        Self::UserCreated,
        Self::UserUpdated,
        Self::UserDeleted,
        Self::TaskApproved,
        Self::TaskRejected,
        Self::SubtaskApproved,
        Self::SubtaskRejected,
        Self::MainTaskDeadlineSoon,
        Self::SubtaskDeadlineSoon,
        Self::IndicatorDeadlineSoon,
        Self::TaskOverdue,
        Self::IndicatorOverdue,
        Self::TasksIncompleteCount,
        Self::TasksPendingApprovalCount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskCreated => "task_created",
            Self::TaskUpdated => "task_updated",
            Self::TaskDeleted => "task_deleted",
            Self::SubtaskCreated => "subtask_created",
            Self::SubtaskUpdated => "subtask_updated",
            Self::IndicatorCreated => "indicator_created",
            Self::IndicatorUpdated => "indicator_updated",
            Self::IndicatorDeleted => "indicator_deleted",
            Self::UserCreated => "user_created",
            Self::UserUpdated => "user_updated",
            Self::UserDeleted => "user_deleted",
            Self::TaskApproved => "task_approved",
            Self::TaskRejected => "task_rejected",
            Self::SubtaskApproved => "subtask_approved",
            Self::SubtaskRejected => "subtask_rejected",
            Self::MainTaskDeadlineSoon => "main_task_deadline_soon",
            Self::SubtaskDeadlineSoon => "subtask_deadline_soon",
            Self::IndicatorDeadlineSoon => "indicator_deadline_soon",
            Self::TaskOverdue => "task_overdue",
            Self::IndicatorOverdue => "indicator_overdue",
            Self::TasksIncompleteCount => "tasks_incomplete_count",
            Self::TasksPendingApprovalCount => "tasks_pending_approval_count",
        }
    }

    /// Look up a wire name. Unknown names return `None`.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == name)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DomainEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::TaskCreated { .. } => EventType::TaskCreated,
            Self::TaskUpdated { .. } => EventType::TaskUpdated,
            Self::TaskDeleted { .. } => EventType::TaskDeleted,
            Self::SubtaskCreated { .. } => EventType::SubtaskCreated,
            Self::SubtaskUpdated { .. } => EventType::SubtaskUpdated,
            Self::IndicatorCreated { .. } => EventType::IndicatorCreated,
            Self::IndicatorUpdated { .. } => EventType::IndicatorUpdated,
            Self::IndicatorDeleted { .. } => EventType::IndicatorDeleted,
            Self::UserCreated { .. } => EventType::UserCreated,
            Self::UserUpdated { .. } => EventType::UserUpdated,
            Self::UserDeleted { .. } => EventType::UserDeleted,
            Self::TaskApproved(_) => EventType::TaskApproved,
            Self::TaskRejected(_) => EventType::TaskRejected,
            Self::SubtaskApproved(_) => EventType::SubtaskApproved,
            Self::SubtaskRejected(_) => EventType::SubtaskRejected,
            Self::MainTaskDeadlineSoon(_) => EventType::MainTaskDeadlineSoon,
            Self::SubtaskDeadlineSoon(_) => EventType::SubtaskDeadlineSoon,
            Self::IndicatorDeadlineSoon(_) => EventType::IndicatorDeadlineSoon,
            Self::TaskOverdue(_) => EventType::TaskOverdue,
            Self::IndicatorOverdue(_) => EventType::IndicatorOverdue,
            Self::TasksIncompleteCount(_) => EventType::TasksIncompleteCount,
            Self::TasksPendingApprovalCount(_) => EventType::TasksPendingApprovalCount,
        }
    }

    /// `task_created` or `subtask_created` depending on the task's kind.
    pub fn created(task: Task) -> Self {
        if task.kind.is_main() {
            Self::TaskCreated { task }
        } else {
            Self::SubtaskCreated { task }
        }
    }

    /// `task_updated` or `subtask_updated` depending on the task's kind.
    pub fn updated(task: Task) -> Self {
        if task.kind.is_main() {
            Self::TaskUpdated { task }
        } else {
            Self::SubtaskUpdated { task }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bus
// ─────────────────────────────────────────────────────────────────────────────

/// Who should receive an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Every connected channel
    All,
    /// Only channels registered under one of these user ids
    Users(Vec<String>),
}

impl Audience {
    pub fn includes(&self, user_id: &str) -> bool {
        match self {
            Self::All => true,
            Self::Users(ids) => ids.iter().any(|id| id == user_id),
        }
    }
}

/// An event plus its routing.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub event: DomainEvent,
    pub audience: Audience,
}

/// Destination for published events.
///
/// Implementations must not fail the publisher: delivery problems are
/// handled (and logged) inside the sink.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, envelope: Arc<Envelope>);
}

/// In-process publish point shared by everything that mutates state.
#[derive(Clone, Default)]
pub struct EventBus {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Publish to every channel.
    pub async fn publish(&self, event: DomainEvent) {
        self.publish_to(Audience::All, event).await;
    }

    /// Publish with explicit routing.
    pub async fn publish_to(&self, audience: Audience, event: DomainEvent) {
        tracing::debug!(event_type = %event.event_type(), "publishing event");
        let envelope = Arc::new(Envelope { event, audience });
        for sink in &self.sinks {
            sink.deliver(Arc::clone(&envelope)).await;
        }
    }
}

/// Sink that keeps every envelope it receives. Useful for tests and audits.
#[derive(Default)]
pub struct MemorySink {
    received: Mutex<Vec<Arc<Envelope>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<DomainEvent> {
        self.received
            .lock()
            .await
            .iter()
            .map(|e| e.event.clone())
            .collect()
    }

    pub async fn types(&self) -> Vec<EventType> {
        self.received
            .lock()
            .await
            .iter()
            .map(|e| e.event.event_type())
            .collect()
    }

    pub async fn envelopes(&self) -> Vec<Arc<Envelope>> {
        self.received.lock().await.clone()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn deliver(&self, envelope: Arc<Envelope>) {
        self.received.lock().await.push(envelope);
    }
}
