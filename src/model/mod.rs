//! Entity model: indicators, tasks, submissions and users.
//!
//! Main tasks and subtasks share one [`Task`] document. Which one a task is
//! lives in its [`TaskKind`], fixed at creation:
//!
//! ```text
//!   Indicator ──< Task{Main} ──< Task{Sub}
//!                    │               │
//!                    └─ submissions  └─ submissions   (append-only)
//! ```
//!
//! Stored status never holds `overdue`; it is derived on read by
//! [`Task::effective_status`].

mod status;

pub use status::{derive_indicator_status, is_overdue, days_overdue, IndicatorStatus, TaskStatus};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Users
// ─────────────────────────────────────────────────────────────────────────────

/// Role of a user within the organisation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Manager,
    Staff,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Manager => "manager",
            Self::Staff => "staff",
        }
    }

    /// Whether this role may create indicators and review work.
    pub fn can_manage(&self) -> bool {
        matches!(self, Self::Admin | Self::Manager)
    }
}

impl Default for Role {
    fn default() -> Self {
        Self::Staff
    }
}

/// A member of the user directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub role: Role,
    /// Job title (display only)
    #[serde(default)]
    pub position: String,
    pub department: String,
}

/// The authenticated caller of an operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub position: String,
    #[serde(default)]
    pub department: String,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<&User> for CurrentUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            role: user.role,
            position: user.position.clone(),
            department: user.department.clone(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Indicators
// ─────────────────────────────────────────────────────────────────────────────

/// A goal decomposed into main tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Indicator {
    pub id: Uuid,
    pub name: String,
    pub end_date: DateTime<Utc>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Indicator {
    pub fn new(name: String, end_date: DateTime<Utc>, created_by: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            end_date,
            created_by,
            created_at: now,
            updated_at: now,
        }
    }
}

/// An indicator together with its derived status, as returned to readers.
#[derive(Debug, Clone, Serialize)]
pub struct IndicatorView {
    #[serde(flatten)]
    pub indicator: Indicator,
    pub status: IndicatorStatus,
    pub task_count: usize,
}

impl IndicatorView {
    /// Derive the view from the indicator's main tasks. Originals that were
    /// superseded by a clone do not count; their clone stands in for them.
    pub fn from_tasks(indicator: Indicator, tasks: &[Task]) -> Self {
        let live: Vec<TaskStatus> = tasks.iter().filter(|t| t.is_live()).map(|t| t.status).collect();
        Self {
            status: derive_indicator_status(live.iter().copied()),
            task_count: live.len(),
            indicator,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tasks
// ─────────────────────────────────────────────────────────────────────────────

/// Distinguishes department-level main tasks from individual subtasks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskKind {
    Main {
        indicator_id: Uuid,
        department: String,
        #[serde(default)]
        supporters: Vec<String>,
    },
    Sub {
        parent_id: Uuid,
        assignee: String,
    },
}

impl TaskKind {
    pub fn is_main(&self) -> bool {
        matches!(self, Self::Main { .. })
    }

    pub fn parent_id(&self) -> Option<Uuid> {
        match self {
            Self::Sub { parent_id, .. } => Some(*parent_id),
            Self::Main { .. } => None,
        }
    }

    pub fn indicator_id(&self) -> Option<Uuid> {
        match self {
            Self::Main { indicator_id, .. } => Some(*indicator_id),
            Self::Sub { .. } => None,
        }
    }
}

/// Review outcome of a submission.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

/// One attempt at completing a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub submitted_by: String,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub note: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub approval_status: ApprovalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_comment: Option<String>,
}

/// A main task or subtask document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    #[serde(flatten)]
    pub kind: TaskKind,
    /// Chair of the task
    pub leader: String,
    pub content: String,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,
    pub status: TaskStatus,
    #[serde(default)]
    pub submissions: Vec<Submission>,
    /// False for tasks produced by cloning an overdue original
    pub is_root: bool,
    /// Original task this one was cloned from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloned_from: Option<Uuid>,
    /// Set once a clone of this task exists
    #[serde(default)]
    pub cloned: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token, bumped by the store on every update
    #[serde(default)]
    pub version: u64,
}

impl Task {
    /// Create a fresh root task in `pending` state.
    pub fn new(
        kind: TaskKind,
        leader: String,
        content: String,
        end_date: DateTime<Utc>,
        created_by: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            leader,
            content,
            end_date,
            notes: String::new(),
            attachment: None,
            status: TaskStatus::Pending,
            submissions: Vec::new(),
            is_root: true,
            cloned_from: None,
            cloned: false,
            created_by,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Produce a clone with a new deadline: same placement, fresh history.
    pub fn clone_with_deadline(&self, end_date: DateTime<Utc>, created_by: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind: self.kind.clone(),
            leader: self.leader.clone(),
            content: self.content.clone(),
            end_date,
            notes: self.notes.clone(),
            attachment: self.attachment.clone(),
            status: TaskStatus::Pending,
            submissions: Vec::new(),
            is_root: false,
            cloned_from: Some(self.id),
            cloned: false,
            created_by,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// False once the task was replaced by a clone.
    pub fn is_live(&self) -> bool {
        !self.cloned
    }

    /// The user expected to submit work: leader for main tasks, assignee for subtasks.
    pub fn responsible(&self) -> &str {
        match &self.kind {
            TaskKind::Main { .. } => &self.leader,
            TaskKind::Sub { assignee, .. } => assignee,
        }
    }

    pub fn pending_submission(&self) -> Option<&Submission> {
        self.submissions
            .iter()
            .rev()
            .find(|s| s.approval_status == ApprovalStatus::Pending)
    }

    fn pending_submission_mut(&mut self) -> Option<&mut Submission> {
        self.submissions
            .iter_mut()
            .rev()
            .find(|s| s.approval_status == ApprovalStatus::Pending)
    }

    /// Append a pending submission and move to `submitted`.
    ///
    /// Callers check that nothing is pending first; this only records.
    pub fn record_submission(&mut self, submission: Submission) {
        self.submissions.push(submission);
        self.status = TaskStatus::Submitted;
        self.updated_at = Utc::now();
    }

    /// Fill the review fields of the latest pending submission.
    ///
    /// Returns false if nothing is pending.
    pub fn record_review(
        &mut self,
        outcome: ApprovalStatus,
        reviewer: &str,
        comment: &str,
        at: DateTime<Utc>,
    ) -> bool {
        let Some(pending) = self.pending_submission_mut() else {
            return false;
        };
        pending.approval_status = outcome;
        pending.reviewer = Some(reviewer.to_string());
        pending.reviewed_at = Some(at);
        pending.approval_comment = Some(comment.to_string());
        self.status = match outcome {
            ApprovalStatus::Approved => TaskStatus::Approved,
            ApprovalStatus::Rejected => TaskStatus::Rejected,
            ApprovalStatus::Pending => TaskStatus::Submitted,
        };
        self.updated_at = at;
        true
    }

    /// Status as readers should see it, with `overdue` derived from the deadline.
    pub fn effective_status(&self, now: DateTime<Utc>) -> TaskStatus {
        if is_overdue(self.end_date, self.status, now) {
            TaskStatus::Overdue
        } else {
            self.status
        }
    }
}

/// Payload of a submit call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmissionInput {
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
}

/// Payload of an approve/reject call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewInput {
    #[serde(default)]
    pub comment: String,
}
