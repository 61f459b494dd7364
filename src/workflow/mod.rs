//! Workflow engine: the single place that decides whether a task transition
//! is legal and applies it.
//!
//! ```text
//!   pending ──submit──▶ submitted ──approve──▶ approved (terminal)
//!                          │  ▲
//!                   reject │  │ submit
//!                          ▼  │
//!                        rejected
//!
//!   any non-approved state past its deadline reads as `overdue`;
//!   only cloning (see `crate::overdue`) moves work forward from there.
//! ```
//!
//! Writes are optimistic: read the task, check, write with the version that
//! was read, retry on a version conflict. Events go out only after the write
//! succeeded.

mod error;

pub use error::{ErrorKind, WorkflowError};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::events::{DomainEvent, EventBus, ReviewNotice};
use crate::model::{
    is_overdue, ApprovalStatus, CurrentUser, Indicator, IndicatorStatus,
    IndicatorView, ReviewInput, Submission, SubmissionInput, Task, TaskKind, User,
};
use crate::store::{SharedRepository, StoreError};

/// How many times a write is retried after losing a version race.
pub const DEFAULT_MAX_RETRIES: usize = 3;

/// Input for creating an indicator.
#[derive(Debug, Clone, Deserialize)]
pub struct NewIndicator {
    pub name: String,
    pub end_date: DateTime<Utc>,
}

/// Input for creating a main task under an indicator.
#[derive(Debug, Clone, Deserialize)]
pub struct NewMainTask {
    pub leader: String,
    pub department: String,
    #[serde(default)]
    pub supporters: Vec<String>,
    pub content: String,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub attachment: Option<String>,
}

/// Input for creating a subtask under a main task.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSubTask {
    pub assignee: String,
    /// Defaults to the main task's leader
    #[serde(default)]
    pub leader: Option<String>,
    pub content: String,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub attachment: Option<String>,
}

/// Applies task transitions and CRUD that feeds the event bus.
#[derive(Clone)]
pub struct WorkflowEngine {
    repo: SharedRepository,
    bus: EventBus,
    max_retries: usize,
}

impl WorkflowEngine {
    pub fn new(repo: SharedRepository, bus: EventBus) -> Self {
        Self {
            repo,
            bus,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn repository(&self) -> &SharedRepository {
        &self.repo
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    // ─────────────────────────────────────────────────────────────────────
    // Transitions
    // ─────────────────────────────────────────────────────────────────────

    /// Record a new submission for a task.
    ///
    /// Only the task's leader (main task) or assignee (subtask) may submit.
    pub async fn submit(
        &self,
        user: &CurrentUser,
        task_id: Uuid,
        input: SubmissionInput,
    ) -> Result<Task, WorkflowError> {
        let task = self.load_task(task_id).await?;
        if task.responsible() != user.id {
            return Err(WorkflowError::forbidden(
                "only the person responsible for this task can submit it",
            ));
        }

        let saved = self
            .mutate_task(task_id, |task| {
                let now = Utc::now();
                if task.status.is_terminal() {
                    return Err(WorkflowError::Locked(
                        "task is already approved and cannot be resubmitted".to_string(),
                    ));
                }
                if task.pending_submission().is_some() {
                    return Err(WorkflowError::Conflict(
                        "a submission is already awaiting review".to_string(),
                    ));
                }
                if is_overdue(task.end_date, task.status, now) {
                    return Err(WorkflowError::Locked(
                        "task is overdue; clone it with a new deadline to continue".to_string(),
                    ));
                }
                task.record_submission(Submission {
                    id: Uuid::new_v4(),
                    submitted_by: user.id.clone(),
                    submitted_at: now,
                    note: input.note.clone(),
                    link: input.link.clone(),
                    file: input.file.clone(),
                    approval_status: ApprovalStatus::Pending,
                    reviewer: None,
                    reviewed_at: None,
                    approval_comment: None,
                });
                Ok(())
            })
            .await?;

        info!(task_id = %task_id, user = %user.id, "submission recorded");
        self.bus.publish(DomainEvent::updated(saved.clone())).await;
        Ok(saved)
    }

    /// Approve the pending submission of a task.
    pub async fn approve(
        &self,
        user: &CurrentUser,
        task_id: Uuid,
        review: ReviewInput,
    ) -> Result<Task, WorkflowError> {
        self.review(user, task_id, review, ApprovalStatus::Approved)
            .await
    }

    /// Reject the pending submission of a task. The responsible user may resubmit.
    pub async fn reject(
        &self,
        user: &CurrentUser,
        task_id: Uuid,
        review: ReviewInput,
    ) -> Result<Task, WorkflowError> {
        self.review(user, task_id, review, ApprovalStatus::Rejected)
            .await
    }

    async fn review(
        &self,
        user: &CurrentUser,
        task_id: Uuid,
        review: ReviewInput,
        outcome: ApprovalStatus,
    ) -> Result<Task, WorkflowError> {
        let comment = review.comment.trim().to_string();
        if comment.is_empty() {
            return Err(WorkflowError::validation("a review comment is required"));
        }

        let task = self.load_task(task_id).await?;
        self.ensure_reviewer(user, &task).await?;

        let saved = self
            .mutate_task(task_id, |task| {
                if task.record_review(outcome, &user.id, &comment, Utc::now()) {
                    Ok(())
                } else {
                    Err(WorkflowError::NotPending(task.id))
                }
            })
            .await?;

        info!(
            task_id = %task_id,
            reviewer = %user.id,
            outcome = ?outcome,
            "submission reviewed"
        );

        let responsible = saved
            .submissions
            .iter()
            .rev()
            .find(|s| s.reviewer.as_deref() == Some(user.id.as_str()))
            .map(|s| s.submitted_by.clone())
            .unwrap_or_else(|| saved.responsible().to_string());
        let notice = ReviewNotice {
            task_id: saved.id,
            content: saved.content.clone(),
            reviewer: user.id.clone(),
            comment,
            responsible,
        };
        let outcome_event = match (saved.kind.is_main(), outcome) {
            (true, ApprovalStatus::Approved) => DomainEvent::TaskApproved(notice),
            (true, _) => DomainEvent::TaskRejected(notice),
            (false, ApprovalStatus::Approved) => DomainEvent::SubtaskApproved(notice),
            (false, _) => DomainEvent::SubtaskRejected(notice),
        };

        self.bus.publish(DomainEvent::updated(saved.clone())).await;
        self.bus.publish(outcome_event).await;

        if outcome == ApprovalStatus::Approved {
            if let Some(indicator_id) = saved.kind.indicator_id() {
                // The approval is already stored; a failed announcement must not undo it.
                if let Err(e) = self.announce_indicator_if_completed(indicator_id).await {
                    warn!(
                        indicator_id = %indicator_id,
                        "could not announce indicator status: {}",
                        e
                    );
                }
            }
        }

        Ok(saved)
    }

    async fn announce_indicator_if_completed(&self, indicator_id: Uuid) -> Result<(), WorkflowError> {
        let view = self.indicator_view(indicator_id).await?;
        if view.status == IndicatorStatus::Completed {
            info!(indicator_id = %indicator_id, "indicator completed");
            self.bus
                .publish(DomainEvent::IndicatorUpdated {
                    indicator: view.indicator,
                })
                .await;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────

    pub async fn get_task(&self, task_id: Uuid) -> Result<Task, WorkflowError> {
        self.load_task(task_id).await
    }

    pub async fn subtasks(&self, task_id: Uuid) -> Result<Vec<Task>, WorkflowError> {
        Ok(self.repo.list_subtasks(task_id).await?)
    }

    pub async fn main_tasks(&self, indicator_id: Uuid) -> Result<Vec<Task>, WorkflowError> {
        self.load_indicator(indicator_id).await?;
        Ok(self.repo.list_main_tasks(indicator_id).await?)
    }

    /// An indicator with its status derived from its main tasks.
    pub async fn indicator_view(&self, indicator_id: Uuid) -> Result<IndicatorView, WorkflowError> {
        let indicator = self.load_indicator(indicator_id).await?;
        let tasks = self.repo.list_main_tasks(indicator_id).await?;
        Ok(IndicatorView::from_tasks(indicator, &tasks))
    }

    pub async fn list_indicators(&self) -> Result<Vec<IndicatorView>, WorkflowError> {
        let indicators = self.repo.list_indicators().await?;
        let mut views = Vec::with_capacity(indicators.len());
        for indicator in indicators {
            let tasks = self.repo.list_main_tasks(indicator.id).await?;
            views.push(IndicatorView::from_tasks(indicator, &tasks));
        }
        Ok(views)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Creation and deletion
    // ─────────────────────────────────────────────────────────────────────

    pub async fn create_indicator(
        &self,
        user: &CurrentUser,
        input: NewIndicator,
    ) -> Result<Indicator, WorkflowError> {
        if !user.role.can_manage() {
            return Err(WorkflowError::forbidden(
                "only managers and administrators can create indicators",
            ));
        }
        let name = input.name.trim();
        if name.is_empty() {
            return Err(WorkflowError::validation("indicator name is required"));
        }

        let indicator = self
            .repo
            .create_indicator(Indicator::new(name.to_string(), input.end_date, user.id.clone()))
            .await?;
        info!(indicator_id = %indicator.id, "indicator created");
        self.bus
            .publish(DomainEvent::IndicatorCreated {
                indicator: indicator.clone(),
            })
            .await;
        Ok(indicator)
    }

    /// Delete an indicator and every task under it.
    pub async fn delete_indicator(
        &self,
        user: &CurrentUser,
        indicator_id: Uuid,
    ) -> Result<(), WorkflowError> {
        let indicator = self.load_indicator(indicator_id).await?;
        if indicator.created_by != user.id && !user.is_admin() {
            return Err(WorkflowError::forbidden(
                "only the indicator's creator or an administrator can delete it",
            ));
        }

        for task in self.repo.list_main_tasks(indicator_id).await? {
            self.remove_task_tree(task.id).await?;
        }
        self.repo.delete_indicator(indicator_id).await?;
        info!(indicator_id = %indicator_id, "indicator deleted");
        self.bus
            .publish(DomainEvent::IndicatorDeleted { indicator_id })
            .await;
        Ok(())
    }

    pub async fn create_main_task(
        &self,
        user: &CurrentUser,
        indicator_id: Uuid,
        input: NewMainTask,
    ) -> Result<Task, WorkflowError> {
        let indicator = self.load_indicator(indicator_id).await?;
        if indicator.created_by != user.id && !user.is_admin() {
            return Err(WorkflowError::forbidden(
                "only the indicator's creator or an administrator can add tasks to it",
            ));
        }
        if input.content.trim().is_empty() {
            return Err(WorkflowError::validation("task content is required"));
        }
        if input.department.trim().is_empty() {
            return Err(WorkflowError::validation("a department is required"));
        }
        if input.leader.trim().is_empty() {
            return Err(WorkflowError::validation("a leader is required"));
        }

        let mut task = Task::new(
            TaskKind::Main {
                indicator_id,
                department: input.department,
                supporters: input.supporters,
            },
            input.leader,
            input.content,
            input.end_date,
            user.id.clone(),
        );
        task.notes = input.notes;
        task.attachment = input.attachment;

        let task = self.repo.create_task(task).await?;
        info!(task_id = %task.id, indicator_id = %indicator_id, "main task created");
        self.bus.publish(DomainEvent::created(task.clone())).await;
        Ok(task)
    }

    /// Create a subtask. Its deadline may not exceed the parent's and its
    /// assignee must share the leader's department.
    pub async fn create_subtask(
        &self,
        user: &CurrentUser,
        parent_id: Uuid,
        input: NewSubTask,
    ) -> Result<Task, WorkflowError> {
        let parent = self.load_task(parent_id).await?;
        let TaskKind::Main { department, .. } = &parent.kind else {
            return Err(WorkflowError::validation(
                "subtasks can only be created under a main task",
            ));
        };
        if parent.leader != user.id && !user.is_admin() {
            return Err(WorkflowError::forbidden(
                "only the main task's leader or an administrator can add subtasks",
            ));
        }
        if input.content.trim().is_empty() {
            return Err(WorkflowError::validation("task content is required"));
        }
        if input.end_date > parent.end_date {
            return Err(WorkflowError::validation(
                "a subtask's deadline cannot be later than its main task's deadline",
            ));
        }

        let leader = input.leader.unwrap_or_else(|| parent.leader.clone());
        let leader_department = match self.repo.get_user(&leader).await? {
            Some(u) => u.department,
            None => department.clone(),
        };
        let assignee = self.repo.get_user(&input.assignee).await?.ok_or_else(|| {
            WorkflowError::validation(format!("assignee {} is not a known user", input.assignee))
        })?;
        if assignee.department != leader_department {
            return Err(WorkflowError::validation(format!(
                "assignee {} is not in department {}",
                assignee.id, leader_department
            )));
        }

        let mut task = Task::new(
            TaskKind::Sub {
                parent_id,
                assignee: assignee.id,
            },
            leader,
            input.content,
            input.end_date,
            user.id.clone(),
        );
        task.notes = input.notes;
        task.attachment = input.attachment;

        let task = self.repo.create_task(task).await?;
        info!(task_id = %task.id, parent_id = %parent_id, "subtask created");
        self.bus.publish(DomainEvent::created(task.clone())).await;
        Ok(task)
    }

    /// Delete a task (and its subtasks when it is a main task).
    pub async fn delete_task(&self, user: &CurrentUser, task_id: Uuid) -> Result<(), WorkflowError> {
        let task = self.load_task(task_id).await?;
        if task.created_by != user.id && !user.is_admin() {
            return Err(WorkflowError::forbidden(
                "only the task's creator or an administrator can delete it",
            ));
        }
        self.remove_task_tree(task_id).await
    }

    async fn remove_task_tree(&self, task_id: Uuid) -> Result<(), WorkflowError> {
        for sub in self.repo.list_subtasks(task_id).await? {
            if self.repo.delete_task(sub.id).await? {
                self.bus
                    .publish(DomainEvent::TaskDeleted { task_id: sub.id })
                    .await;
            }
        }
        if self.repo.delete_task(task_id).await? {
            info!(task_id = %task_id, "task deleted");
            self.bus.publish(DomainEvent::TaskDeleted { task_id }).await;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // User directory
    // ─────────────────────────────────────────────────────────────────────

    pub async fn list_users(&self) -> Result<Vec<User>, WorkflowError> {
        Ok(self.repo.list_users().await?)
    }

    pub async fn create_user(&self, caller: &CurrentUser, user: User) -> Result<User, WorkflowError> {
        ensure_admin(caller)?;
        validate_user(&user)?;
        if self.repo.get_user(&user.id).await?.is_some() {
            return Err(WorkflowError::Conflict(format!("user {} already exists", user.id)));
        }
        let user = self.repo.upsert_user(user).await?;
        info!(user = %user.id, "user created");
        self.bus
            .publish(DomainEvent::UserCreated { user: user.clone() })
            .await;
        Ok(user)
    }

    /// Replace a user's record. The id in `user` is ignored in favour of `user_id`.
    pub async fn update_user(
        &self,
        caller: &CurrentUser,
        user_id: &str,
        mut user: User,
    ) -> Result<User, WorkflowError> {
        ensure_admin(caller)?;
        user.id = user_id.to_string();
        validate_user(&user)?;
        if self.repo.get_user(user_id).await?.is_none() {
            return Err(WorkflowError::NotFound {
                entity: "user",
                id: user_id.to_string(),
            });
        }
        let user = self.repo.upsert_user(user).await?;
        info!(user = %user.id, "user updated");
        self.bus
            .publish(DomainEvent::UserUpdated { user: user.clone() })
            .await;
        Ok(user)
    }

    pub async fn delete_user(&self, caller: &CurrentUser, user_id: &str) -> Result<(), WorkflowError> {
        ensure_admin(caller)?;
        if !self.repo.delete_user(user_id).await? {
            return Err(WorkflowError::NotFound {
                entity: "user",
                id: user_id.to_string(),
            });
        }
        info!(user = %user_id, "user deleted");
        self.bus
            .publish(DomainEvent::UserDeleted {
                user_id: user_id.to_string(),
            })
            .await;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Shared helpers
    // ─────────────────────────────────────────────────────────────────────

    pub(crate) async fn load_task(&self, task_id: Uuid) -> Result<Task, WorkflowError> {
        self.repo
            .get_task(task_id)
            .await?
            .ok_or_else(|| WorkflowError::task_not_found(task_id))
    }

    async fn load_indicator(&self, indicator_id: Uuid) -> Result<Indicator, WorkflowError> {
        self.repo
            .get_indicator(indicator_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound {
                entity: "indicator",
                id: indicator_id.to_string(),
            })
    }

    /// The user whose authority covers reviewing (and cloning) a task:
    /// the indicator's creator for a main task, the main task's leader for a
    /// subtask. `None` if the parent chain is broken.
    pub(crate) async fn reviewer_of(&self, task: &Task) -> Result<Option<String>, WorkflowError> {
        match &task.kind {
            TaskKind::Main { indicator_id, .. } => Ok(self
                .repo
                .get_indicator(*indicator_id)
                .await?
                .map(|i| i.created_by)),
            TaskKind::Sub { parent_id, .. } => {
                Ok(self.repo.get_task(*parent_id).await?.map(|p| p.leader))
            }
        }
    }

    /// Administrators always pass; everyone else must hold authority over
    /// the task's parent chain.
    pub(crate) async fn ensure_reviewer(
        &self,
        user: &CurrentUser,
        task: &Task,
    ) -> Result<(), WorkflowError> {
        if user.is_admin() {
            return Ok(());
        }
        match self.reviewer_of(task).await? {
            Some(reviewer) if reviewer == user.id => Ok(()),
            _ => Err(WorkflowError::forbidden(if task.kind.is_main() {
                "only the indicator's creator or an administrator can review this task"
            } else {
                "only the main task's leader or an administrator can review this subtask"
            })),
        }
    }

    /// Read-check-write with retry on version conflicts.
    ///
    /// `apply` runs against a fresh copy on every attempt, so its checks see
    /// the latest stored state.
    pub(crate) async fn mutate_task<F>(&self, task_id: Uuid, mut apply: F) -> Result<Task, WorkflowError>
    where
        F: FnMut(&mut Task) -> Result<(), WorkflowError>,
    {
        for attempt in 0..=self.max_retries {
            let mut task = self.load_task(task_id).await?;
            let expected = task.version;
            apply(&mut task)?;
            match self.repo.update_task(task, expected).await {
                Ok(saved) => return Ok(saved),
                Err(StoreError::VersionConflict { .. }) => {
                    debug!(task_id = %task_id, attempt, "version conflict, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(WorkflowError::Conflict(format!(
            "task {} is being changed by someone else, try again",
            task_id
        )))
    }
}

fn ensure_admin(caller: &CurrentUser) -> Result<(), WorkflowError> {
    if caller.is_admin() {
        Ok(())
    } else {
        Err(WorkflowError::forbidden(
            "only administrators can manage the user directory",
        ))
    }
}

fn validate_user(user: &User) -> Result<(), WorkflowError> {
    if user.id.trim().is_empty() {
        return Err(WorkflowError::validation("user id is required"));
    }
    if user.name.trim().is_empty() {
        return Err(WorkflowError::validation("user name is required"));
    }
    if user.department.trim().is_empty() {
        return Err(WorkflowError::validation("user department is required"));
    }
    Ok(())
}

#[cfg(test)]
mod tests;
