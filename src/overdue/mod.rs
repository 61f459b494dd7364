//! Overdue reconciler.
//!
//! - [`OverdueReconciler::scan_overdue`] lists tasks past their deadline and
//!   not approved.
//! - [`OverdueReconciler::clone_overdue_task`] gives overdue work a fresh
//!   deadline. Cloning only happens on an explicit user request.
//! - [`OverdueReconciler::warnings`] counts overdue tasks per responsible user.
//! - [`OverdueReconciler::sweep`] publishes deadline reminders, overdue notices
//!   and per-user counters; [`OverdueReconciler::run`] repeats it on an interval.
//!
//! Nothing here writes `overdue` into a stored status.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::WARNING_DAYS_RANGE;
use crate::events::{Audience, CountNotice, DeadlineNotice, DomainEvent, OverdueNotice};
use crate::model::{
    days_overdue, derive_indicator_status, is_overdue, CurrentUser, IndicatorStatus, Task,
    TaskKind, TaskStatus,
};
use crate::workflow::{WorkflowEngine, WorkflowError};

/// Default look-ahead for deadline reminders.
pub const DEFAULT_WARNING_DAYS: i64 = 3;

const MIN_SWEEP_INTERVAL: StdDuration = StdDuration::from_secs(1);

/// One row of the overdue listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OverdueTask {
    pub task_id: Uuid,
    pub is_main: bool,
    pub content: String,
    pub responsible: String,
    pub end_date: DateTime<Utc>,
    pub days_overdue: i64,
    pub status: TaskStatus,
    /// Whether a clone of this task already exists
    pub cloned: bool,
}

/// Optional period filter for the warnings report.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PeriodFilter {
    pub year: Option<i32>,
    /// Calendar quarter, 1 to 4
    pub quarter: Option<u32>,
}

impl PeriodFilter {
    fn validate(&self) -> Result<(), WorkflowError> {
        match self.quarter {
            Some(q) if !(1..=4).contains(&q) => Err(WorkflowError::validation(format!(
                "quarter must be between 1 and 4, got {}",
                q
            ))),
            _ => Ok(()),
        }
    }

    fn contains(&self, date: DateTime<Utc>) -> bool {
        if let Some(year) = self.year {
            if date.year() != year {
                return false;
            }
        }
        if let Some(quarter) = self.quarter {
            if (date.month0() / 3) + 1 != quarter {
                return false;
            }
        }
        true
    }
}

/// Overdue count for one user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserWarning {
    pub user_id: String,
    pub overdue_count: usize,
}

/// What a sweep published.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub deadline_notices: usize,
    pub overdue_notices: usize,
    pub count_updates: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum NoticeKind {
    DeadlineSoon,
    Overdue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Counter {
    Incomplete,
    PendingApproval,
}

#[derive(Default)]
struct SweepMemory {
    notified: HashSet<(Uuid, NoticeKind)>,
    counts: HashMap<(String, Counter), usize>,
}

/// Finds overdue work, clones it on request, and publishes reminders.
pub struct OverdueReconciler {
    engine: WorkflowEngine,
    warning_window: Duration,
    memory: Mutex<SweepMemory>,
}

impl OverdueReconciler {
    /// `warning_days` is clamped to the range the configuration accepts.
    pub fn new(engine: WorkflowEngine, warning_days: i64) -> Self {
        let warning_days = warning_days.clamp(*WARNING_DAYS_RANGE.start(), *WARNING_DAYS_RANGE.end());
        Self {
            engine,
            warning_window: Duration::days(warning_days),
            memory: Mutex::new(SweepMemory::default()),
        }
    }

    /// Tasks whose deadline passed and that are not approved.
    pub async fn scan_overdue(&self, now: DateTime<Utc>) -> Result<Vec<OverdueTask>, WorkflowError> {
        let tasks = self.engine.repository().list_tasks().await?;
        let clone_origins: HashSet<Uuid> = tasks.iter().filter_map(|t| t.cloned_from).collect();

        let mut overdue: Vec<OverdueTask> = tasks
            .iter()
            .filter(|t| is_overdue(t.end_date, t.status, now))
            .map(|t| OverdueTask {
                task_id: t.id,
                is_main: t.kind.is_main(),
                content: t.content.clone(),
                responsible: t.responsible().to_string(),
                end_date: t.end_date,
                days_overdue: days_overdue(t.end_date, now),
                status: t.status,
                cloned: t.cloned || clone_origins.contains(&t.id),
            })
            .collect();
        overdue.sort_by(|a, b| b.days_overdue.cmp(&a.days_overdue));
        Ok(overdue)
    }

    /// Create a fresh copy of an overdue task with a new deadline.
    ///
    /// The original is flagged `cloned` first so a second attempt fails even
    /// if two users race. A subtask whose main task was already cloned is
    /// copied under that main task's clone.
    pub async fn clone_overdue_task(
        &self,
        user: &CurrentUser,
        task_id: Uuid,
        new_deadline: DateTime<Utc>,
    ) -> Result<Task, WorkflowError> {
        let now = Utc::now();
        if new_deadline <= now {
            return Err(WorkflowError::validation(
                "the new deadline must be in the future",
            ));
        }

        let original = self.engine.load_task(task_id).await?;
        self.engine.ensure_reviewer(user, &original).await?;
        let mut new_parent = None;
        if let TaskKind::Sub { parent_id, .. } = &original.kind {
            let parent = self.live_parent(*parent_id).await?;
            if new_deadline > parent.end_date {
                return Err(WorkflowError::validation(
                    "a subtask's deadline cannot be later than its main task's deadline",
                ));
            }
            if parent.id != *parent_id {
                new_parent = Some(parent.id);
            }
        }

        let flagged = self
            .engine
            .mutate_task(task_id, |task| {
                if task.cloned {
                    return Err(WorkflowError::validation("this task has already been cloned"));
                }
                if !is_overdue(task.end_date, task.status, now) {
                    return Err(WorkflowError::validation("only overdue tasks can be cloned"));
                }
                task.cloned = true;
                task.updated_at = now;
                Ok(())
            })
            .await?;

        let mut copy = flagged.clone_with_deadline(new_deadline, user.id.clone());
        if let (Some(live_id), TaskKind::Sub { parent_id, .. }) = (new_parent, &mut copy.kind) {
            *parent_id = live_id;
        }
        let copy = match self.engine.repository().create_task(copy).await {
            Ok(copy) => copy,
            Err(e) => {
                warn!(task_id = %task_id, "clone failed, releasing original: {}", e);
                let release = self
                    .engine
                    .mutate_task(task_id, |task| {
                        task.cloned = false;
                        Ok(())
                    })
                    .await;
                if let Err(release_err) = release {
                    warn!(task_id = %task_id, "could not release original: {}", release_err);
                }
                return Err(e.into());
            }
        };

        info!(original = %task_id, clone = %copy.id, "overdue task cloned");
        let bus = self.engine.bus();
        bus.publish(DomainEvent::updated(flagged)).await;
        bus.publish(DomainEvent::created(copy.clone())).await;
        Ok(copy)
    }

    /// The main task that currently carries `parent_id`'s work: the task
    /// itself, or the end of its clone chain once it was cloned.
    async fn live_parent(&self, parent_id: Uuid) -> Result<Task, WorkflowError> {
        let mut parent = self.engine.load_task(parent_id).await?;
        if parent.is_live() {
            return Ok(parent);
        }
        let tasks = self.engine.repository().list_tasks().await?;
        while !parent.is_live() {
            match tasks.iter().find(|t| t.cloned_from == Some(parent.id)) {
                Some(next) => parent = next.clone(),
                None => break,
            }
        }
        Ok(parent)
    }

    /// Overdue tasks per responsible user, most overdue first.
    ///
    /// The filter applies to each task's deadline.
    pub async fn warnings(
        &self,
        filter: PeriodFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<UserWarning>, WorkflowError> {
        filter.validate()?;
        let mut counts: HashMap<String, usize> = HashMap::new();
        for task in self.scan_overdue(now).await? {
            if filter.contains(task.end_date) {
                *counts.entry(task.responsible).or_default() += 1;
            }
        }
        let mut warnings: Vec<UserWarning> = counts
            .into_iter()
            .map(|(user_id, overdue_count)| UserWarning {
                user_id,
                overdue_count,
            })
            .collect();
        warnings.sort_by(|a, b| {
            b.overdue_count
                .cmp(&a.overdue_count)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        Ok(warnings)
    }

    /// Publish reminders and counters for the current state.
    ///
    /// Deadline and overdue notices go out once per item; counters go out
    /// whenever they change.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, WorkflowError> {
        let repo = self.engine.repository();
        let tasks = repo.list_tasks().await?;
        let indicators = repo.list_indicators().await?;
        let bus = self.engine.bus();
        let mut report = SweepReport::default();
        let mut pending_events = Vec::new();
        let mut counts = self.counters(&tasks).await?;

        {
            let mut memory = self.memory.lock().await;
            // Users whose count fell to zero still get an update so their badge clears.
            for key in memory.counts.keys() {
                counts.entry(key.clone()).or_insert(0);
            }

            for task in tasks.iter().filter(|t| t.is_live() && !t.status.is_terminal()) {
                if let Some(event) = self.deadline_event(task, now) {
                    if memory.notified.insert((task.id, NoticeKind::DeadlineSoon)) {
                        report.deadline_notices += 1;
                        pending_events.push((Audience::All, event));
                    }
                }
                if is_overdue(task.end_date, task.status, now)
                    && memory.notified.insert((task.id, NoticeKind::Overdue))
                {
                    report.overdue_notices += 1;
                    pending_events.push((
                        Audience::All,
                        DomainEvent::TaskOverdue(OverdueNotice {
                            id: task.id,
                            title: task.content.clone(),
                            end_date: task.end_date,
                            days_overdue: days_overdue(task.end_date, now),
                        }),
                    ));
                }
            }

            for indicator in &indicators {
                let status = derive_indicator_status(
                    tasks
                        .iter()
                        .filter(|t| t.is_live() && t.kind.indicator_id() == Some(indicator.id))
                        .map(|t| t.status),
                );
                if status == IndicatorStatus::Completed {
                    continue;
                }
                let remaining = indicator.end_date - now;
                if indicator.end_date < now {
                    if memory.notified.insert((indicator.id, NoticeKind::Overdue)) {
                        report.overdue_notices += 1;
                        pending_events.push((
                            Audience::All,
                            DomainEvent::IndicatorOverdue(OverdueNotice {
                                id: indicator.id,
                                title: indicator.name.clone(),
                                end_date: indicator.end_date,
                                days_overdue: days_overdue(indicator.end_date, now),
                            }),
                        ));
                    }
                } else if remaining <= self.warning_window
                    && memory.notified.insert((indicator.id, NoticeKind::DeadlineSoon))
                {
                    report.deadline_notices += 1;
                    pending_events.push((
                        Audience::All,
                        DomainEvent::IndicatorDeadlineSoon(DeadlineNotice {
                            id: indicator.id,
                            title: indicator.name.clone(),
                            end_date: indicator.end_date,
                            days_left: remaining.num_days(),
                        }),
                    ));
                }
            }

            for ((user_id, counter), count) in counts {
                let key = (user_id.clone(), counter);
                if memory.counts.get(&key) == Some(&count) {
                    continue;
                }
                memory.counts.insert(key, count);
                report.count_updates += 1;
                let notice = CountNotice {
                    user_id: user_id.clone(),
                    count,
                };
                let event = match counter {
                    Counter::Incomplete => DomainEvent::TasksIncompleteCount(notice),
                    Counter::PendingApproval => DomainEvent::TasksPendingApprovalCount(notice),
                };
                pending_events.push((Audience::Users(vec![user_id]), event));
            }
        }

        for (audience, event) in pending_events {
            bus.publish_to(audience, event).await;
        }
        debug!(?report, "sweep finished");
        Ok(report)
    }

    fn deadline_event(&self, task: &Task, now: DateTime<Utc>) -> Option<DomainEvent> {
        let remaining = task.end_date - now;
        if remaining < Duration::zero() || remaining > self.warning_window {
            return None;
        }
        let notice = DeadlineNotice {
            id: task.id,
            title: task.content.clone(),
            end_date: task.end_date,
            days_left: remaining.num_days(),
        };
        Some(if task.kind.is_main() {
            DomainEvent::MainTaskDeadlineSoon(notice)
        } else {
            DomainEvent::SubtaskDeadlineSoon(notice)
        })
    }

    /// Current counter values for users with at least one matching task.
    async fn counters(&self, tasks: &[Task]) -> Result<HashMap<(String, Counter), usize>, WorkflowError> {
        let mut counts: HashMap<(String, Counter), usize> = HashMap::new();
        for task in tasks.iter().filter(|t| t.is_live()) {
            if !task.status.is_terminal() {
                *counts
                    .entry((task.responsible().to_string(), Counter::Incomplete))
                    .or_default() += 1;
            }
            if task.pending_submission().is_some() {
                if let Some(reviewer) = self.engine.reviewer_of(task).await? {
                    *counts.entry((reviewer, Counter::PendingApproval)).or_default() += 1;
                }
            }
        }

        Ok(counts)
    }

    /// Run [`Self::sweep`] every `interval` until `cancel` fires.
    pub async fn run(self: Arc<Self>, interval: StdDuration, cancel: CancellationToken) {
        info!("Overdue sweep running every {:?}", interval);
        // tokio panics on a zero period
        let mut ticker = tokio::time::interval(interval.max(MIN_SWEEP_INTERVAL));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Overdue sweep stopped");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep(Utc::now()).await {
                        warn!("Overdue sweep failed: {}", e);
                    }
                }
            }
        }
    }
}
