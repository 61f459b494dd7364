//! Status enums and the pure functions that derive them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const SECONDS_PER_DAY: i64 = 86_400;

/// Status of a main task or subtask.
///
/// `Overdue` is only ever produced by [`super::Task::effective_status`];
/// stores hold one of the other four.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Submitted,
    Approved,
    Rejected,
    Overdue,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Overdue => "overdue",
        }
    }

    /// Approved is terminal for a task instance.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate status of an indicator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorStatus {
    NoTasks,
    InProgress,
    Completed,
}

/// Derive an indicator's status from its main tasks' statuses.
///
/// Zero tasks is `no_tasks`, all approved is `completed`, anything else is
/// `in_progress`.
pub fn derive_indicator_status<I>(statuses: I) -> IndicatorStatus
where
    I: IntoIterator<Item = TaskStatus>,
{
    let mut any = false;
    for status in statuses {
        any = true;
        if status != TaskStatus::Approved {
            return IndicatorStatus::InProgress;
        }
    }
    if any {
        IndicatorStatus::Completed
    } else {
        IndicatorStatus::NoTasks
    }
}

/// A task is overdue when its deadline passed and it is not approved.
pub fn is_overdue(end_date: DateTime<Utc>, status: TaskStatus, now: DateTime<Utc>) -> bool {
    end_date < now && status != TaskStatus::Approved
}

/// Whole days elapsed since the deadline, floored. Zero if not yet due.
pub fn days_overdue(end_date: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let secs = (now - end_date).num_seconds();
    if secs <= 0 {
        0
    } else {
        secs / SECONDS_PER_DAY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn any_stored_status() -> impl Strategy<Value = TaskStatus> {
        prop_oneof![
            Just(TaskStatus::Pending),
            Just(TaskStatus::Submitted),
            Just(TaskStatus::Approved),
            Just(TaskStatus::Rejected),
            Just(TaskStatus::Overdue),
        ]
    }

    #[test]
    fn test_indicator_status_edges() {
        assert_eq!(derive_indicator_status(Vec::<TaskStatus>::new()), IndicatorStatus::NoTasks);
        assert_eq!(
            derive_indicator_status([TaskStatus::Approved, TaskStatus::Approved]),
            IndicatorStatus::Completed
        );
        assert_eq!(
            derive_indicator_status([TaskStatus::Approved, TaskStatus::Rejected]),
            IndicatorStatus::InProgress
        );
    }

    #[test]
    fn test_overdue_ignores_approved() {
        let now = Utc::now();
        let past = now - Duration::hours(1);
        assert!(is_overdue(past, TaskStatus::Pending, now));
        assert!(is_overdue(past, TaskStatus::Submitted, now));
        assert!(!is_overdue(past, TaskStatus::Approved, now));
        assert!(!is_overdue(now + Duration::hours(1), TaskStatus::Pending, now));
    }

    #[test]
    fn test_days_overdue_floors() {
        let now = Utc::now();
        assert_eq!(days_overdue(now - Duration::hours(23), now), 0);
        assert_eq!(days_overdue(now - Duration::hours(25), now), 1);
        assert_eq!(days_overdue(now - Duration::days(7), now), 7);
        assert_eq!(days_overdue(now + Duration::days(2), now), 0);
    }

    proptest! {
        #[test]
        fn prop_indicator_status_is_pure_aggregation(
            statuses in prop::collection::vec(any_stored_status(), 0..16)
        ) {
            let derived = derive_indicator_status(statuses.iter().copied());
            if statuses.is_empty() {
                prop_assert_eq!(derived, IndicatorStatus::NoTasks);
            } else if statuses.iter().all(|s| *s == TaskStatus::Approved) {
                prop_assert_eq!(derived, IndicatorStatus::Completed);
            } else {
                prop_assert_eq!(derived, IndicatorStatus::InProgress);
            }
        }
    }
}
