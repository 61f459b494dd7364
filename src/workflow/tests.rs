use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use super::*;
use crate::events::{EventType, MemorySink};
use crate::model::{ApprovalStatus, IndicatorStatus, Role, TaskStatus};
use crate::store::{MemoryStore, Repository};
use crate::testing::{caller, Fixture};

fn note(text: &str) -> SubmissionInput {
    SubmissionInput {
        note: text.to_string(),
        link: Some("https://example.test/report".to_string()),
        file: None,
    }
}

fn comment(text: &str) -> ReviewInput {
    ReviewInput {
        comment: text.to_string(),
    }
}

fn pending_count(task: &Task) -> usize {
    task.submissions
        .iter()
        .filter(|s| s.approval_status == ApprovalStatus::Pending)
        .count()
}

#[tokio::test]
async fn test_q3_sales_scenario() {
    let fx = Fixture::new().await;
    let indicator = fx.indicator("Q3 Sales").await;
    let task = fx
        .main_task(indicator.id, "alice", Utc::now() + Duration::days(5))
        .await;
    let alice = caller("alice", Role::Staff);
    let boss = caller("boss", Role::Manager);

    let submitted = fx.engine.submit(&alice, task.id, note("done")).await.unwrap();
    assert_eq!(submitted.status, TaskStatus::Submitted);

    let approved = fx
        .engine
        .approve(&boss, task.id, comment("ok"))
        .await
        .unwrap();
    assert_eq!(approved.status, TaskStatus::Approved);
    assert_eq!(approved.submissions[0].reviewer.as_deref(), Some("boss"));
    assert_eq!(approved.submissions[0].approval_comment.as_deref(), Some("ok"));

    let view = fx.engine.indicator_view(indicator.id).await.unwrap();
    assert_eq!(view.status, IndicatorStatus::Completed);

    assert_eq!(
        fx.sink.types().await,
        vec![
            EventType::TaskUpdated,
            EventType::TaskUpdated,
            EventType::TaskApproved,
            EventType::IndicatorUpdated,
        ]
    );
}

#[tokio::test]
async fn test_second_submit_while_pending_conflicts() {
    let fx = Fixture::new().await;
    let indicator = fx.indicator("Q3").await;
    let task = fx
        .main_task(indicator.id, "alice", Utc::now() + Duration::days(5))
        .await;
    let alice = caller("alice", Role::Staff);

    fx.engine.submit(&alice, task.id, note("one")).await.unwrap();
    let err = fx
        .engine
        .submit(&alice, task.id, note("two"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(err.is_retryable());

    let stored = fx.engine.get_task(task.id).await.unwrap();
    assert_eq!(stored.submissions.len(), 1);
    assert_eq!(pending_count(&stored), 1);
}

#[tokio::test]
async fn test_concurrent_submits_leave_one_pending() {
    let fx = Fixture::new().await;
    let indicator = fx.indicator("Q3").await;
    let task = fx
        .main_task(indicator.id, "alice", Utc::now() + Duration::days(5))
        .await;
    let alice = caller("alice", Role::Staff);
    let task_id = task.id;

    let mut handles = Vec::new();
    for i in 0..8 {
        let engine = fx.engine.clone();
        let alice = alice.clone();
        handles.push(tokio::spawn(async move {
            engine.submit(&alice, task_id, note(&format!("try {}", i))).await
        }));
    }
    let mut ok = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            ok += 1;
        }
    }

    assert_eq!(ok, 1);
    let stored = fx.engine.get_task(task.id).await.unwrap();
    assert_eq!(pending_count(&stored), 1);
}

#[tokio::test]
async fn test_submit_after_approval_is_locked() {
    let fx = Fixture::new().await;
    let indicator = fx.indicator("Q3").await;
    let task = fx
        .main_task(indicator.id, "alice", Utc::now() + Duration::days(5))
        .await;
    let alice = caller("alice", Role::Staff);
    let boss = caller("boss", Role::Manager);

    fx.engine.submit(&alice, task.id, note("done")).await.unwrap();
    fx.engine.approve(&boss, task.id, comment("ok")).await.unwrap();

    let err = fx
        .engine
        .submit(&alice, task.id, note("again"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Locked);
    let stored = fx.engine.get_task(task.id).await.unwrap();
    assert_eq!(stored.status, TaskStatus::Approved);
    assert_eq!(stored.submissions.len(), 1);
}

#[tokio::test]
async fn test_rejected_work_can_be_resubmitted() {
    let fx = Fixture::new().await;
    let indicator = fx.indicator("Q3").await;
    let task = fx
        .main_task(indicator.id, "alice", Utc::now() + Duration::days(5))
        .await;
    let alice = caller("alice", Role::Staff);
    let boss = caller("boss", Role::Manager);

    fx.engine.submit(&alice, task.id, note("draft")).await.unwrap();
    let rejected = fx
        .engine
        .reject(&boss, task.id, comment("missing totals"))
        .await
        .unwrap();
    assert_eq!(rejected.status, TaskStatus::Rejected);

    let resubmitted = fx.engine.submit(&alice, task.id, note("final")).await.unwrap();
    assert_eq!(resubmitted.status, TaskStatus::Submitted);
    assert_eq!(resubmitted.submissions.len(), 2);
    assert_eq!(
        resubmitted.submissions[0].approval_status,
        ApprovalStatus::Rejected
    );
    assert!(fx.sink.types().await.contains(&EventType::TaskRejected));
}

#[tokio::test]
async fn test_review_without_pending_submission() {
    let fx = Fixture::new().await;
    let indicator = fx.indicator("Q3").await;
    let task = fx
        .main_task(indicator.id, "alice", Utc::now() + Duration::days(5))
        .await;
    let boss = caller("boss", Role::Manager);

    for result in [
        fx.engine.approve(&boss, task.id, comment("ok")).await,
        fx.engine.reject(&boss, task.id, comment("no")).await,
    ] {
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotPending);
    }
    let stored = fx.engine.get_task(task.id).await.unwrap();
    assert!(stored.submissions.is_empty());
    assert!(fx.sink.types().await.is_empty());
}

#[tokio::test]
async fn test_review_requires_comment() {
    let fx = Fixture::new().await;
    let indicator = fx.indicator("Q3").await;
    let task = fx
        .main_task(indicator.id, "alice", Utc::now() + Duration::days(5))
        .await;
    fx.engine
        .submit(&caller("alice", Role::Staff), task.id, note("done"))
        .await
        .unwrap();

    let err = fx
        .engine
        .approve(&caller("boss", Role::Manager), task.id, comment("   "))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let stored = fx.engine.get_task(task.id).await.unwrap();
    assert_eq!(stored.status, TaskStatus::Submitted);
}

#[tokio::test]
async fn test_authorization_rules() {
    let fx = Fixture::new().await;
    let indicator = fx.indicator("Q3").await;
    let task = fx
        .main_task(indicator.id, "alice", Utc::now() + Duration::days(5))
        .await;

    // Only the leader submits a main task.
    let err = fx
        .engine
        .submit(&caller("bob", Role::Staff), task.id, note("mine"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);

    fx.engine
        .submit(&caller("alice", Role::Staff), task.id, note("done"))
        .await
        .unwrap();

    // A manager unrelated to the indicator cannot review it.
    let err = fx
        .engine
        .approve(&caller("mallory", Role::Manager), task.id, comment("ok"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);

    // An administrator can.
    fx.engine
        .approve(&caller("root", Role::Admin), task.id, comment("ok"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_subtask_flow_uses_assignee_and_main_leader() {
    let fx = Fixture::new().await;
    let indicator = fx.indicator("Q3").await;
    let main = fx
        .main_task(indicator.id, "alice", Utc::now() + Duration::days(5))
        .await;
    let sub = fx
        .subtask(&main, "bob", Utc::now() + Duration::days(2))
        .await;

    let err = fx
        .engine
        .submit(&caller("alice", Role::Staff), sub.id, note("for bob"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);

    fx.engine
        .submit(&caller("bob", Role::Staff), sub.id, note("done"))
        .await
        .unwrap();

    let err = fx
        .engine
        .approve(&caller("boss", Role::Manager), sub.id, comment("ok"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);

    fx.engine
        .approve(&caller("alice", Role::Staff), sub.id, comment("ok"))
        .await
        .unwrap();

    let types = fx.sink.types().await;
    assert!(types.contains(&EventType::SubtaskUpdated));
    assert!(types.contains(&EventType::SubtaskApproved));
}

#[tokio::test]
async fn test_submit_on_overdue_task_is_locked() {
    let fx = Fixture::new().await;
    let indicator = fx.indicator("Q3").await;
    let task = fx
        .main_task(indicator.id, "alice", Utc::now() - Duration::days(2))
        .await;

    let err = fx
        .engine
        .submit(&caller("alice", Role::Staff), task.id, note("late"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Locked);
}

#[tokio::test]
async fn test_create_subtask_validations() {
    let fx = Fixture::new().await;
    let indicator = fx.indicator("Q3").await;
    let main = fx
        .main_task(indicator.id, "alice", Utc::now() + Duration::days(5))
        .await;
    let alice = caller("alice", Role::Staff);

    let too_late = NewSubTask {
        assignee: "bob".to_string(),
        leader: None,
        content: "Call".to_string(),
        end_date: main.end_date + Duration::days(1),
        notes: String::new(),
        attachment: None,
    };
    let err = fx
        .engine
        .create_subtask(&alice, main.id, too_late)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let other_department = NewSubTask {
        assignee: "carol".to_string(),
        leader: None,
        content: "Call".to_string(),
        end_date: main.end_date,
        notes: String::new(),
        attachment: None,
    };
    let err = fx
        .engine
        .create_subtask(&alice, main.id, other_department)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let ok = NewSubTask {
        assignee: "bob".to_string(),
        leader: None,
        content: "Call".to_string(),
        end_date: main.end_date,
        notes: String::new(),
        attachment: None,
    };
    let sub = fx.engine.create_subtask(&alice, main.id, ok).await.unwrap();
    assert_eq!(sub.kind.parent_id(), Some(main.id));
    assert_eq!(sub.leader, "alice");
    assert_eq!(fx.sink.types().await, vec![EventType::SubtaskCreated]);
}

#[tokio::test]
async fn test_create_and_delete_indicator() {
    let fx = Fixture::new().await;
    let boss = caller("boss", Role::Manager);

    let err = fx
        .engine
        .create_indicator(
            &caller("alice", Role::Staff),
            NewIndicator {
                name: "Nope".to_string(),
                end_date: Utc::now() + Duration::days(30),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);

    let indicator = fx
        .engine
        .create_indicator(
            &boss,
            NewIndicator {
                name: "Q4 Growth".to_string(),
                end_date: Utc::now() + Duration::days(30),
            },
        )
        .await
        .unwrap();
    assert_eq!(
        fx.engine.indicator_view(indicator.id).await.unwrap().status,
        IndicatorStatus::NoTasks
    );

    let main = fx
        .engine
        .create_main_task(
            &boss,
            indicator.id,
            NewMainTask {
                leader: "alice".to_string(),
                department: "sales".to_string(),
                supporters: vec!["bob".to_string()],
                content: "Grow".to_string(),
                end_date: Utc::now() + Duration::days(10),
                notes: String::new(),
                attachment: None,
            },
        )
        .await
        .unwrap();
    fx.subtask(&main, "bob", main.end_date).await;
    assert_eq!(
        fx.engine.indicator_view(indicator.id).await.unwrap().status,
        IndicatorStatus::InProgress
    );

    let err = fx
        .engine
        .delete_indicator(&caller("alice", Role::Staff), indicator.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);

    fx.engine.delete_indicator(&boss, indicator.id).await.unwrap();
    assert!(fx.repo.list_tasks().await.unwrap().is_empty());
    let types = fx.sink.types().await;
    assert_eq!(
        types
            .iter()
            .filter(|t| **t == EventType::TaskDeleted)
            .count(),
        2
    );
    assert_eq!(types.last(), Some(&EventType::IndicatorDeleted));
}

#[tokio::test]
async fn test_user_directory_is_admin_only() {
    let fx = Fixture::new().await;
    let root = caller("root", Role::Admin);
    let dave = crate::testing::user("dave", Role::Staff, "sales");

    let err = fx
        .engine
        .create_user(&caller("boss", Role::Manager), dave.clone())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);

    fx.engine.create_user(&root, dave.clone()).await.unwrap();
    let err = fx.engine.create_user(&root, dave.clone()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let mut moved = dave.clone();
    moved.department = "finance".to_string();
    let saved = fx.engine.update_user(&root, "dave", moved).await.unwrap();
    assert_eq!(saved.department, "finance");

    fx.engine.delete_user(&root, "dave").await.unwrap();
    let err = fx.engine.delete_user(&root, "dave").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    assert_eq!(
        fx.sink.types().await,
        vec![
            EventType::UserCreated,
            EventType::UserUpdated,
            EventType::UserDeleted
        ]
    );
}

/// Delegates to a [`MemoryStore`] but can be told to fail main-task listings.
struct FailingListings {
    inner: MemoryStore,
    fail: AtomicBool,
}

#[async_trait]
impl Repository for FailingListings {
    async fn get_indicator(&self, id: Uuid) -> Result<Option<Indicator>, StoreError> {
        self.inner.get_indicator(id).await
    }
    async fn list_indicators(&self) -> Result<Vec<Indicator>, StoreError> {
        self.inner.list_indicators().await
    }
    async fn create_indicator(&self, indicator: Indicator) -> Result<Indicator, StoreError> {
        self.inner.create_indicator(indicator).await
    }
    async fn delete_indicator(&self, id: Uuid) -> Result<bool, StoreError> {
        self.inner.delete_indicator(id).await
    }
    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, StoreError> {
        self.inner.get_task(id).await
    }
    async fn list_tasks(&self) -> Result<Vec<Task>, StoreError> {
        self.inner.list_tasks().await
    }
    async fn list_main_tasks(&self, indicator_id: Uuid) -> Result<Vec<Task>, StoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::other("disk gone")));
        }
        self.inner.list_main_tasks(indicator_id).await
    }
    async fn list_subtasks(&self, parent_id: Uuid) -> Result<Vec<Task>, StoreError> {
        self.inner.list_subtasks(parent_id).await
    }
    async fn create_task(&self, task: Task) -> Result<Task, StoreError> {
        self.inner.create_task(task).await
    }
    async fn update_task(&self, task: Task, expected_version: u64) -> Result<Task, StoreError> {
        self.inner.update_task(task, expected_version).await
    }
    async fn delete_task(&self, id: Uuid) -> Result<bool, StoreError> {
        self.inner.delete_task(id).await
    }
    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        self.inner.get_user(id).await
    }
    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        self.inner.list_users().await
    }
    async fn upsert_user(&self, user: User) -> Result<User, StoreError> {
        self.inner.upsert_user(user).await
    }
    async fn delete_user(&self, id: &str) -> Result<bool, StoreError> {
        self.inner.delete_user(id).await
    }
}

#[tokio::test]
async fn test_approval_stands_when_indicator_status_cannot_be_read() {
    let repo = Arc::new(FailingListings {
        inner: MemoryStore::in_memory(),
        fail: AtomicBool::new(false),
    });
    let sink = Arc::new(MemorySink::new());
    let shared: SharedRepository = repo.clone();
    let engine = WorkflowEngine::new(shared, EventBus::new().with_sink(sink.clone()));

    let indicator = repo
        .create_indicator(Indicator::new(
            "Q3".to_string(),
            Utc::now() + Duration::days(90),
            "boss".to_string(),
        ))
        .await
        .unwrap();
    let task = repo
        .create_task(Task::new(
            TaskKind::Main {
                indicator_id: indicator.id,
                department: "sales".to_string(),
                supporters: vec![],
            },
            "alice".to_string(),
            "Close deals".to_string(),
            Utc::now() + Duration::days(5),
            "boss".to_string(),
        ))
        .await
        .unwrap();
    engine
        .submit(&caller("alice", Role::Staff), task.id, note("done"))
        .await
        .unwrap();

    repo.fail.store(true, Ordering::SeqCst);
    let approved = engine
        .approve(&caller("boss", Role::Manager), task.id, comment("ok"))
        .await
        .unwrap();
    assert_eq!(approved.status, TaskStatus::Approved);

    let stored = repo.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Approved);
    let types = sink.types().await;
    assert!(types.contains(&EventType::TaskApproved));
    assert!(!types.contains(&EventType::IndicatorUpdated));
}
