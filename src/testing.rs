//! Fixtures shared by unit tests across modules.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::events::{EventBus, MemorySink};
use crate::model::{CurrentUser, Indicator, Role, Task, TaskKind, User};
use crate::store::{MemoryStore, Repository, SharedRepository};
use crate::workflow::WorkflowEngine;

pub struct Fixture {
    pub repo: SharedRepository,
    pub sink: Arc<MemorySink>,
    pub engine: WorkflowEngine,
}

pub fn user(id: &str, role: Role, department: &str) -> User {
    User {
        id: id.to_string(),
        name: id.to_uppercase(),
        role,
        position: String::new(),
        department: department.to_string(),
    }
}

pub fn caller(id: &str, role: Role) -> CurrentUser {
    CurrentUser {
        id: id.to_string(),
        role,
        position: String::new(),
        department: "sales".to_string(),
    }
}

impl Fixture {
    /// Store with a manager `boss`, staff `alice` and `bob` in sales,
    /// `carol` in finance and an administrator `root`.
    pub async fn new() -> Self {
        let repo: SharedRepository = Arc::new(MemoryStore::in_memory());
        for u in [
            user("boss", Role::Manager, "sales"),
            user("alice", Role::Staff, "sales"),
            user("bob", Role::Staff, "sales"),
            user("carol", Role::Staff, "finance"),
            user("root", Role::Admin, "it"),
        ] {
            repo.upsert_user(u).await.unwrap();
        }
        let sink = Arc::new(MemorySink::new());
        let bus = EventBus::new().with_sink(sink.clone());
        let engine = WorkflowEngine::new(Arc::clone(&repo), bus);
        Self { repo, sink, engine }
    }

    /// Indicator owned by `boss`.
    pub async fn indicator(&self, name: &str) -> Indicator {
        self.repo
            .create_indicator(Indicator::new(
                name.to_string(),
                Utc::now() + Duration::days(90),
                "boss".to_string(),
            ))
            .await
            .unwrap()
    }

    /// Main task led by `leader`, inserted directly so deadlines may be in the past.
    pub async fn main_task(&self, indicator_id: Uuid, leader: &str, end_date: DateTime<Utc>) -> Task {
        self.repo
            .create_task(Task::new(
                TaskKind::Main {
                    indicator_id,
                    department: "sales".to_string(),
                    supporters: vec![],
                },
                leader.to_string(),
                "Close deals".to_string(),
                end_date,
                "boss".to_string(),
            ))
            .await
            .unwrap()
    }

    pub async fn subtask(&self, parent: &Task, assignee: &str, end_date: DateTime<Utc>) -> Task {
        self.repo
            .create_task(Task::new(
                TaskKind::Sub {
                    parent_id: parent.id,
                    assignee: assignee.to_string(),
                },
                parent.leader.clone(),
                "Call the client".to_string(),
                end_date,
                parent.leader.clone(),
            ))
            .await
            .unwrap()
    }
}
