//! Persistence collaborator.
//!
//! The workflow engine only talks to [`Repository`]. [`MemoryStore`] is the
//! bundled implementation: maps behind `RwLock`, optionally snapshotted to a
//! JSON file after every mutation.

mod memory;

pub use memory::MemoryStore;

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::model::{Indicator, Task, User};

/// Errors raised by a repository.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("task {id} was modified concurrently (expected version {expected}, found {found})")]
    VersionConflict { id: Uuid, expected: u64, found: u64 },
    #[error("{entity} {id} already exists")]
    Duplicate { entity: &'static str, id: String },
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage snapshot is malformed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Read/write access to indicators, tasks and users.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn get_indicator(&self, id: Uuid) -> Result<Option<Indicator>, StoreError>;
    async fn list_indicators(&self) -> Result<Vec<Indicator>, StoreError>;
    async fn create_indicator(&self, indicator: Indicator) -> Result<Indicator, StoreError>;
    async fn delete_indicator(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, StoreError>;
    async fn list_tasks(&self) -> Result<Vec<Task>, StoreError>;
    /// Main tasks belonging to an indicator.
    async fn list_main_tasks(&self, indicator_id: Uuid) -> Result<Vec<Task>, StoreError>;
    /// Subtasks belonging to a main task.
    async fn list_subtasks(&self, parent_id: Uuid) -> Result<Vec<Task>, StoreError>;
    async fn create_task(&self, task: Task) -> Result<Task, StoreError>;
    /// Write `task` if the stored version still equals `expected_version`.
    ///
    /// Returns the stored task with its version bumped.
    async fn update_task(&self, task: Task, expected_version: u64) -> Result<Task, StoreError>;
    async fn delete_task(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError>;
    async fn list_users(&self) -> Result<Vec<User>, StoreError>;
    async fn upsert_user(&self, user: User) -> Result<User, StoreError>;
    async fn delete_user(&self, id: &str) -> Result<bool, StoreError>;
}

/// Shared repository handle.
pub type SharedRepository = Arc<dyn Repository>;
