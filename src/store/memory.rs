//! In-memory repository with optional JSON snapshot.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Repository, StoreError};
use crate::model::{Indicator, Task, User};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    indicators: Vec<Indicator>,
    #[serde(default)]
    tasks: Vec<Task>,
    #[serde(default)]
    users: Vec<User>,
}

#[derive(Debug, Default)]
struct Data {
    indicators: HashMap<Uuid, Indicator>,
    tasks: HashMap<Uuid, Task>,
    users: HashMap<String, User>,
}

impl From<Snapshot> for Data {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            indicators: snapshot.indicators.into_iter().map(|i| (i.id, i)).collect(),
            tasks: snapshot.tasks.into_iter().map(|t| (t.id, t)).collect(),
            users: snapshot
                .users
                .into_iter()
                .map(|u| (u.id.clone(), u))
                .collect(),
        }
    }
}

/// Repository kept in memory, persisted to `storage_path` when one is set.
pub struct MemoryStore {
    data: RwLock<Data>,
    storage_path: Option<PathBuf>,
}

impl MemoryStore {
    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            data: RwLock::new(Data::default()),
            storage_path: None,
        }
    }

    /// Open a store backed by a JSON snapshot, loading it if it exists.
    pub fn open(storage_path: PathBuf) -> Result<Self, StoreError> {
        let data = if storage_path.exists() {
            let contents = std::fs::read_to_string(&storage_path)?;
            let snapshot: Snapshot = serde_json::from_str(&contents)?;
            tracing::info!(
                "Loaded {} indicators, {} tasks, {} users from {}",
                snapshot.indicators.len(),
                snapshot.tasks.len(),
                snapshot.users.len(),
                storage_path.display()
            );
            Data::from(snapshot)
        } else {
            tracing::info!(
                "No snapshot at {}, starting with an empty store",
                storage_path.display()
            );
            Data::default()
        };

        Ok(Self {
            data: RwLock::new(data),
            storage_path: Some(storage_path),
        })
    }

    /// Write the snapshot file. Callers pass the guard they already hold.
    fn save_to_disk(&self, data: &Data) -> Result<(), StoreError> {
        let Some(path) = &self.storage_path else {
            return Ok(());
        };

        let snapshot = Snapshot {
            indicators: data.indicators.values().cloned().collect(),
            tasks: data.tasks.values().cloned().collect(),
            users: data.users.values().cloned().collect(),
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(path, contents)?;
        tracing::debug!("Saved store snapshot to {}", path.display());
        Ok(())
    }
}

#[async_trait]
impl Repository for MemoryStore {
    async fn get_indicator(&self, id: Uuid) -> Result<Option<Indicator>, StoreError> {
        Ok(self.data.read().await.indicators.get(&id).cloned())
    }

    async fn list_indicators(&self) -> Result<Vec<Indicator>, StoreError> {
        let data = self.data.read().await;
        let mut list: Vec<_> = data.indicators.values().cloned().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(list)
    }

    async fn create_indicator(&self, indicator: Indicator) -> Result<Indicator, StoreError> {
        let mut data = self.data.write().await;
        if data.indicators.contains_key(&indicator.id) {
            return Err(StoreError::Duplicate {
                entity: "indicator",
                id: indicator.id.to_string(),
            });
        }
        data.indicators.insert(indicator.id, indicator.clone());
        self.save_to_disk(&data)?;
        Ok(indicator)
    }

    async fn delete_indicator(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut data = self.data.write().await;
        let existed = data.indicators.remove(&id).is_some();
        if existed {
            self.save_to_disk(&data)?;
        }
        Ok(existed)
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, StoreError> {
        Ok(self.data.read().await.tasks.get(&id).cloned())
    }

    async fn list_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let data = self.data.read().await;
        let mut list: Vec<_> = data.tasks.values().cloned().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(list)
    }

    async fn list_main_tasks(&self, indicator_id: Uuid) -> Result<Vec<Task>, StoreError> {
        let data = self.data.read().await;
        let mut list: Vec<_> = data
            .tasks
            .values()
            .filter(|t| t.kind.indicator_id() == Some(indicator_id))
            .cloned()
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(list)
    }

    async fn list_subtasks(&self, parent_id: Uuid) -> Result<Vec<Task>, StoreError> {
        let data = self.data.read().await;
        let mut list: Vec<_> = data
            .tasks
            .values()
            .filter(|t| t.kind.parent_id() == Some(parent_id))
            .cloned()
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(list)
    }

    async fn create_task(&self, task: Task) -> Result<Task, StoreError> {
        let mut data = self.data.write().await;
        if data.tasks.contains_key(&task.id) {
            return Err(StoreError::Duplicate {
                entity: "task",
                id: task.id.to_string(),
            });
        }
        data.tasks.insert(task.id, task.clone());
        self.save_to_disk(&data)?;
        Ok(task)
    }

    async fn update_task(&self, mut task: Task, expected_version: u64) -> Result<Task, StoreError> {
        let mut data = self.data.write().await;
        let found = match data.tasks.get(&task.id) {
            Some(current) => current.version,
            None => {
                return Err(StoreError::NotFound {
                    entity: "task",
                    id: task.id.to_string(),
                })
            }
        };
        if found != expected_version {
            return Err(StoreError::VersionConflict {
                id: task.id,
                expected: expected_version,
                found,
            });
        }
        task.version = found + 1;
        data.tasks.insert(task.id, task.clone());
        self.save_to_disk(&data)?;
        Ok(task)
    }

    async fn delete_task(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut data = self.data.write().await;
        let existed = data.tasks.remove(&id).is_some();
        if existed {
            self.save_to_disk(&data)?;
        }
        Ok(existed)
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.data.read().await.users.get(id).cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let data = self.data.read().await;
        let mut list: Vec<_> = data.users.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(list)
    }

    async fn upsert_user(&self, user: User) -> Result<User, StoreError> {
        let mut data = self.data.write().await;
        data.users.insert(user.id.clone(), user.clone());
        self.save_to_disk(&data)?;
        Ok(user)
    }

    async fn delete_user(&self, id: &str) -> Result<bool, StoreError> {
        let mut data = self.data.write().await;
        let existed = data.users.remove(id).is_some();
        if existed {
            self.save_to_disk(&data)?;
        }
        Ok(existed)
    }
}
